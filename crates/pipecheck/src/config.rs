use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "pipecheck.toml";
pub const DEFAULT_MAX_PASSES: usize = 16;

/// How a type variable that survives substitution is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnboundGenerics {
    #[default]
    Error,
    /// Rewrite it to `Any`.
    Any,
}

/// Whether anything may be composed after a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterSink {
    #[default]
    Error,
    Allow,
}

/// Extra well-known stage names, by behavior.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageKinds {
    pub identity: Vec<String>,
    pub sink: Vec<String>,
    pub source: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    pub unbound_generics: UnboundGenerics,
    pub after_sink: AfterSink,
    pub max_passes: usize,
    pub stages: StageKinds,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            unbound_generics: UnboundGenerics::default(),
            after_sink: AfterSink::default(),
            max_passes: DEFAULT_MAX_PASSES,
            stages: StageKinds::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config '{origin}': max_passes must be at least 1")]
    NoPasses { origin: String },
}

impl CheckConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text, &path.display().to_string())?;
        debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    /// Loads `pipecheck.toml` from the entry file's directory, or the
    /// defaults when there is none.
    pub fn discover(entry: &Path) -> Result<Self, ConfigError> {
        let dir = entry.parent().unwrap_or_else(|| Path::new("."));
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        if config.max_passes == 0 {
            return Err(ConfigError::NoPasses {
                origin: origin.to_string(),
            });
        }
        Ok(config)
    }
}
