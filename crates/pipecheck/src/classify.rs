use std::collections::HashMap;

use crate::config::CheckConfig;
use crate::stage::{Behavior, StageDescriptor};

/// Stages whose behavior is fixed regardless of how they are declared.
pub const WELL_KNOWN_STAGES: &[(&str, Behavior)] = &[
    ("Print", Behavior::Identity),
    ("Dump", Behavior::Identity),
    ("Stop", Behavior::Sink),
];

/// Decides a stage's [`Behavior`] from its identity and declared metadata.
/// Schema shape never enters into it.
#[derive(Debug, Clone)]
pub struct Classifier {
    well_known: HashMap<String, Behavior>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            well_known: WELL_KNOWN_STAGES
                .iter()
                .map(|(name, behavior)| (name.to_string(), *behavior))
                .collect(),
        }
    }
}

impl Classifier {
    pub fn from_config(config: &CheckConfig) -> Self {
        let mut classifier = Self::default();
        let kinds = &config.stages;
        for (names, behavior) in [
            (&kinds.identity, Behavior::Identity),
            (&kinds.sink, Behavior::Sink),
            (&kinds.source, Behavior::Source),
        ] {
            for name in names {
                classifier.register(name.clone(), behavior);
            }
        }
        classifier
    }

    pub fn register(&mut self, identity: impl Into<String>, behavior: Behavior) {
        self.well_known.insert(identity.into(), behavior);
    }

    pub fn classify(&self, stage: &StageDescriptor) -> Behavior {
        self.well_known
            .get(&stage.identity)
            .copied()
            .or(stage.declared_behavior)
            .unwrap_or(Behavior::Regular)
    }

    /// A sink, or a composite that ends in one.
    pub fn is_terminal(&self, stage: &StageDescriptor) -> bool {
        stage.terminal || self.classify(stage) == Behavior::Sink
    }
}
