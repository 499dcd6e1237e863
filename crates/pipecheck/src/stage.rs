use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Span;
use crate::generics;
use crate::schema::{GenericBindings, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Leads a pipeline; has no input.
    Source,
    /// Passes its input through unchanged.
    Identity,
    /// Accepts anything and terminates the stream.
    Sink,
    Regular,
}

impl Behavior {
    pub fn as_str(self) -> &'static str {
        match self {
            Behavior::Source => "source",
            Behavior::Identity => "identity",
            Behavior::Sink => "sink",
            Behavior::Regular => "regular",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "source" => Some(Behavior::Source),
            "identity" => Some(Behavior::Identity),
            "sink" => Some(Behavior::Sink),
            "regular" => Some(Behavior::Regular),
            _ => None,
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage's resolved declaration. Built once by the resolution front end
/// and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub identity: String,
    /// Behavior the author declared, if any. The classifier decides the
    /// effective behavior.
    pub declared_behavior: Option<Behavior>,
    pub input: Option<TypeRef>,
    pub output: Option<TypeRef>,
    pub type_params: Vec<String>,
    /// Set on composites that end in a sink.
    pub terminal: bool,
    #[serde(skip)]
    pub span: Span,
}

impl StageDescriptor {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            declared_behavior: None,
            input: None,
            output: None,
            type_params: Vec::new(),
            terminal: false,
            span: Span::default(),
        }
    }

    pub fn with_input(mut self, input: TypeRef) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: TypeRef) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.declared_behavior = Some(behavior);
        self
    }

    pub fn with_type_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type_params = params.into_iter().map(Into::into).collect();
        self
    }
}

/// One use of a stage in a pipeline: the descriptor plus the bindings of
/// that instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInstance {
    pub descriptor: Arc<StageDescriptor>,
    pub bindings: GenericBindings,
}

impl StageInstance {
    pub fn new(descriptor: Arc<StageDescriptor>) -> Self {
        Self {
            descriptor,
            bindings: GenericBindings::new(),
        }
    }

    /// Binds the descriptor's type params positionally to `args`.
    ///
    /// Returns the expected argument count when `args` has the wrong length.
    /// An empty `args` leaves every parameter unbound.
    pub fn instantiate(descriptor: Arc<StageDescriptor>, args: Vec<TypeRef>) -> Result<Self, usize> {
        let expected = descriptor.type_params.len();
        if !args.is_empty() && args.len() != expected {
            return Err(expected);
        }

        let bindings = generics::bind_params(&descriptor.type_params, &args);
        Ok(Self {
            descriptor,
            bindings,
        })
    }

    pub fn identity(&self) -> &str {
        &self.descriptor.identity
    }

    /// Display name: the identity plus any bound type arguments.
    pub fn label(&self) -> String {
        if self.bindings.is_empty() {
            return self.descriptor.identity.clone();
        }

        let args = self
            .descriptor
            .type_params
            .iter()
            .map(|param| match self.bindings.get(param) {
                Some(ty) => ty.to_string(),
                None => param.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}<{args}>", self.descriptor.identity)
    }
}
