//! WARDEN Policy Support
//!
//! Predicate functions for matcher expressions, staging of model and policy
//! inputs, and assembly of evaluation contexts for an external policy engine.
//! The engine's own evaluation semantics live behind [`PolicyEngine`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod document;
pub mod input;
pub mod matcher;
pub mod registry;

pub use assembler::{Assembly, EnforcerAssembler, EvaluationContext, PolicyEngine};
pub use document::{
    InspectionContext, InspectionEngine, InspectionSummary, ModelDocument, PolicyDocument, PolicyRule,
};
pub use input::{InputRole, InputSource, MaterializedInput, Materializer, PolicyError, PolicyInputSpec};
pub use matcher::ParamSyntax;
pub use registry::{FunctionMap, MatcherFn, RegistryError};

/// Library version reported by the evaluation CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
