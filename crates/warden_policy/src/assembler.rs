//! Assembly of evaluation contexts from staged inputs and matcher functions.

use crate::input::{InputRole, MaterializedInput, Materializer, PolicyError};
use crate::registry::{FunctionMap, MatcherFn};
use std::path::Path;

/// An engine that can load a model and policy from files
pub trait PolicyEngine {
    /// The ready-to-query context produced by this engine
    type Context: EvaluationContext;

    /// Load a context from a model file and a policy file
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Engine`] if the engine rejects either file
    fn load(&self, model: &Path, policy: &Path) -> Result<Self::Context, PolicyError>;
}

/// A loaded context that accepts predicate functions
pub trait EvaluationContext {
    /// Make `function` callable as `name` from matcher expressions
    fn add_function(&mut self, name: &str, function: MatcherFn);
}

/// An evaluation context together with the inputs it was built from.
///
/// Staged inputs live exactly as long as the assembly, so the engine can keep
/// re-reading its files (policy reloads) until the context is dropped.
#[derive(Debug)]
pub struct Assembly<C> {
    context: C,
    model: MaterializedInput,
    policy: MaterializedInput,
}

impl<C> Assembly<C> {
    /// The assembled context
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the assembled context
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Path the model was loaded from
    #[must_use]
    pub fn model_path(&self) -> &Path {
        self.model.path()
    }

    /// Path the policy was loaded from
    #[must_use]
    pub fn policy_path(&self) -> &Path {
        self.policy.path()
    }

    /// Split into the context and its inputs
    #[must_use]
    pub fn into_parts(self) -> (C, MaterializedInput, MaterializedInput) {
        (self.context, self.model, self.policy)
    }
}

/// Builds evaluation contexts for a [`PolicyEngine`]
#[derive(Debug, Clone)]
pub struct EnforcerAssembler<E> {
    engine: E,
    materializer: Materializer,
}

impl<E: PolicyEngine> EnforcerAssembler<E> {
    /// Create an assembler staging inline inputs in the system temp dir
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            materializer: Materializer::new(),
        }
    }

    /// Use a specific materializer
    #[must_use]
    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = materializer;
        self
    }

    /// The underlying engine
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Assemble a context with the built-in matcher functions
    ///
    /// # Errors
    ///
    /// Returns error if either input fails to materialize or the engine
    /// cannot load them
    pub fn assemble(
        &self,
        model: Option<&str>,
        policy: Option<&str>,
    ) -> Result<Assembly<E::Context>, PolicyError> {
        self.assemble_with(model, policy, FunctionMap::builtin())
    }

    /// Assemble a context registering every function in `functions`
    ///
    /// # Errors
    ///
    /// Returns error if either input fails to materialize or the engine
    /// cannot load them
    pub fn assemble_with(
        &self,
        model: Option<&str>,
        policy: Option<&str>,
        functions: FunctionMap,
    ) -> Result<Assembly<E::Context>, PolicyError> {
        let model = self.materializer.materialize(InputRole::Model, model)?;
        let policy = self.materializer.materialize(InputRole::Policy, policy)?;

        let mut context = self.engine.load(model.path(), policy.path())?;
        for (name, function) in functions.iter() {
            context.add_function(name, function);
        }

        tracing::debug!(
            model = %model.path().display(),
            policy = %policy.path().display(),
            functions = functions.len(),
            "assembled evaluation context"
        );

        Ok(Assembly {
            context,
            model,
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MODEL: &str = "[request_definition]\nr = sub, obj, act\n\
        [policy_definition]\np = sub, obj, act\n\
        [role_definition]\ng = _, _\ng2 = _, _\ng3 = _, _\n\
        [policy_effect]\ne = some(where (p.eft == allow))\n\
        [matchers]\nm = g(r.sub, p.sub) && keyMatch(r.obj, p.obj)\n";

    /// Records what it was asked to do
    #[derive(Debug, Default)]
    struct RecordingContext {
        model: PathBuf,
        policy: PathBuf,
        functions: FunctionMap,
    }

    impl EvaluationContext for RecordingContext {
        fn add_function(&mut self, name: &str, function: MatcherFn) {
            self.functions.register(name, function).unwrap();
        }
    }

    struct RecordingEngine;

    impl PolicyEngine for RecordingEngine {
        type Context = RecordingContext;

        fn load(&self, model: &Path, policy: &Path) -> Result<RecordingContext, PolicyError> {
            Ok(RecordingContext {
                model: model.to_path_buf(),
                policy: policy.to_path_buf(),
                functions: FunctionMap::new(),
            })
        }
    }

    struct FailingEngine;

    impl PolicyEngine for FailingEngine {
        type Context = RecordingContext;

        fn load(&self, _model: &Path, _policy: &Path) -> Result<RecordingContext, PolicyError> {
            Err(PolicyError::Engine {
                message: "unsupported effect".to_string(),
            })
        }
    }

    fn assembler<E: PolicyEngine>(engine: E) -> (tempfile::TempDir, EnforcerAssembler<E>) {
        let dir = tempfile::tempdir().unwrap();
        let assembler =
            EnforcerAssembler::new(engine).with_materializer(Materializer::in_dir(dir.path()));
        (dir, assembler)
    }

    #[test]
    fn test_assemble_registers_builtins() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let assembly = assembler
            .assemble(Some(MODEL), Some("p, alice, /data/*, read"))
            .unwrap();

        let ctx = assembly.context();
        assert_eq!(ctx.functions.len(), 8);
        assert!(ctx.functions.call("keyMatch", "/data/1", "/data/*").unwrap());
        assert_eq!(ctx.model, assembly.model_path());
        assert_eq!(ctx.policy, assembly.policy_path());
    }

    #[test]
    fn test_assemble_with_custom_map() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let mut functions = FunctionMap::new();
        functions
            .register("startsWith", |a: &str, b: &str| a.starts_with(b))
            .unwrap();

        let assembly = assembler
            .assemble_with(Some(MODEL), Some(""), functions)
            .unwrap();
        assert_eq!(assembly.context().functions.names(), vec!["startsWith"]);
    }

    #[test]
    fn test_contexts_do_not_share_functions() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let mut first = assembler.assemble(Some(MODEL), Some("")).unwrap();
        first
            .context_mut()
            .add_function("extra", |a: &str, b: &str| a == b);
        let second = assembler.assemble(Some(MODEL), Some("")).unwrap();

        assert!(first.context().functions.contains("extra"));
        assert!(!second.context().functions.contains("extra"));
    }

    #[test]
    fn test_assemble_fails_fast_on_bad_model() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let result = assembler.assemble(Some("[matchers]\nm = true"), Some(""));
        assert!(matches!(result, Err(PolicyError::InvalidInput { .. })));
    }

    #[test]
    fn test_assemble_rejects_absent_policy() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let result = assembler.assemble(Some(MODEL), None);
        assert!(matches!(result, Err(PolicyError::InvalidInput { .. })));
    }

    #[test]
    fn test_engine_error_propagates() {
        let (_dir, assembler) = assembler(FailingEngine);
        let err = assembler.assemble(Some(MODEL), Some("")).unwrap_err();
        assert_eq!(err.to_string(), "engine failed to load: unsupported effect");
    }

    #[test]
    fn test_staged_inputs_live_with_assembly() {
        let (_dir, assembler) = assembler(RecordingEngine);
        let assembly = assembler
            .assemble(Some(MODEL), Some("p, alice, data1, read|g2, a, b"))
            .unwrap();
        let policy = assembly.policy_path().to_path_buf();
        assert_eq!(
            std::fs::read_to_string(&policy).unwrap(),
            "p, alice, data1, read\ng2, a, b"
        );
        drop(assembly);
        assert!(!policy.exists());
    }
}
