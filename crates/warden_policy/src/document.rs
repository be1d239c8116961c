//! Parsed model and policy documents, and an inspection-only engine.
//!
//! [`InspectionEngine`] loads staged files into structured documents without
//! deciding any request. The evaluation CLI uses it to report what an
//! assembled context contains and to evaluate individual predicates.

use crate::assembler::{EvaluationContext, PolicyEngine};
use crate::input::{PolicyError, REQUIRED_MODEL_SECTIONS};
use crate::registry::{FunctionMap, MatcherFn, RegistryError};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;

const POLICY_SECTION: &str = "policy_definition";
const ROLE_SECTION: &str = "role_definition";
const MATCHER_SECTION: &str = "matchers";

fn engine_error(message: impl Into<String>) -> PolicyError {
    PolicyError::Engine {
        message: message.into(),
    }
}

fn read(path: &Path) -> Result<String, PolicyError> {
    std::fs::read_to_string(path)
        .map_err(|e| engine_error(format!("cannot read {}: {}", path.display(), e)))
}

/// A model definition split into sections of `key = value` assignments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelDocument {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl ModelDocument {
    /// Parse model text
    ///
    /// Blank lines and `#` comments are skipped; a trailing `\` joins a line
    /// with the next one.
    ///
    /// # Errors
    ///
    /// Returns error on assignments outside a section or lines that are
    /// neither a section header nor an assignment
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut sections: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
        let mut current: Option<String> = None;
        let mut pending = String::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
                continue;
            }

            if let Some(continued) = line.strip_suffix('\\') {
                pending.push_str(continued.trim_end());
                pending.push(' ');
                continue;
            }
            let line = if pending.is_empty() {
                line.to_string()
            } else {
                let joined = format!("{}{}", pending, line);
                pending.clear();
                joined
            };

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| engine_error(format!("model line {}: expected `key = value`", index + 1)))?;
            let section = current
                .as_ref()
                .ok_or_else(|| engine_error(format!("model line {}: assignment outside a section", index + 1)))?;
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    /// Read and parse a model file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        Self::parse(&read(path)?)
    }

    /// Section names in file order
    #[must_use]
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    /// Assignments of a section
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    /// Value of `key` in `section`
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Grouping relations (`g`, `g2`, ...) declared by the model
    #[must_use]
    pub fn grouping_relations(&self) -> Vec<&str> {
        self.section(ROLE_SECTION)
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Policy types (`p`, `p2`, ...) declared by the model
    #[must_use]
    pub fn policy_types(&self) -> Vec<&str> {
        self.section(POLICY_SECTION)
            .map(|s| s.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The matcher expression, if any
    #[must_use]
    pub fn matcher(&self) -> Option<&str> {
        self.get(MATCHER_SECTION, "m")
    }

    /// Whether `ptype` is declared as a policy type or grouping relation
    #[must_use]
    pub fn declares(&self, ptype: &str) -> bool {
        self.policy_types().contains(&ptype) || self.grouping_relations().contains(&ptype)
    }

    fn check_required_sections(&self) -> Result<(), PolicyError> {
        for marker in REQUIRED_MODEL_SECTIONS {
            let name = marker.trim_start_matches('[').trim_end_matches(']');
            if !self.sections.contains_key(name) {
                return Err(engine_error(format!("model is missing section {marker}")));
            }
        }
        Ok(())
    }
}

/// One policy line: a relation type and its fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyRule {
    /// Relation type (`p`, `g`, `g2`, ...)
    pub ptype: String,
    /// Remaining comma-separated fields
    pub values: Vec<String>,
}

/// Parsed policy rules in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyDocument {
    rules: Vec<PolicyRule>,
}

impl PolicyDocument {
    /// Parse CSV-style policy text
    ///
    /// # Errors
    ///
    /// Returns error on a line with a type but no fields
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut rules = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split(',').map(|f| f.trim().to_string());
            let ptype = fields.next().unwrap_or_default();
            let values: Vec<String> = fields.collect();
            if ptype.is_empty() || values.is_empty() {
                return Err(engine_error(format!("policy line {}: expected `type, field, ...`", index + 1)));
            }
            rules.push(PolicyRule { ptype, values });
        }
        Ok(Self { rules })
    }

    /// Read and parse a policy file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        Self::parse(&read(path)?)
    }

    /// All rules
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Rules of one relation type
    pub fn rules_of<'a>(&'a self, ptype: &'a str) -> impl Iterator<Item = &'a PolicyRule> + 'a {
        self.rules.iter().filter(move |r| r.ptype == ptype)
    }

    /// Number of rules per relation type, in first-seen order
    #[must_use]
    pub fn counts(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::new();
        for rule in &self.rules {
            *counts.entry(rule.ptype.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Engine that parses staged files without evaluating requests
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectionEngine;

impl PolicyEngine for InspectionEngine {
    type Context = InspectionContext;

    fn load(&self, model: &Path, policy: &Path) -> Result<InspectionContext, PolicyError> {
        let model = ModelDocument::load(model)?;
        model.check_required_sections()?;
        let policy = PolicyDocument::load(policy)?;

        if let Some(rule) = policy.rules().iter().find(|r| !model.declares(&r.ptype)) {
            return Err(engine_error(format!(
                "policy type `{}` is not declared by the model",
                rule.ptype
            )));
        }

        Ok(InspectionContext {
            model,
            policy,
            functions: FunctionMap::new(),
        })
    }
}

/// A loaded model and policy with their registered functions
#[derive(Debug, Clone)]
pub struct InspectionContext {
    model: ModelDocument,
    policy: PolicyDocument,
    functions: FunctionMap,
}

impl EvaluationContext for InspectionContext {
    fn add_function(&mut self, name: &str, function: MatcherFn) {
        if let Err(e) = self.functions.register(name, function) {
            tracing::warn!(error = %e, "ignoring duplicate function registration");
        }
    }
}

impl InspectionContext {
    /// The parsed model
    #[must_use]
    pub fn model(&self) -> &ModelDocument {
        &self.model
    }

    /// The parsed policy
    #[must_use]
    pub fn policy(&self) -> &PolicyDocument {
        &self.policy
    }

    /// Registered functions
    #[must_use]
    pub fn functions(&self) -> &FunctionMap {
        &self.functions
    }

    /// Call a registered function
    ///
    /// # Errors
    ///
    /// Returns error if no function has that name
    pub fn call(&self, name: &str, subject: &str, pattern: &str) -> Result<bool, RegistryError> {
        self.functions.call(name, subject, pattern)
    }

    /// Serializable overview of the context
    #[must_use]
    pub fn summary(&self) -> InspectionSummary {
        InspectionSummary {
            sections: self.model.section_names().iter().map(|s| s.to_string()).collect(),
            matcher: self.model.matcher().map(str::to_string),
            grouping_relations: self
                .model
                .grouping_relations()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rules: self.policy.counts(),
            functions: self.functions.names().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Overview of an [`InspectionContext`], as printed by `warden inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionSummary {
    /// Model sections in file order
    pub sections: Vec<String>,
    /// Matcher expression
    pub matcher: Option<String>,
    /// Declared grouping relations
    pub grouping_relations: Vec<String>,
    /// Rule counts per relation type
    pub rules: IndexMap<String, usize>,
    /// Registered function names
    pub functions: Vec<String>,
}
