//! Named matcher functions handed to an evaluation context.

use crate::matcher;
use indexmap::IndexMap;
use warden_core::CoreError;

/// A stateless predicate callable from a matcher expression
pub type MatcherFn = fn(&str, &str) -> bool;

/// Name under which [`matcher::key_match`] is registered
pub const KEY_MATCH: &str = "keyMatch";
/// Name under which [`matcher::key_match2`] is registered
pub const KEY_MATCH2: &str = "keyMatch2";
/// Name under which [`matcher::key_match3`] is registered
pub const KEY_MATCH3: &str = "keyMatch3";
/// Name under which [`matcher::key_match4`] is registered
pub const KEY_MATCH4: &str = "keyMatch4";
/// Name under which [`matcher::key_match5`] is registered
pub const KEY_MATCH5: &str = "keyMatch5";
/// Name under which [`matcher::regex_match`] is registered
pub const REGEX_MATCH: &str = "regexMatch";
/// Name under which [`matcher::ip_match`] is registered
pub const IP_MATCH: &str = "ipMatch";
/// Name under which [`matcher::glob_match`] is registered
pub const GLOB_MATCH: &str = "globMatch";

/// Built-in predicates, in registration order
const BUILTINS: [(&str, MatcherFn); 8] = [
    (KEY_MATCH, matcher::key_match),
    (KEY_MATCH2, matcher::key_match2),
    (KEY_MATCH3, matcher::key_match3),
    (KEY_MATCH4, matcher::key_match4),
    (KEY_MATCH5, matcher::key_match5),
    (REGEX_MATCH, matcher::regex_match),
    (IP_MATCH, matcher::ip_match),
    (GLOB_MATCH, matcher::glob_match),
];

/// Error from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A function with this name already exists
    #[error("Function already registered: {name}")]
    AlreadyRegistered {
        /// Conflicting name
        name: String,
    },
    /// No function with this name
    #[error("Function not found: {name}")]
    NotFound {
        /// Requested name
        name: String,
    },
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { name } => CoreError::NotFound {
                kind: "Function".to_string(),
                name,
            },
            RegistryError::AlreadyRegistered { .. } => CoreError::invalid_input(err.to_string()),
        }
    }
}

/// Mapping from matcher-expression names to predicates.
///
/// Each evaluation context gets its own map; nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct FunctionMap {
    functions: IndexMap<String, MatcherFn>,
}

impl FunctionMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: IndexMap::new(),
        }
    }

    /// Create a map holding the eight built-in predicates
    #[must_use]
    pub fn builtin() -> Self {
        let functions = BUILTINS
            .iter()
            .map(|(name, function)| ((*name).to_string(), *function))
            .collect();
        Self { functions }
    }

    /// Register a function under a new name
    ///
    /// # Errors
    ///
    /// Returns error if the name is taken
    pub fn register(&mut self, name: &str, function: MatcherFn) -> Result<(), RegistryError> {
        if self.functions.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        self.functions.insert(name.to_string(), function);
        Ok(())
    }

    /// Look up a function by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<MatcherFn> {
        self.functions.get(name).copied()
    }

    /// Call a function by name
    ///
    /// # Errors
    ///
    /// Returns error if no function has that name
    pub fn call(&self, name: &str, subject: &str, pattern: &str) -> Result<bool, RegistryError> {
        let function = self.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        Ok(function(subject, pattern))
    }

    /// Check if a name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    /// Iterate over `(name, function)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, MatcherFn)> {
        self.functions.iter().map(|(name, f)| (name.as_str(), *f))
    }

    /// Number of registered functions
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
