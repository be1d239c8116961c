//! Staging of model and policy inputs.
//!
//! An input is either the path of a file the engine can read directly, or
//! literal text that has to be validated and written to a temporary file
//! first. Literal text may use `|` in place of newlines so that a whole
//! policy fits in a single query-string value.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use warden_core::CoreError;

/// Section markers every model definition must contain
pub const REQUIRED_MODEL_SECTIONS: [&str; 4] = [
    "[request_definition]",
    "[policy_definition]",
    "[policy_effect]",
    "[matchers]",
];

/// Prefixes a policy line may start with
pub const POLICY_LINE_PREFIXES: [&str; 5] = ["p,", "g,", "g2,", "g3,", "g4,"];

/// Escape for newlines in literal content
const LINE_ESCAPE: char = '|';

/// Policy staging error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Input missing or failing its grammar check
    #[error("{reason}")]
    InvalidInput {
        /// What was wrong
        reason: String,
    },
    /// Filesystem failure while staging
    #[error("failed to stage {role} input: {message}")]
    Staging {
        /// Role of the input being staged
        role: InputRole,
        /// Underlying I/O error
        message: String,
    },
    /// A staged file could not be detached from cleanup
    #[error("failed to keep staged input: {message}")]
    Persist {
        /// Underlying I/O error
        message: String,
    },
    /// The engine rejected the staged inputs
    #[error("engine failed to load: {message}")]
    Engine {
        /// Engine diagnostic
        message: String,
    },
}

impl PolicyError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

impl From<PolicyError> for CoreError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidInput { reason } => CoreError::InvalidInput { reason },
            other => CoreError::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// What an input describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRole {
    /// Model definition (`.conf` grammar)
    Model,
    /// Policy rules (CSV lines)
    Policy,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Policy => write!(f, "policy"),
        }
    }
}

/// Where an input's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Path to an existing regular file
    FilePath(PathBuf),
    /// Literal content
    InlineContent(String),
}

/// A raw input classified by role and source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyInputSpec {
    /// Model or policy
    pub role: InputRole,
    /// File path or literal content
    pub source: InputSource,
}

impl PolicyInputSpec {
    /// Classify a raw string: an existing regular file is a path, anything else is content.
    #[must_use]
    pub fn classify(role: InputRole, raw: &str) -> Self {
        let path = Path::new(raw);
        let source = if !raw.is_empty() && path.is_file() {
            InputSource::FilePath(path.to_path_buf())
        } else {
            InputSource::InlineContent(raw.to_string())
        };
        Self { role, source }
    }
}

/// A filesystem reference the engine can load
#[derive(Debug)]
pub enum MaterializedInput {
    /// File supplied by the caller, used as-is
    Existing(PathBuf),
    /// Temporary file written from literal content; removed on drop
    Staged(TempPath),
}

impl MaterializedInput {
    /// Path to hand to the engine
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(path) => path.as_path(),
            Self::Staged(temp) => &**temp,
        }
    }

    /// Whether this input was written by the materializer
    #[must_use]
    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Staged(_))
    }

    /// Detach the file from automatic cleanup and return its path
    ///
    /// # Errors
    ///
    /// Returns error if the temporary file could not be persisted
    pub fn keep(self) -> Result<PathBuf, PolicyError> {
        match self {
            Self::Existing(path) => Ok(path),
            Self::Staged(temp) => temp.keep().map_err(|e| PolicyError::Persist {
                message: e.to_string(),
            }),
        }
    }
}

/// Validates literal inputs and stages them as files
#[derive(Debug, Clone, Default)]
pub struct Materializer {
    /// Directory for staged files (system temp dir when `None`)
    dir: Option<PathBuf>,
}

impl Materializer {
    /// Create a materializer writing to the system temp directory
    #[must_use]
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// Stage files under `dir` instead
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Turn a raw input into a loadable file
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidInput`] if the input is absent, an empty
    /// model, or literal content that fails its grammar check, and
    /// [`PolicyError::Staging`] if the temporary file cannot be written.
    pub fn materialize(
        &self,
        role: InputRole,
        raw: Option<&str>,
    ) -> Result<MaterializedInput, PolicyError> {
        let raw = raw.ok_or_else(|| PolicyError::invalid("input cannot be null"))?;

        if raw.trim().is_empty() {
            return match role {
                InputRole::Model => Err(PolicyError::invalid("model content cannot be empty")),
                InputRole::Policy => self.stage(role, ""),
            };
        }

        match PolicyInputSpec::classify(role, raw).source {
            InputSource::FilePath(path) => {
                tracing::debug!(%role, path = %path.display(), "using input file as-is");
                Ok(MaterializedInput::Existing(path))
            }
            InputSource::InlineContent(content) => {
                validate(role, &content)?;
                self.stage(role, &unescape_lines(&content))
            }
        }
    }

    fn stage(&self, role: InputRole, content: &str) -> Result<MaterializedInput, PolicyError> {
        let staging_err = |e: std::io::Error| PolicyError::Staging {
            role,
            message: e.to_string(),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("warden-").suffix(".conf");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(staging_err)?;

        file.write_all(content.as_bytes()).map_err(staging_err)?;
        file.flush().map_err(staging_err)?;

        let temp = file.into_temp_path();
        tracing::debug!(%role, path = %temp.display(), bytes = content.len(), "staged inline input");
        Ok(MaterializedInput::Staged(temp))
    }
}

/// Replace every line escape with a newline
#[must_use]
pub fn unescape_lines(content: &str) -> String {
    content.replace(LINE_ESCAPE, "\n")
}

/// Check literal content against the grammar for its role
///
/// # Errors
///
/// Returns [`PolicyError::InvalidInput`] naming the first problem found
pub fn validate(role: InputRole, content: &str) -> Result<(), PolicyError> {
    match role {
        InputRole::Model => validate_model(content),
        InputRole::Policy => validate_policy(content),
    }
}

fn validate_model(content: &str) -> Result<(), PolicyError> {
    let missing: Vec<&str> = REQUIRED_MODEL_SECTIONS
        .iter()
        .copied()
        .filter(|section| !content.contains(*section))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::invalid(format!(
            "invalid model format: missing {}",
            missing.join(", ")
        )))
    }
}

fn validate_policy(content: &str) -> Result<(), PolicyError> {
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || POLICY_LINE_PREFIXES.iter().any(|p| line.starts_with(*p)) {
            continue;
        }
        return Err(PolicyError::invalid(format!(
            "invalid policy format: line {} does not start with one of {}",
            index + 1,
            POLICY_LINE_PREFIXES.join(" ")
        )));
    }
    Ok(())
}
