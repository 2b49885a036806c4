//! Error type shared by every stage of the engine.
//!
//! Failed property computations are memoized like successful ones, so
//! [`Error`] is cheap to clone and carries its own context trail instead of
//! relying on a backtrace.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ErrorKind {
    #[error("unresolved reference `{path}` in `{key}`")]
    UnresolvedReference { path: String, key: String },

    #[error("reference `{path}` in `{key}` has no segment `{segment}` in scope `{scope}`")]
    MissingSegment {
        path: String,
        key: String,
        segment: String,
        scope: String,
    },

    #[error("scope `{scope}` has no property `{name}`")]
    NoSuchProperty { scope: String, name: String },

    #[error("cyclic evaluation of `{scope}`")]
    CyclicEvaluation { scope: String },

    #[error("scope `{scope}` mixes scalar values with named properties ({properties})")]
    MixedPrimitiveProperty { scope: String, properties: String },

    #[error("scope `{scope}` has {count} scalar values, expected exactly one")]
    AmbiguousScalar { scope: String, count: usize },

    #[error("scope `{scope}` composes {bases} base definitions with {patches} patches, expected exactly one base")]
    AmbiguousMerge {
        scope: String,
        bases: usize,
        patches: usize,
    },

    #[error("patch `{patch}` cannot be applied to the {base} base of `{scope}`")]
    IncompatiblePatch {
        scope: String,
        patch: String,
        base: &'static str,
    },

    #[error("malformed reference in `{key}`: {message}")]
    MalformedReference { key: String, message: String },

    #[error("unsupported source value in `{origin}`: {message}")]
    UnsupportedSource { origin: String, message: String },

    #[error("failed to load `{}`: {message}", path.display())]
    Source { path: PathBuf, message: String },

    #[error("resource `{resource}` failed: {message}")]
    Adapter { resource: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// An [`ErrorKind`] plus the trail of contexts it propagated through,
/// innermost first.
#[derive(Clone, PartialEq)]
pub struct Error(Arc<Inner>);

#[derive(Debug, Clone, PartialEq)]
struct Inner {
    kind: ErrorKind,
    trail: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self(Arc::new(Inner {
            kind,
            trail: Vec::new(),
        }))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    pub fn trail(&self) -> &[String] {
        &self.0.trail
    }

    /// Appends one context line. Clones the payload only when it is shared.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.0).trail.push(context.into());
        self
    }

    /// Shorthand for adapters reporting a failure of their own.
    pub fn adapter(resource: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Adapter {
            resource: resource.into(),
            message: message.to_string(),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.kind)?;
        for context in &self.0.trail {
            write!(f, "\n  {context}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.0.kind)
            .field("trail", &self.0.trail)
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0.kind)
    }
}

/// Context wrapping for engine results.
pub trait ErrorContext<T> {
    fn context<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|error| error.with_context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_trail_accumulates_innermost_first() {
        let result: Result<()> = Err(ErrorKind::CyclicEvaluation {
            scope: "a.b".into(),
        }
        .into());
        let error = result
            .context(|| "while evaluating `a.b`")
            .context(|| "while evaluating `a`")
            .unwrap_err();

        assert_eq!(error.trail(), ["while evaluating `a.b`", "while evaluating `a`"]);
        assert!(matches!(error.kind(), ErrorKind::CyclicEvaluation { .. }));
        assert_eq!(
            error.to_string(),
            "cyclic evaluation of `a.b`\n  while evaluating `a.b`\n  while evaluating `a`"
        );
    }

    #[test]
    fn shared_errors_are_not_mutated_by_context() {
        let original = Error::new(ErrorKind::Config("bad".into()));
        let cached = original.clone();
        let wrapped = original.with_context("outer");

        assert!(cached.trail().is_empty());
        assert_eq!(wrapped.trail(), ["outer"]);
    }
}
