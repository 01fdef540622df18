use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error taxonomy shared by every collaborator and reconciliation loop.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous state: found {count} {kind} entries matching '{key}'")]
    Ambiguous {
        kind: &'static str,
        key: String,
        count: usize,
    },

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Treat `NotFound` as an absent value rather than a failure.
pub trait OptionalExt<T> {
    fn optional(self) -> ConnectorResult<Option<T>>;
}

impl<T> OptionalExt<T> for ConnectorResult<T> {
    fn optional(self) -> ConnectorResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ConnectorError {
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn ambiguous(kind: &'static str, key: impl Into<String>, count: usize) -> Self {
        Self::Ambiguous {
            kind,
            key: key.into(),
            count,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// Whether the next periodic pass may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// A failure attributed to one entity (identity, tenant, device, ...).
#[derive(Debug, Clone)]
pub struct EntityError {
    pub entity: String,
    pub error: ConnectorError,
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.error)
    }
}

/// Errors collected by a batch pass. A batch never stops at the first
/// failure; every entity's outcome ends up here.
#[derive(Debug, Clone, Default)]
pub struct AggregateError {
    errors: Vec<EntityError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(entity: impl Into<String>, error: ConnectorError) -> Self {
        let mut agg = Self::new();
        agg.push(entity, error);
        agg
    }

    pub fn push(&mut self, entity: impl Into<String>, error: ConnectorError) {
        self.errors.push(EntityError {
            entity: entity.into(),
            error,
        });
    }

    pub fn merge(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[EntityError] {
        &self.errors
    }

    /// Find the error recorded for a given entity, if any.
    pub fn for_entity(&self, entity: &str) -> Option<&ConnectorError> {
        self.errors
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| &e.error)
    }

    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<Result<(), AggregateError>> for AggregateError {
    fn from(result: Result<(), AggregateError>) -> Self {
        result.err().unwrap_or_default()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n  {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
