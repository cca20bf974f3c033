//! Error types for rivven-provision
//!
//! Errors are classified so callers can decide whether a failed
//! reconciliation is worth running again:
//! - Retriable errors (connection loss, lock acquisition, transaction aborts)
//! - Non-retriable errors (unsupported features, validation, constraints)
//!
//! Nothing in this crate retries on its own.

use std::fmt;
use thiserror::Error;

/// Result type for rivven-provision operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Statement,
    /// Transaction errors (retriable)
    Transaction,
    /// Advisory lock could not be taken (retriable)
    Lock,
    /// Catalog row absent
    NotFound,
    /// Server version lacks a required capability
    UnsupportedFeature,
    /// Operation would violate an engine constraint
    Constraint,
    /// Desired state failed validation
    Validation,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Transaction | Self::Lock)
    }
}

/// Main error type for rivven-provision
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A statement was rejected by the server
    #[error("{context}: {message}")]
    Statement {
        context: String,
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Role lock could not be acquired
    #[error("could not lock role {role:?}: {message}")]
    Lock { role: String, message: String },

    /// Database not present in the catalog
    #[error("database {database:?} not found")]
    NotFound { database: String },

    /// The connected server does not support a requested attribute
    #[error("PostgreSQL server {version} does not support {feature}")]
    UnsupportedFeature { feature: String, version: String },

    /// Engine constraint would be violated
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    /// Desired state is invalid
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Statement { .. } => ErrorCategory::Statement,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Lock { .. } => ErrorCategory::Lock,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::UnsupportedFeature { .. } => ErrorCategory::UnsupportedFeature,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a statement error without context
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            context: "statement failed".into(),
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a statement error carrying the rejected SQL
    pub fn statement_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Statement {
            context: "statement failed".into(),
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lock acquisition error
    pub fn lock(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lock {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(database: impl Into<String>) -> Self {
        Self::NotFound {
            database: database.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl fmt::Display, version: impl fmt::Display) -> Self {
        Self::UnsupportedFeature {
            feature: feature.to_string(),
            version: version.to_string(),
        }
    }

    /// Create a constraint violation error
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Prefix a statement error with the operation that issued it.
    ///
    /// Other variants are returned unchanged.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Statement {
                message,
                sql,
                source,
                ..
            } => Self::Statement {
                context: context.into(),
                message,
                sql,
                source,
            },
            other => other,
        }
    }

    /// SQL text attached to a statement error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Statement { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => format!("{}: {}", field, msg),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        Self::validation(messages.join("; "))
    }
}

/// Combine the outcome of a primary operation with the outcome of its cleanup.
///
/// The primary error always wins. A cleanup error is only reported when the
/// primary operation succeeded; when both fail the cleanup error is logged
/// and dropped.
pub fn with_cleanup<T>(primary: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (primary, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(primary_err), Ok(())) => Err(primary_err),
        (Err(primary_err), Err(cleanup_err)) => {
            tracing::warn!(
                error = %cleanup_err,
                primary = %primary_err,
                "cleanup failed after a failed operation"
            );
            Err(primary_err)
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Statement => write!(f, "statement"),
            Self::Transaction => write!(f, "transaction"),
            Self::Lock => write!(f, "lock"),
            Self::NotFound => write!(f, "not_found"),
            Self::UnsupportedFeature => write!(f, "unsupported_feature"),
            Self::Constraint => write!(f, "constraint"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}
