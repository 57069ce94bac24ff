//! Error types for the synchronization pipeline.

use std::fmt;

use thiserror::Error;

/// The remote call a [`SyncError::Service`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Metadata,
    QueryIds,
    QueryFeatures,
    ApplyEdits,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Metadata => "metadata",
            Operation::QueryIds => "query_ids",
            Operation::QueryFeatures => "query_features",
            Operation::ApplyEdits => "apply_edits",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a feature-service call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceErrorKind {
    #[error("HTTP {0}")]
    Status(u16),
    /// An `{"error": {...}}` object inside an otherwise successful response.
    #[error("service error {code}: {message}")]
    Payload { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
}

impl ServiceErrorKind {
    /// 498 is an invalid or expired token, 499 a missing one.
    pub fn is_token_rejection(&self) -> bool {
        matches!(self, ServiceErrorKind::Payload { code: 498 | 499, .. })
            || matches!(self, ServiceErrorKind::Status(498 | 499))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ServiceErrorKind::Transport(_) | ServiceErrorKind::Timeout => true,
            ServiceErrorKind::Status(code) => *code >= 500 || *code == 429,
            ServiceErrorKind::Payload { .. } | ServiceErrorKind::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("{operation} request failed: {kind}")]
    Service {
        operation: Operation,
        #[source]
        kind: ServiceErrorKind,
    },

    #[error("observation fetch failed: {message}")]
    UpstreamFetch { message: String },
}

impl SyncError {
    pub fn auth(message: impl Into<String>) -> Self {
        SyncError::Auth {
            message: message.into(),
        }
    }

    pub fn service(operation: Operation, kind: ServiceErrorKind) -> Self {
        SyncError::Service { operation, kind }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        SyncError::UpstreamFetch {
            message: message.into(),
        }
    }

    /// Pipeline stage that produced the error, as shown in reports.
    pub fn stage(&self) -> &'static str {
        match self {
            SyncError::Auth { .. } => "authenticate",
            SyncError::Service { operation, .. } => operation.as_str(),
            SyncError::UpstreamFetch { .. } => "observations",
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
