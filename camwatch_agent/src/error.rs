//! Error types shared by the local sampler and the remote cache.
//!
//! Every failure is attributable to one metric source; nothing here aborts a
//! whole collection pass.

use std::time::Duration;
use thiserror::Error;

/// Failure reading one local metric family (uptime, memory, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// File or syscall missing/unreadable.
    #[error("{source_name} unavailable at {path}: {reason}")]
    Unavailable {
        source_name: &'static str,
        path: String,
        reason: String,
    },
    /// The source answered but the data did not parse.
    #[error("{source_name}: malformed data: {detail}")]
    Parse {
        source_name: &'static str,
        detail: String,
    },
}

impl SourceError {
    pub fn unavailable(
        source_name: &'static str,
        path: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        SourceError::Unavailable {
            source_name,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(source_name: &'static str, detail: impl Into<String>) -> Self {
        SourceError::Parse {
            source_name,
            detail: detail.into(),
        }
    }

    pub fn source_name(&self) -> &'static str {
        match self {
            SourceError::Unavailable { source_name, .. } | SourceError::Parse { source_name, .. } => {
                *source_name
            }
        }
    }
}

/// Classified failure of a remote fetch.
///
/// `Auth` is kept apart from the rest because it alone triggers the
/// credential-refresh retry in [`crate::cache::RemoteCache`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }

    /// Short label used for the `reason` field in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Timeout(_) => "timeout",
            FetchError::Auth(_) => "auth",
            FetchError::Malformed(_) => "malformed",
        }
    }
}

/// Outcome of a cache lookup that produced no value at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("no data available for {metric}: {cause}")]
    NoDataAvailable { metric: String, cause: FetchError },
}
