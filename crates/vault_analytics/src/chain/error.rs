//! Backend identity and adapter failures.

use super::cache::CacheError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which backend produced a result or an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Backend {
    pub kind: &'static str,
    pub location: String,
}

impl Backend {
    pub fn live_log(endpoint: impl fmt::Display) -> Self {
        Self {
            kind: "live-log",
            location: endpoint.to_string(),
        }
    }

    pub fn indexed_query(endpoint: impl fmt::Display) -> Self {
        Self {
            kind: "indexed-query",
            location: endpoint.to_string(),
        }
    }

    pub fn recorded(path: impl fmt::Display) -> Self {
        Self {
            kind: "recorded",
            location: path.to_string(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.location)
    }
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("{backend}: request: {source}")]
    Transport {
        backend: Backend,
        #[source]
        source: reqwest::Error,
    },
    #[error("{backend}: status {status}: {body}")]
    Status {
        backend: Backend,
        status: u16,
        body: String,
    },
    #[error("{backend}: rpc error {code}: {message}")]
    Rpc {
        backend: Backend,
        code: i64,
        message: String,
    },
    #[error("{backend}: query error: {message}")]
    Query { backend: Backend, message: String },
    #[error("{backend}: malformed response: {detail}")]
    Malformed { backend: Backend, detail: String },
    #[error("{backend}: precheck failed: {detail}")]
    Precheck { backend: Backend, detail: String },
    #[error("{backend}: cache: {source}")]
    Cache {
        backend: Backend,
        #[source]
        source: CacheError,
    },
    #[error("{backend}: offline mode: no cached response")]
    OfflineMiss { backend: Backend },
    #[error("{backend}: io: {source}")]
    Io {
        backend: Backend,
        #[source]
        source: std::io::Error,
    },
}

/// JSON-RPC "limit exceeded", returned by rate-limited providers.
const RPC_LIMIT_EXCEEDED: i64 = -32005;

impl AdapterError {
    pub fn backend(&self) -> &Backend {
        match self {
            Self::Transport { backend, .. }
            | Self::Status { backend, .. }
            | Self::Rpc { backend, .. }
            | Self::Query { backend, .. }
            | Self::Malformed { backend, .. }
            | Self::Precheck { backend, .. }
            | Self::Cache { backend, .. }
            | Self::OfflineMiss { backend }
            | Self::Io { backend, .. } => backend,
        }
    }

    /// Transport-level failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc { code, .. } => *code == RPC_LIMIT_EXCEEDED,
            _ => false,
        }
    }

    pub(crate) fn malformed(backend: &Backend, detail: impl fmt::Display) -> Self {
        Self::Malformed {
            backend: backend.clone(),
            detail: detail.to_string(),
        }
    }
}
