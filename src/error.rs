use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the local model endpoint.
///
/// Malformed model output is not an error: it degrades to a chat reply.
#[derive(Debug, Error)]
pub enum LanguageModelError {
    #[error("could not reach the model endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Ollama blocked the request (HTTP 403). Run: set OLLAMA_ORIGINS=\"*\" and restart Ollama")]
    Blocked,

    #[error("Ollama API error ({status})")]
    Http { status: u16 },

    #[error("unreadable response envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
}

/// The active tab could not be driven.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("no active tab")]
    NoActiveSurface,

    #[error("page not ready: {0}")]
    NotReady(String),

    #[error("page did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no local data directory available on this platform")]
    NoDataDir,
}

#[derive(Debug, Error)]
#[error("command cancelled")]
pub struct Cancelled;
