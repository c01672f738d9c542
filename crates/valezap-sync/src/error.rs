use std::path::PathBuf;

use thiserror::Error;

/// Failures on the three network channels.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("live stream failed: {0}")]
    Stream(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Transport(_) | SyncError::Status { .. } => "TRANSPORT_FAILURE",
            SyncError::Stream(_) => "STREAM_FAILURE",
            SyncError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid server url `{0}`: expected an http:// or https:// base url")]
    InvalidServerUrl(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
