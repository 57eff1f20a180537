use std::time::Duration;

use thiserror::Error;

/// Failures raised while connecting to or talking with a tool adapter.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("adapter `{0}` is not running")]
    Stopped(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
