use std::path::PathBuf;

use thiserror::Error;

use crate::v1::ModelNotFoundDetail;

/// Failures while bootstrapping or supervising the API server.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(
        "'{binary}' is not installed or not on PATH. Install Ollama from https://ollama.ai/download"
    )]
    RuntimeNotInstalled { binary: String },

    #[error("Ollama is not running at {url} ({reason}). Start it with: ollama serve")]
    RuntimeNotRunning { url: String, reason: String },

    #[error(
        "Model '{model}' not found. To download this model, run: ollama pull {model} (see available models with: ollama list)"
    )]
    ModelMissing { model: String },

    #[error("Failed to create virtual environment at {}: {reason}", .path.display())]
    Venv { path: PathBuf, reason: String },

    #[error("Failed to install project dependencies: {0}")]
    Install(String),

    #[error("Failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server exited with {status}")]
    ServerExited { status: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures talking to the document API server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not connect to the API at {url}. Make sure the server is running")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("{}", .0.describe())]
    ModelNotFound(Box<ModelNotFoundDetail>),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn from_send(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            ClientError::Connect {
                url: url.to_string(),
                source: err,
            }
        } else {
            ClientError::Http(err)
        }
    }
}
