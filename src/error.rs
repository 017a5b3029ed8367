use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Token request for scope '{scope}' failed: {message}")]
    Auth { scope: String, message: String },

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} {url} returned status {status}")]
    UnexpectedStatus {
        method: &'static str,
        url: String,
        status: StatusCode,
    },

    #[error("Missing Docker-Content-Digest header for {repo}:{tag}")]
    MissingDigest { repo: String, tag: String },

    #[error("Malformed manifest for {repo}:{tag}: {message}")]
    MalformedManifest {
        repo: String,
        tag: String,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("--single-tag cannot be combined with --preserve-tag")]
    ConflictingProtection,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
