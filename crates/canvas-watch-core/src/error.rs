use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanvasWatchError {
    #[error("Installation name unavailable: no configured name and no device name")]
    InstallationNameUnavailable,

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {path}")]
    Http { status: u16, path: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for CanvasWatchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl CanvasWatchError {
    /// Identity-resolution failures are surfaced to callers; everything else
    /// is treated as "try again later".
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::InstallationNameUnavailable | Self::ClientNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CanvasWatchError>;
