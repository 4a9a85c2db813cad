use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridSightError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export IO error: {0}")]
    ExportIo(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl serde::Serialize for GridSightError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type GridSightResult<T> = Result<T, GridSightError>;
