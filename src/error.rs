use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {value}")]
    InvalidField { field: String, value: String },

    #[error("{field} out of valid range: {value}")]
    OutOfRange { field: String, value: f64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Processing error: {message}")]
    Processing { message: String },
}

impl PipelineError {
    /// Short class name recorded in structured error records.
    pub fn class_name(&self) -> &'static str {
        match self {
            PipelineError::Json(_) => "Json",
            PipelineError::Toml(_) => "Toml",
            PipelineError::Io(_) => "Io",
            PipelineError::Config(_) => "Config",
            PipelineError::MissingField(_) => "MissingField",
            PipelineError::InvalidField { .. } => "InvalidField",
            PipelineError::OutOfRange { .. } => "OutOfRange",
            PipelineError::Storage(_) => "Storage",
            PipelineError::NotFound(_) => "NotFound",
            PipelineError::Notification(_) => "Notification",
            PipelineError::Processing { .. } => "Processing",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
