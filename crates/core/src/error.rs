#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid configuration for {var}: {reason}")]
    Config { var: &'static str, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown job kind: {0}")]
    UnknownKind(String),
}
