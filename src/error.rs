//! Error types for the telemetry hub

/// Result type alias
pub type Result<T> = std::result::Result<T, HubError>;

/// Hub error types
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Session is not in the admin set
    #[error("not authenticated")]
    NotAuthenticated,

    /// Presented admin secret does not match the bound one
    #[error("invalid admin secret")]
    InvalidAdminSecret,

    /// Serial port error
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// Port operations requested but no acquisition loop is attached
    #[error("acquisition source not available")]
    AcquisitionUnavailable,
}
