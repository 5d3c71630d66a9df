use thiserror::Error;

/// Failures surfaced by the notification job and the deployment script.
///
/// Everything except [`Error::DateParse`] is fatal for the run that raised it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Failed to parse due date {value:?}: {reason}")]
    DateParse { value: String, reason: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Provisioning error during {step}: {message}")]
    Provisioning { step: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn provisioning(step: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Provisioning {
            step,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
