/// Result alias that carries the custom [`ShowSyncError`] type.
pub type Result<T> = std::result::Result<T, ShowSyncError>;

/// How a fault is handled by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Logged, output continues in a degraded form.
    Configuration,
    /// Retried on the next tick.
    Transient,
    /// Rejected and reported back to the caller without changing state.
    Rejected,
    /// Surfaced as a show-level failure; the scene does not start.
    Fatal,
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ShowSyncError {
    /// Malformed mapping, mismatched fixture channel count and similar
    /// problems in otherwise loadable show data.
    #[error("configuration fault: {0}")]
    Configuration(String),
    /// A send or decoder poll that may succeed on the next attempt.
    #[error("transient io fault: {0}")]
    TransientIo(String),
    /// A control command that is not valid in the current playback state.
    #[error("cannot {action} while {state}")]
    InvalidStateTransition {
        action: &'static str,
        state: &'static str,
    },
    /// An output sink that cannot be acquired at all.
    #[error("fatal resource fault: {0}")]
    FatalResource(String),
    /// A packet that does not decode as the expected wire format.
    #[error("protocol fault: {0}")]
    Protocol(String),
    /// Unknown scene, sequence or media id.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl ShowSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient<T: Into<String>>(msg: T) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn fatal<T: Into<String>>(msg: T) -> Self {
        Self::FatalResource(msg.into())
    }

    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn not_found<T: Into<String>>(what: T) -> Self {
        Self::NotFound(what.into())
    }

    /// Classifies the error for the absorb-or-propagate decision.
    pub fn class(&self) -> FaultClass {
        match self {
            Self::Configuration(_) | Self::NotFound(_) | Self::Json(_) => {
                FaultClass::Configuration
            }
            Self::TransientIo(_) | Self::Io(_) | Self::Protocol(_) => FaultClass::Transient,
            Self::InvalidStateTransition { .. } => FaultClass::Rejected,
            Self::FatalResource(_) | Self::Message(_) => FaultClass::Fatal,
        }
    }
}

impl From<&str> for ShowSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ShowSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
