use parlor_db::StoreError;
use parlor_types::api::Envelope;
use thiserror::Error;

/// Every way an action can fail. All of them end up as a failure envelope;
/// none reach the transport.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required field was missing or blank.
    #[error("{0}")]
    Validation(String),

    #[error("no file selected")]
    NoFile,

    #[error("file too large, maximum is {} MB", .max / (1024 * 1024))]
    TooLarge { max: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The store or the filesystem failed after validation passed.
    #[error("storage failure: {0}")]
    Persistence(String),

    #[error("unknown action")]
    UnknownAction(String),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ChatError {
    pub fn to_envelope(&self) -> Envelope {
        let envelope = Envelope::failure(self.to_string());
        match self {
            Self::UnknownAction(action) => envelope.with("received_action", action.as_str()),
            _ => envelope,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(reason) => Self::Validation(reason),
            other => Self::Persistence(other.to_string()),
        }
    }
}
