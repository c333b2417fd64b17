use store_api::StoreError;
use thiserror::Error;

/// Failures surfaced to the panel that triggered them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Input rejected before any store call.
    #[error("{0}")]
    Validation(&'static str),
    /// The mutation target no longer exists; refresh from the next snapshot.
    #[error("not found: {0}")]
    NotFound(String),
    /// Store call or listener failed.
    #[error("{0}")]
    Transport(String),
    #[error("only the author may change this note")]
    Forbidden,
    #[error("unknown room: {0}")]
    UnknownRoom(String),
    #[error("not signed in")]
    IdentityLost,
    #[error("room session is no longer active")]
    Inactive,
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => RoomError::NotFound(what),
            other => RoomError::Transport(other.to_string()),
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
