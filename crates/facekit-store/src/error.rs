use facekit_core::EncoderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened or read.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] rusqlite::Error),
    /// A stored row could not be decoded.
    #[error("corrupt store record: {0}")]
    Corrupt(String),
    /// A write did not complete.
    #[error("persistence failed: {0}")]
    Persistence(#[source] rusqlite::Error),
    #[error("no face detected in registration image")]
    NoFaceDetected,
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
