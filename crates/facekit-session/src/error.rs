use facekit_core::EncoderError;
use facekit_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),
    #[error("threshold {0} outside [0, 1]")]
    InvalidThreshold(f64),
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
    #[error("encoder error: {0}")]
    Encoder(#[source] EncoderError),
    #[error("cannot load label font: {0}")]
    Font(String),
}

impl From<EncoderError> for SessionError {
    fn from(err: EncoderError) -> Self {
        match err {
            EncoderError::Decode(reason) => SessionError::Decode(reason),
            other => SessionError::Encoder(other),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoFaceDetected => SessionError::NoFaceDetected,
            StoreError::InvalidIdentity(identity) => SessionError::InvalidIdentity(identity),
            StoreError::Encoder(e) => e.into(),
            StoreError::Persistence(_) => SessionError::Persistence(err),
            StoreError::Unavailable(_) | StoreError::Corrupt(_) | StoreError::Io(_) => {
                SessionError::StoreUnavailable(err)
            }
        }
    }
}
