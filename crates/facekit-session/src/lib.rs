//! facekit-session — recognition against a registered gallery.
//!
//! A [`RecognitionSession`] owns the encoder, the stores and an immutable
//! gallery snapshot. Callers reload the snapshot explicitly after enrolling.

pub mod annotate;
pub mod error;
pub mod session;

pub use annotate::Annotator;
pub use error::SessionError;
pub use session::{Recognition, RecognitionSession, RecognizedFace};
