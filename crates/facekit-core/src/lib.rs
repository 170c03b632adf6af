//! facekit-core — face data model, matching and the encoder contract.
//!
//! Detection and embedding extraction sit behind the [`Encoder`] trait. The
//! bundled [`OnnxEncoder`] drives SCRFD for detection and ArcFace for
//! embeddings through ONNX Runtime.

pub mod alignment;
pub mod attributes;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod onnx;
pub mod recognizer;
pub mod types;

pub use attributes::{parse_analysis, Attribute, AttributeError, Classification, FaceAnalysis};
pub use encoder::{decode_image, open_image, Encoder, EncoderError};
pub use matcher::{is_valid_threshold, DistanceMetric, EuclideanMatcher, Matcher};
pub use onnx::OnnxEncoder;
pub use types::{DetectedFace, Embedding, Gallery, MatchResult, Region, Verification, UNKNOWN_IDENTITY};
