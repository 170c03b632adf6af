//! The encoder contract: find faces in an image and embed each one.

use crate::matcher::DistanceMetric;
use crate::types::{DetectedFace, Embedding};
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face detector plus embedding extractor.
///
/// Implementations return faces in their own detection order. Embeddings
/// from one encoder are only comparable with embeddings from the same
/// encoder, under its [`DistanceMetric`].
pub trait Encoder {
    /// Detect every face in `image` and compute its embedding.
    fn detect_and_encode(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EncoderError>;

    /// Distance space of this encoder's embeddings.
    fn metric(&self) -> DistanceMetric;

    /// Pairwise same-person test under the encoder's acceptance radius.
    fn is_match(&self, a: &Embedding, b: &Embedding) -> bool {
        self.metric().is_match(a, b)
    }
}

impl<E: Encoder + ?Sized> Encoder for Box<E> {
    fn detect_and_encode(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EncoderError> {
        (**self).detect_and_encode(image)
    }

    fn metric(&self) -> DistanceMetric {
        (**self).metric()
    }

    fn is_match(&self, a: &Embedding, b: &Embedding) -> bool {
        (**self).is_match(a, b)
    }
}

/// Decode an in-memory image (JPEG, PNG, ...).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EncoderError> {
    image::load_from_memory(bytes).map_err(|e| EncoderError::Decode(e.to_string()))
}

/// Open and decode an image file.
pub fn open_image(path: &Path) -> Result<DynamicImage, EncoderError> {
    image::open(path).map_err(|e| EncoderError::Decode(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(matches!(err, EncoderError::Decode(_)));
    }

    #[test]
    fn test_decode_png_roundtrip() {
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(4, 3)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(buf.get_ref()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_open_missing_file_is_decode_error() {
        let err = open_image(Path::new("/nonexistent/face.jpg")).unwrap_err();
        assert!(matches!(err, EncoderError::Decode(_)));
    }
}
