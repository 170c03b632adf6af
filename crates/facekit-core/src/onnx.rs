//! [`Encoder`] backed by SCRFD detection and ArcFace embeddings.

use crate::alignment::align_face;
use crate::detector::FaceDetector;
use crate::encoder::{Encoder, EncoderError};
use crate::matcher::DistanceMetric;
use crate::recognizer::FaceRecognizer;
use crate::types::DetectedFace;
use image::DynamicImage;
use std::path::Path;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// ArcFace embeddings are unit vectors, so raw distances span [0, 2].
/// Halving maps them onto [0, 1]; 0.55 corresponds to cosine ≈ 0.40.
const ARCFACE_METRIC: DistanceMetric = DistanceMetric {
    scale: 0.5,
    acceptance_radius: 0.55,
};

pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `model_dir` (`det_10g.onnx`, `w600k_r50.onnx`).
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl Encoder for OnnxEncoder {
    fn detect_and_encode(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EncoderError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let detections = self.detector.detect(&rgb)?;
        tracing::debug!(faces = detections.len(), width, height, "faces detected");

        detections
            .iter()
            .map(|det| {
                let aligned = align_face(&rgb, &det.landmarks);
                Ok(DetectedFace {
                    region: det.region(width, height),
                    embedding: self.recognizer.embed(&aligned)?,
                })
            })
            .collect()
    }

    fn metric(&self) -> DistanceMetric {
        ARCFACE_METRIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    #[test]
    fn test_load_reports_missing_detector() {
        let err = OnnxEncoder::load(Path::new("/nonexistent/models")).err().unwrap();
        match err {
            EncoderError::ModelNotFound(path) => assert!(path.ends_with(SCRFD_MODEL_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_arcface_metric_bounds() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((ARCFACE_METRIC.distance(&a, &b) - 1.0).abs() < 1e-12);
        // cos = 0.5 → raw distance 1.0 → normalized 0.5
        let c = Embedding::new(vec![0.5, 0.75f64.sqrt()]);
        assert!(ARCFACE_METRIC.is_match(&a, &c));
        assert!(!ARCFACE_METRIC.is_match(&a, &b));
    }
}
