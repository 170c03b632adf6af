use serde::{Deserialize, Serialize};

/// Label used for faces that did not match any registered identity.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimensionality are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        if self.values.len() != other.values.len() {
            return f64::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Encode as packed little-endian `f64` bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode packed little-endian `f64` bytes. Returns `None` when the
    /// length is not a multiple of eight.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Some(Self { values })
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Face region in pixel coordinates, edges ordered (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl Region {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Build a region from floating point corners, clamped to the image bounds.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let clamp = |v: f32, max: f32| v.round().clamp(0.0, max) as u32;
        Self {
            top: clamp(y1.min(y2), max_y),
            right: clamp(x1.max(x2), max_x),
            bottom: clamp(y1.max(y2), max_y),
            left: clamp(x1.min(x2), max_x),
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// A face found by an encoder: where it is and what it looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: Region,
    pub embedding: Embedding,
}

/// In-memory gallery of reference embeddings.
///
/// Holds two index-aligned sequences: `embeddings[i]` belongs to
/// `identities[i]`. Order is registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    embeddings: Vec<Embedding>,
    identities: Vec<String>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            embeddings: Vec::with_capacity(capacity),
            identities: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, identity: impl Into<String>, embedding: Embedding) {
        self.identities.push(identity.into());
        self.embeddings.push(embedding);
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.identities
            .iter()
            .map(String::as_str)
            .zip(self.embeddings.iter())
    }
}

impl<S: Into<String>> FromIterator<(S, Embedding)> for Gallery {
    fn from_iter<I: IntoIterator<Item = (S, Embedding)>>(iter: I) -> Self {
        let mut gallery = Gallery::new();
        for (identity, embedding) in iter {
            gallery.push(identity, embedding);
        }
        gallery
    }
}

/// Outcome of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched identity, `None` when the face is unknown.
    pub identity: Option<String>,
    /// `1 - normalized distance` for a match, `0.0` otherwise.
    pub confidence: f64,
}

impl MatchResult {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            confidence: 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Identity label, `"unknown"` for unmatched faces.
    pub fn label(&self) -> &str {
        self.identity.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }
}

/// Result of comparing the faces in two images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    /// Normalized distance between the first face of each image.
    pub distance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_embedding_bytes_rejects_truncated_blob() {
        let bytes = Embedding::new(vec![0.25, -1.5]).to_le_bytes();
        assert_eq!(bytes.len(), 16);
        assert!(Embedding::from_le_bytes(&bytes[..15]).is_none());
        assert_eq!(
            Embedding::from_le_bytes(&bytes).unwrap().values,
            vec![0.25, -1.5]
        );
    }

    #[test]
    fn test_region_from_corners_clamps() {
        let r = Region::from_corners(-5.0, 10.4, 120.0, 60.6, 100, 50);
        assert_eq!(r, Region::new(10, 99, 49, 0));
        assert_eq!(r.width(), 99);
        assert_eq!(r.height(), 39);
    }

    #[test]
    fn test_gallery_stays_aligned() {
        let gallery: Gallery = vec![
            ("alice", Embedding::new(vec![1.0])),
            ("bob", Embedding::new(vec![2.0])),
        ]
        .into_iter()
        .collect();

        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.identities(), &["alice".to_string(), "bob".to_string()]);
        assert_eq!(gallery.embeddings()[1].values, vec![2.0]);
        let pairs: Vec<_> = gallery.iter().map(|(id, e)| (id, e.values[0])).collect();
        assert_eq!(pairs, vec![("alice", 1.0), ("bob", 2.0)]);
    }

    #[test]
    fn test_match_result_label() {
        assert_eq!(MatchResult::unknown().label(), UNKNOWN_IDENTITY);
        let m = MatchResult {
            identity: Some("alice".into()),
            confidence: 0.9,
        };
        assert!(m.is_known());
        assert_eq!(m.label(), "alice");
    }
}
