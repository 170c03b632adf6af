use crate::annotate::Annotator;
use crate::error::SessionError;
use facekit_core::{
    is_valid_threshold, Encoder, EuclideanMatcher, Gallery, MatchResult, Matcher, Region, Verification,
};
use facekit_store::{HistoryLog, HistoryRecord, ImportReport, ReferenceEntry, Registry};
use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// One face of a recognized image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedFace {
    pub region: Region,
    pub result: MatchResult,
}

/// Output of [`RecognitionSession::recognize`].
pub struct Recognition {
    pub annotated: RgbImage,
    /// In encoder order.
    pub faces: Vec<RecognizedFace>,
}

impl Recognition {
    pub fn results(&self) -> impl Iterator<Item = &MatchResult> {
        self.faces.iter().map(|f| &f.result)
    }
}

/// Caller-owned recognition context.
///
/// The gallery is loaded once at [`open`](Self::open) and replaced only by
/// [`reload`](Self::reload). Concurrent recognitions each work on an
/// `Arc` snapshot, so a reload never exposes a half-built gallery.
pub struct RecognitionSession<E> {
    encoder: Mutex<E>,
    matcher: EuclideanMatcher,
    registry: Registry,
    history: HistoryLog,
    gallery: RwLock<Arc<Gallery>>,
    annotator: Annotator,
}

impl<E: Encoder> RecognitionSession<E> {
    pub fn open(
        encoder: E,
        registry: Registry,
        history: HistoryLog,
        annotator: Annotator,
    ) -> Result<Self, SessionError> {
        let matcher = EuclideanMatcher::new(encoder.metric());
        let gallery = registry.load()?;
        tracing::info!(
            entries = gallery.len(),
            acceptance_radius = matcher.metric().acceptance_radius,
            "recognition session opened"
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            matcher,
            registry,
            history,
            gallery: RwLock::new(Arc::new(gallery)),
            annotator,
        })
    }

    /// Rebuild the gallery from the registry and swap it in.
    /// Returns the new entry count.
    pub fn reload(&self) -> Result<usize, SessionError> {
        let gallery = Arc::new(self.registry.load()?);
        let entries = gallery.len();
        *self.gallery.write().unwrap_or_else(PoisonError::into_inner) = gallery;
        tracing::info!(entries, "gallery reloaded");
        Ok(entries)
    }

    /// Current gallery snapshot.
    pub fn gallery(&self) -> Arc<Gallery> {
        Arc::clone(&self.gallery.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    fn encoder(&self) -> MutexGuard<'_, E> {
        self.encoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the first face in `image`. The gallery is not reloaded.
    pub fn enroll(
        &self,
        identity: &str,
        image: &DynamicImage,
        source_ref: Option<&str>,
    ) -> Result<ReferenceEntry, SessionError> {
        let mut encoder = self.encoder();
        Ok(self.registry.add(&mut *encoder, identity, image, source_ref)?)
    }

    /// Register every image in a directory. The gallery is not reloaded.
    pub fn import_dir(&self, dir: &Path) -> Result<ImportReport, SessionError> {
        let mut encoder = self.encoder();
        Ok(self.registry.import_dir(&mut *encoder, dir)?)
    }

    /// Recognize every face in `image`.
    ///
    /// `threshold` is a normalized distance cutoff applied on top of the
    /// encoder's acceptance radius. Every detected face, known or not, is
    /// appended to the history in a single transaction; if that write fails
    /// nothing is logged and the error is returned.
    pub fn recognize(&self, image: &DynamicImage, threshold: f64) -> Result<Recognition, SessionError> {
        if !is_valid_threshold(threshold) {
            return Err(SessionError::InvalidThreshold(threshold));
        }

        let detected = self.encoder().detect_and_encode(image)?;
        let gallery = self.gallery();

        let faces: Vec<RecognizedFace> = detected
            .into_iter()
            .map(|face| RecognizedFace {
                region: face.region,
                result: self.matcher.compare(&face.embedding, &gallery, threshold),
            })
            .collect();

        let annotated = self.annotator.annotate(image, &faces);

        let records: Vec<HistoryRecord> = faces
            .iter()
            .map(|face| HistoryRecord::now(face.result.label(), face.result.confidence))
            .collect();
        self.history.append_all(&records)?;

        tracing::info!(
            faces = faces.len(),
            known = faces.iter().filter(|f| f.result.is_known()).count(),
            gallery = gallery.len(),
            "recognition finished"
        );

        Ok(Recognition { annotated, faces })
    }

    /// Compare the first face of each image.
    pub fn verify(&self, first: &DynamicImage, second: &DynamicImage) -> Result<Verification, SessionError> {
        let mut encoder = self.encoder();
        let a = encoder
            .detect_and_encode(first)?
            .into_iter()
            .next()
            .ok_or(SessionError::NoFaceDetected)?;
        let b = encoder
            .detect_and_encode(second)?
            .into_iter()
            .next()
            .ok_or(SessionError::NoFaceDetected)?;

        let metric = encoder.metric();
        let distance = metric.distance(&a.embedding, &b.embedding);
        let verified = encoder.is_match(&a.embedding, &b.embedding);
        tracing::info!(verified, distance, "verification finished");

        Ok(Verification { verified, distance })
    }
}
