//! Draw recognition results onto a copy of the probe image.

use crate::error::SessionError;
use crate::session::RecognizedFace;
use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_PADDING: u32 = 2;
const DEFAULT_LABEL_HEIGHT: f32 = 18.0;

/// Draws a box per face and a label band with the identity.
///
/// Label text needs a TrueType/OpenType font; without one only the band is
/// drawn.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(DEFAULT_LABEL_HEIGHT),
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path).map_err(|e| SessionError::Font(format!("{}: {e}", path.display())))?;
        Self::with_font_bytes(bytes)
    }

    pub fn with_font_bytes(bytes: Vec<u8>) -> Result<Self, SessionError> {
        let font = FontVec::try_from_vec(bytes).map_err(|e| SessionError::Font(e.to_string()))?;
        Ok(Self {
            font: Some(font),
            ..Self::default()
        })
    }

    pub fn label_height(mut self, px: f32) -> Self {
        self.scale = PxScale::from(px);
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Return an annotated copy of `image`.
    pub fn annotate(&self, image: &DynamicImage, faces: &[RecognizedFace]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        if canvas.width() == 0 || canvas.height() == 0 {
            return canvas;
        }

        for face in faces {
            let color = if face.result.is_known() { MATCH_COLOR } else { UNKNOWN_COLOR };
            let region = face.region;

            for inset in 0..BOX_THICKNESS {
                let w = region.width().saturating_sub(2 * inset).max(1);
                let h = region.height().saturating_sub(2 * inset).max(1);
                let rect = Rect::at((region.left + inset) as i32, (region.top + inset) as i32).of_size(w, h);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            let label = match &face.result.identity {
                Some(identity) => format!("{identity} {:.2}", face.result.confidence),
                None => face.result.label().to_string(),
            };
            self.draw_label(&mut canvas, face, &label, color);
        }

        canvas
    }

    /// Label band sits above the box, or just inside it when the box
    /// touches the top edge.
    fn draw_label(&self, canvas: &mut RgbImage, face: &RecognizedFace, label: &str, color: Rgb<u8>) {
        let band_h = self.scale.y.ceil() as u32 + 2 * LABEL_PADDING;
        let band_w = face.region.width().max(1);
        let top = if face.region.top >= band_h {
            face.region.top - band_h
        } else {
            face.region.top
        };

        let band = Rect::at(face.region.left as i32, top as i32).of_size(band_w, band_h);
        draw_filled_rect_mut(canvas, band, color);

        if let Some(font) = &self.font {
            let x = (face.region.left + LABEL_PADDING) as i32;
            let y = (top + LABEL_PADDING) as i32;
            draw_text_mut(canvas, TEXT_COLOR, x, y, self.scale, font, label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facekit_core::{MatchResult, Region};

    fn face(region: Region, identity: Option<&str>) -> RecognizedFace {
        RecognizedFace {
            region,
            result: MatchResult {
                identity: identity.map(str::to_owned),
                confidence: if identity.is_some() { 0.9 } else { 0.0 },
            },
        }
    }

    fn gray(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([128, 128, 128])))
    }

    #[test]
    fn test_box_colors() {
        let image = gray(200, 200);
        let faces = vec![
            face(Region::new(50, 90, 90, 40), Some("alice")),
            face(Region::new(120, 180, 180, 130), None),
        ];
        let out = Annotator::new().annotate(&image, &faces);

        assert_eq!(out.dimensions(), (200, 200));
        assert_eq!(*out.get_pixel(40, 70), MATCH_COLOR);
        assert_eq!(*out.get_pixel(130, 150), UNKNOWN_COLOR);
        // Interior untouched.
        assert_eq!(*out.get_pixel(65, 70), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_label_band_above_box() {
        let image = gray(200, 200);
        let faces = vec![face(Region::new(100, 150, 150, 50), Some("alice"))];
        let out = Annotator::new().annotate(&image, &faces);
        // Band spans the rows just above the box.
        assert_eq!(*out.get_pixel(100, 90), MATCH_COLOR);
        assert_eq!(*out.get_pixel(100, 60), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_label_band_inside_when_at_top_edge() {
        let image = gray(100, 100);
        let faces = vec![face(Region::new(0, 80, 60, 20), None)];
        let out = Annotator::new().annotate(&image, &faces);
        assert_eq!(*out.get_pixel(50, 5), UNKNOWN_COLOR);
    }

    #[test]
    fn test_source_image_unchanged() {
        let image = gray(64, 64);
        let _ = Annotator::new().annotate(&image, &[face(Region::new(10, 40, 40, 10), None)]);
        assert!(image.to_rgb8().pixels().all(|p| *p == Rgb([128, 128, 128])));
    }

    #[test]
    fn test_no_faces_is_plain_copy() {
        let image = gray(32, 16);
        let out = Annotator::new().annotate(&image, &[]);
        assert_eq!(out, image.to_rgb8());
    }

    #[test]
    fn test_invalid_font_rejected() {
        let err = Annotator::with_font_bytes(vec![0, 1, 2, 3]).err().unwrap();
        assert!(matches!(err, SessionError::Font(_)));
        assert!(!Annotator::new().has_font());
    }
}
