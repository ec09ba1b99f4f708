//! Face region detection.
//!
//! [`FaceDetector`] is the seam the session layer consumes;
//! [`RustfaceDetector`] implements it with the SeetaFace cascade from the
//! `rustface` crate.
//!
//! # Obtaining Models
//!
//! The SeetaFace frontal model (`seeta_fd_frontal_v1.0.bin`) ships with the
//! rustface repository.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::frame::{to_luma_buffer, ImageAccess};
use crate::types::{BoundingBox, FaceRegion, Point};

/// Produces candidate face regions for an image.
pub trait FaceDetector {
    /// Regions in the detector's preferred order (usually by descending
    /// confidence). An image without faces yields an empty vector.
    fn detect<I: ImageAccess + ?Sized>(&self, image: &I) -> Vec<FaceRegion>;
}

impl<D: FaceDetector> FaceDetector for &D {
    fn detect<I: ImageAccess + ?Sized>(&self, image: &I) -> Vec<FaceRegion> {
        (**self).detect(image)
    }
}

/// The highest-confidence region; the earliest wins ties.
pub fn best_region(regions: &[FaceRegion]) -> Option<&FaceRegion> {
    regions.iter().fold(None, |best: Option<&FaceRegion>, r| match best {
        Some(b) if b.confidence >= r.confidence => Some(b),
        _ => Some(r),
    })
}

/// The region whose centre is nearest to `point`.
pub fn closest_region(regions: &[FaceRegion], point: Point) -> Option<&FaceRegion> {
    regions.iter().fold(None, |best: Option<&FaceRegion>, r| match best {
        Some(b) if b.bbox.center().distance(&point) <= r.bbox.center().distance(&point) => {
            Some(b)
        }
        _ => Some(r),
    })
}

const MIN_FACE_SIZE_FLOOR: u32 = 20;

/// SeetaFace frontal face detector.
pub struct RustfaceDetector {
    model: rustface::Model,
    min_face_size: u32,
    score_thresh: f64,
    pyramid_scale_factor: f32,
    slide_window_step: (u32, u32),
}

impl RustfaceDetector {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let model = rustface::read_model(reader)
            .map_err(|e| Error::Detector(format!("failed to load SeetaFace model: {e}")))?;
        Ok(Self {
            model,
            min_face_size: MIN_FACE_SIZE_FLOOR,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: (4, 4),
        })
    }

    /// Smallest face side in pixels. Values below 20 are raised to 20.
    pub fn min_face_size(mut self, size: u32) -> Self {
        if size < MIN_FACE_SIZE_FLOOR {
            warn!(size, "minimum face size below detector window, using 20");
        }
        self.min_face_size = size.max(MIN_FACE_SIZE_FLOOR);
        self
    }

    pub fn score_thresh(mut self, thresh: f64) -> Self {
        self.score_thresh = thresh;
        self
    }

    pub fn pyramid_scale_factor(mut self, factor: f32) -> Self {
        self.pyramid_scale_factor = factor;
        self
    }

    pub fn slide_window_step(mut self, step_x: u32, step_y: u32) -> Self {
        self.slide_window_step = (step_x, step_y);
        self
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect<I: ImageAccess + ?Sized>(&self, image: &I) -> Vec<FaceRegion> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_thresh);
        detector.set_pyramid_scale_factor(self.pyramid_scale_factor);
        detector.set_slide_window_step(self.slide_window_step.0, self.slide_window_step.1);

        let luma = to_luma_buffer(image);
        let faces = detector.detect(&rustface::ImageData::new(&luma, width, height));

        let mut regions: Vec<FaceRegion> = faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceRegion::new(
                    BoundingBox::new(
                        bbox.x() as f64,
                        bbox.y() as f64,
                        bbox.width() as f64,
                        bbox.height() as f64,
                    ),
                    face.score(),
                )
            })
            .collect();
        regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(faces = regions.len(), width, height, "face detection");
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f64, confidence: f64) -> FaceRegion {
        FaceRegion::new(BoundingBox::new(x, 0.0, 10.0, 10.0), confidence)
    }

    #[test]
    fn best_region_prefers_confidence_then_order() {
        let regions = [region(0.0, 1.0), region(50.0, 3.0), region(100.0, 3.0)];
        assert_eq!(best_region(&regions), Some(&regions[1]));
        assert_eq!(best_region(&[]), None);
    }

    #[test]
    fn closest_region_uses_centres() {
        let regions = [region(0.0, 5.0), region(50.0, 1.0), region(100.0, 2.0)];
        assert_eq!(
            closest_region(&regions, Point::new(60.0, 5.0)),
            Some(&regions[1])
        );
        assert_eq!(closest_region(&[], Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn missing_model_file_is_an_io_error() {
        let path = std::env::temp_dir().join("face_tracker_missing_seeta_model.bin");
        assert!(matches!(
            RustfaceDetector::from_file(path),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn corrupt_model_is_rejected() {
        let bytes: &[u8] = &[1, 2, 3];
        assert!(matches!(
            RustfaceDetector::from_reader(bytes),
            Err(Error::Detector(_))
        ));
    }
}
