//! Fit every face found in one image.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, span, Level};

use crate::detector::FaceDetector;
use crate::error::Result;
use crate::frame::ImageAccess;
use crate::optimizer::LandmarkOptimizer;
use crate::params::ParameterProfile;
use crate::pdm::PointDistributionModel;
use crate::session::fit_region;
use crate::types::{FaceRegion, Shape};

/// Landmarks fitted inside one detected region.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub region: FaceRegion,
    /// Model points in point order. Present even when the fit failed.
    pub landmarks: Shape,
    /// Fit confidence, 0 when the fit failed.
    pub confidence: f64,
    pub success: bool,
}

/// Detect faces once, then fit a fresh model to each region.
///
/// Regions are fitted in parallel and collected by index, so the output
/// order always matches the detector's order. No faces yields an empty
/// vector.
pub fn detect_all<I, D, O>(
    detector: &D,
    optimizer: &O,
    pdm: &Arc<PointDistributionModel>,
    image: &I,
    profile: &ParameterProfile,
) -> Result<Vec<FaceLandmarks>>
where
    I: ImageAccess + Sync + ?Sized,
    D: FaceDetector,
    O: LandmarkOptimizer + Sync,
{
    let span = span!(Level::DEBUG, "detect_all");
    let _guard = span.enter();

    profile.validate()?;
    let regions = detector.detect(image);
    debug!(regions = regions.len(), "fitting detected faces");

    regions
        .par_iter()
        .map(|region| -> Result<FaceLandmarks> {
            let (model, outcome) = fit_region(optimizer, pdm, image, &region.bbox, profile)?;
            Ok(FaceLandmarks {
                region: *region,
                landmarks: model.landmarks(),
                confidence: model.confidence(),
                success: outcome.success,
            })
        })
        .collect()
}
