//! Tracking session: one shape model followed across a video stream, or
//! refitted from scratch on still images.
//!
//! ## State machine
//!
//! ```text
//!                 reset_at(x, y)
//!   Uninitialized ───────────────► Tracking ◄──┐ fit ok
//!        │   ▲                      │   └──────┘
//!  fit ok│   │ reset()              │ fit failed
//!        ▼   │                      ▼
//!     Tracking ...               Lost ──► (next fit re-detects, like Uninitialized)
//! ```
//!
//! Tracking fits start from the previous frame's parameters and use the
//! profile's tracking windows. Uninitialized and Lost sessions run the face
//! detector and start over with the initialisation windows.

use std::sync::Arc;

use nalgebra::Vector3;
use tracing::{debug, span, Level};

use crate::detector::{best_region, closest_region, FaceDetector};
use crate::error::Result;
use crate::fitted::FittedModel;
use crate::frame::ImageAccess;
use crate::multi_face::{self, FaceLandmarks};
use crate::optimizer::{FitOutcome, LandmarkOptimizer};
use crate::params::{FitStage, ParameterProfile};
use crate::pdm::{PointDistributionModel, RigidParams};
use crate::types::{BoundingBox, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No estimate; the next video fit runs detection.
    Uninitialized,
    /// The model holds a usable estimate to continue from.
    Tracking,
    /// The last video fit failed; the next one runs detection.
    Lost,
}

/// Fit a fresh model into `region`, trying every rotation hypothesis of the
/// profile and keeping the most confident result.
///
/// Shares no state with any session, so independent regions can be fitted
/// concurrently.
pub fn fit_region<I, O>(
    optimizer: &O,
    pdm: &Arc<PointDistributionModel>,
    image: &I,
    region: &BoundingBox,
    profile: &ParameterProfile,
) -> Result<(FittedModel, FitOutcome)>
where
    I: ImageAccess + ?Sized,
    O: LandmarkOptimizer,
{
    let schedule = profile.schedule(FitStage::Initialisation)?;
    let fit_view = |rotation: &Vector3<f64>| {
        let mut model = FittedModel::from_region(pdm.clone(), region, rotation);
        let outcome = optimizer.fit(image, &mut model, &schedule);
        (model, outcome)
    };

    let frontal = fit_view(&Vector3::zeros());
    let (mut model, outcome) = profile
        .side_views()
        .iter()
        .map(fit_view)
        .fold(frontal, |best, candidate| {
            if candidate.1.confidence > best.1.confidence {
                candidate
            } else {
                best
            }
        });
    model.set_confidence(if outcome.success {
        outcome.confidence
    } else {
        0.0
    });
    Ok((model, outcome))
}

/// A shape model tracked across calls.
///
/// Not reentrant: every call that changes the model takes `&mut self`.
pub struct TrackingSession<D, O> {
    detector: D,
    optimizer: O,
    model: FittedModel,
    state: SessionState,
    /// Where to look first when the session has to re-detect.
    preferred_location: Option<Point>,
    failures_in_a_row: u32,
}

impl<D: FaceDetector, O: LandmarkOptimizer> TrackingSession<D, O> {
    pub fn new(pdm: Arc<PointDistributionModel>, detector: D, optimizer: O) -> Self {
        Self {
            detector,
            optimizer,
            model: FittedModel::new(pdm),
            state: SessionState::Uninitialized,
            preferred_location: None,
            failures_in_a_row: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }

    pub fn confidence(&self) -> f64 {
        self.model.confidence()
    }

    pub fn failures_in_a_row(&self) -> u32 {
        self.failures_in_a_row
    }

    pub fn preferred_location(&self) -> Option<Point> {
        self.preferred_location
    }

    pub fn num_points(&self) -> usize {
        self.model.num_points()
    }

    pub fn num_modes(&self) -> usize {
        self.model.num_modes()
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Forget everything: mean shape, confidence 0, `Uninitialized`.
    pub fn reset(&mut self) {
        self.model.reset();
        self.state = SessionState::Uninitialized;
        self.preferred_location = None;
        self.failures_in_a_row = 0;
        debug!("session reset");
    }

    /// Start tracking from a face at `(x, y)`: default scale and rotation,
    /// mean shape, translation `(x, y)`.
    ///
    /// The location is also preferred if the session later has to re-detect.
    pub fn reset_at(&mut self, x: f64, y: f64) {
        self.model.reset();
        let non_rigid = self.model.pdm().zero_modes();
        self.model.set_params(RigidParams::at(x, y), non_rigid);
        self.state = SessionState::Tracking;
        self.preferred_location = Some(Point::new(x, y));
        self.failures_in_a_row = 0;
        debug!(x, y, "session seeded");
    }

    /// Fit the next video frame, continuing from the previous one when
    /// tracking. Returns whether the fit succeeded.
    ///
    /// A failed fit leaves the previous landmarks in place, zeroes the
    /// confidence and moves the session to [`SessionState::Lost`].
    pub fn fit_video_frame<I: ImageAccess + ?Sized>(
        &mut self,
        image: &I,
        profile: &ParameterProfile,
    ) -> Result<bool> {
        let span = span!(Level::DEBUG, "fit_video_frame", state = ?self.state);
        let _guard = span.enter();

        let attempt = match self.state {
            SessionState::Tracking => {
                let schedule = profile.schedule(FitStage::Tracking)?;
                let mut candidate = self.model.clone();
                let outcome = self.optimizer.fit(image, &mut candidate, &schedule);
                Some((candidate, outcome))
            }
            SessionState::Uninitialized | SessionState::Lost => {
                profile.validate()?;
                let regions = self.detector.detect(image);
                let region = match self.preferred_location {
                    Some(point) => closest_region(&regions, point),
                    None => best_region(&regions),
                };
                match region {
                    Some(region) => Some(fit_region(
                        &self.optimizer,
                        self.model.pdm_handle(),
                        image,
                        &region.bbox,
                        profile,
                    )?),
                    None => {
                        debug!("no face region to initialise from");
                        None
                    }
                }
            }
        };

        match attempt {
            Some((candidate, outcome)) if outcome.success => {
                self.model = candidate;
                self.model.set_confidence(outcome.confidence);
                self.state = SessionState::Tracking;
                self.preferred_location = None;
                self.failures_in_a_row = 0;
                debug!(confidence = outcome.confidence, "frame fitted");
                Ok(true)
            }
            attempt => {
                self.model.set_confidence(0.0);
                self.state = SessionState::Lost;
                self.failures_in_a_row += 1;
                debug!(
                    confidence = attempt.map(|(_, o)| o.confidence).unwrap_or(0.0),
                    failures = self.failures_in_a_row,
                    "frame fit failed, session lost"
                );
                Ok(false)
            }
        }
    }

    /// Fit the model inside `region` from scratch, ignoring any previous
    /// estimate. The session state is not changed.
    pub fn fit_image_region<I: ImageAccess + ?Sized>(
        &mut self,
        image: &I,
        region: &BoundingBox,
        profile: &ParameterProfile,
    ) -> Result<bool> {
        let (model, outcome) = fit_region(
            &self.optimizer,
            self.model.pdm_handle(),
            image,
            region,
            profile,
        )?;
        self.model = model;
        debug!(
            success = outcome.success,
            confidence = outcome.confidence,
            "image region fitted"
        );
        Ok(outcome.success)
    }

    /// Detect the most confident face in a still image and fit it.
    pub fn fit_image<I: ImageAccess + ?Sized>(
        &mut self,
        image: &I,
        profile: &ParameterProfile,
    ) -> Result<bool> {
        profile.validate()?;
        let regions = self.detector.detect(image);
        match best_region(&regions) {
            Some(region) => {
                let bbox = region.bbox;
                self.fit_image_region(image, &bbox, profile)
            }
            None => {
                self.model.set_confidence(0.0);
                debug!("no face in image");
                Ok(false)
            }
        }
    }
}

impl<D, O> TrackingSession<D, O>
where
    D: FaceDetector,
    O: LandmarkOptimizer + Sync,
{
    /// Fit every face in `image` independently. The session's own model is
    /// not touched.
    pub fn detect_all<I: ImageAccess + Sync + ?Sized>(
        &self,
        image: &I,
        profile: &ParameterProfile,
    ) -> Result<Vec<FaceLandmarks>> {
        multi_face::detect_all(
            &self.detector,
            &self.optimizer,
            self.model.pdm_handle(),
            image,
            profile,
        )
    }
}
