//! Optimization schedules for the landmark fitter.
//!
//! A [`ParameterProfile`] is configured once for either video tracking or
//! still images and then shared read-only between fits. Every fit asks it
//! for a [`FitSchedule`] for the [`FitStage`] it is in.

use std::fs;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 30 degrees, the spacing of the multi-view head pose hypotheses.
const VIEW_ANGLE: f64 = 0.5236;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

/// Which preset a profile was last configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileMode {
    Video,
    Image,
}

/// Where in the tracking lifecycle a fit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    /// No usable previous frame: fresh start inside a face region.
    Initialisation,
    /// Continuing from the previous frame's parameters.
    Tracking,
}

/// Everything one optimizer call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSchedule {
    /// Search window per optimization level, coarse to fine. Zero skips a level.
    pub window_sizes: Vec<u32>,
    pub iterations: u32,
    pub reg_factor: f64,
    pub sigma: f64,
    pub weight_factor: f64,
    /// Fits below this confidence are reported as failures.
    pub min_confidence: f64,
}

impl FitSchedule {
    /// Window sizes of the levels that actually run.
    pub fn active_levels(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.window_sizes
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, size)| size > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProfile {
    pub mode: Option<ProfileMode>,
    pub window_sizes_init: Vec<u32>,
    pub window_sizes_tracking: Vec<u32>,
    pub reg_factor: f64,
    pub sigma: f64,
    pub weight_factor: f64,
    pub iterations: u32,
    pub multi_view: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

impl ParameterProfile {
    /// An unconfigured profile. Call [`configure_for_video`] or
    /// [`configure_for_image`] before fitting with it.
    ///
    /// [`configure_for_video`]: Self::configure_for_video
    /// [`configure_for_image`]: Self::configure_for_image
    pub fn new() -> Self {
        Self {
            mode: None,
            window_sizes_init: Vec::new(),
            window_sizes_tracking: Vec::new(),
            reg_factor: 0.0,
            sigma: 0.0,
            weight_factor: 0.0,
            iterations: 0,
            multi_view: false,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn video() -> Self {
        let mut profile = Self::new();
        profile.configure_for_video();
        profile
    }

    pub fn image() -> Self {
        let mut profile = Self::new();
        profile.configure_for_image();
        profile
    }

    /// Small windows and few iterations: relies on the previous frame.
    pub fn configure_for_video(&mut self) {
        self.mode = Some(ProfileMode::Video);
        // coarsest tracking level is disabled
        self.window_sizes_tracking = vec![0, 9, 7, 5];
        self.window_sizes_init = vec![11, 9, 7, 5];
        self.multi_view = false;
        self.iterations = 5;
        self.sigma = 1.5;
        self.reg_factor = 25.0;
        self.weight_factor = 0.0;
    }

    /// Large windows, more iterations and several head pose hypotheses.
    pub fn configure_for_image(&mut self) {
        self.mode = Some(ProfileMode::Image);
        self.window_sizes_init = vec![15, 13, 11, 9];
        // still images never track; keep both schedules the same length
        self.window_sizes_tracking = self.window_sizes_init.clone();
        self.multi_view = true;
        self.iterations = 10;
        self.sigma = 1.25;
        self.reg_factor = 35.0;
        self.weight_factor = 2.5;
    }

    pub fn is_configured(&self) -> bool {
        self.mode.is_some() || !self.window_sizes_init.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(Error::UnconfiguredProfile);
        }
        if self.window_sizes_init.is_empty() {
            return Err(Error::InvalidProfile(
                "initialisation window schedule is empty".into(),
            ));
        }
        if self.window_sizes_init.len() != self.window_sizes_tracking.len() {
            return Err(Error::InvalidProfile(format!(
                "window schedules differ in length: {} initialisation levels, {} tracking levels",
                self.window_sizes_init.len(),
                self.window_sizes_tracking.len()
            )));
        }
        for (name, sizes) in [
            ("initialisation", &self.window_sizes_init),
            ("tracking", &self.window_sizes_tracking),
        ] {
            if sizes.iter().all(|&s| s == 0) {
                return Err(Error::InvalidProfile(format!(
                    "every {name} level is disabled"
                )));
            }
        }
        if self.iterations == 0 {
            return Err(Error::InvalidProfile("iteration count is zero".into()));
        }
        for (name, value) in [
            ("reg_factor", self.reg_factor),
            ("sigma", self.sigma),
            ("weight_factor", self.weight_factor),
            ("min_confidence", self.min_confidence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidProfile(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.sigma == 0.0 {
            return Err(Error::InvalidProfile("sigma is zero".into()));
        }
        Ok(())
    }

    /// The validated schedule for one fit.
    pub fn schedule(&self, stage: FitStage) -> Result<FitSchedule> {
        self.validate()?;
        let window_sizes = match stage {
            FitStage::Initialisation => self.window_sizes_init.clone(),
            FitStage::Tracking => self.window_sizes_tracking.clone(),
        };
        Ok(FitSchedule {
            window_sizes,
            iterations: self.iterations,
            reg_factor: self.reg_factor,
            sigma: self.sigma,
            weight_factor: self.weight_factor,
            min_confidence: self.min_confidence,
        })
    }

    /// Initial head rotations (rot_x, rot_y, rot_z) to try, frontal first.
    pub fn rotation_hypotheses(&self) -> Vec<Vector3<f64>> {
        let mut hypotheses = vec![Vector3::zeros()];
        hypotheses.extend(self.side_views());
        hypotheses
    }

    /// The non-frontal hypotheses: yaw and pitch of 30 degrees either way
    /// when multi-view fitting is on, none otherwise.
    pub fn side_views(&self) -> Vec<Vector3<f64>> {
        if !self.multi_view {
            return Vec::new();
        }
        vec![
            Vector3::new(0.0, VIEW_ANGLE, 0.0),
            Vector3::new(0.0, -VIEW_ANGLE, 0.0),
            Vector3::new(VIEW_ANGLE, 0.0, 0.0),
            Vector3::new(-VIEW_ANGLE, 0.0, 0.0),
        ]
    }

    /// Load a profile from JSON. The result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let profile: Self = serde_json::from_str(&text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

impl Default for ParameterProfile {
    fn default() -> Self {
        Self::new()
    }
}
