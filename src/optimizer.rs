//! Landmark optimizer seam and a regularised landmark mean-shift fitter.
//!
//! The session layer only depends on [`LandmarkOptimizer`]. [`RlmsOptimizer`]
//! is a complete fitting loop built on any [`PatchExpert`]; the expert's
//! appearance model is supplied by the caller.

use nalgebra::{DMatrix, DVector};
use tracing::{span, trace, Level};

use crate::fitted::FittedModel;
use crate::frame::ImageAccess;
use crate::params::FitSchedule;
use crate::pdm::{PointDistributionModel, RigidParams};
use crate::types::Point;

/// Result of one optimizer call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOutcome {
    pub success: bool,
    /// Fit quality in [0, 1].
    pub confidence: f64,
}

impl FitOutcome {
    pub const FAILED: Self = Self {
        success: false,
        confidence: 0.0,
    };
}

/// Moves a model's parameters toward image evidence.
///
/// The model's current parameters are the initial guess; on return they hold
/// the optimizer's best estimate whether or not the fit succeeded.
pub trait LandmarkOptimizer {
    fn fit<I: ImageAccess + ?Sized>(
        &self,
        image: &I,
        model: &mut FittedModel,
        schedule: &FitSchedule,
    ) -> FitOutcome;
}

/// Local appearance evidence for individual landmarks.
pub trait PatchExpert {
    /// Non-negative evidence that `landmark` is located at `at`.
    fn response<I: ImageAccess + ?Sized>(&self, image: &I, landmark: usize, at: Point) -> f64;
}

/// Regularised landmark mean-shift.
///
/// For every active window level the expert is evaluated on a grid around
/// each landmark, a Gaussian-weighted mean shift is taken, and the model
/// parameters are updated by a regularised Gauss-Newton step.
#[derive(Debug, Clone)]
pub struct RlmsOptimizer<P> {
    expert: P,
    /// Mean landmark displacement (px) below which a level stops early.
    tolerance: f64,
}

impl<P: PatchExpert> RlmsOptimizer<P> {
    pub fn new(expert: P) -> Self {
        Self {
            expert,
            tolerance: 0.01,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn expert(&self) -> &P {
        &self.expert
    }

    /// Mean-shift vectors (stacked) and the peak response per landmark.
    fn mean_shift<I: ImageAccess + ?Sized>(
        &self,
        image: &I,
        shape: &DVector<f64>,
        window: u32,
        kernel_sigma: f64,
    ) -> (DVector<f64>, Vec<f64>) {
        let n = shape.len() / 2;
        let half = (window / 2) as i32;
        let inv_var = 1.0 / (2.0 * kernel_sigma * kernel_sigma);
        let mut shifts = DVector::zeros(2 * n);
        let mut peaks = vec![0.0; n];

        for i in 0..n {
            let current = Point::new(shape[i], shape[i + n]);
            let (mut total, mut sum_x, mut sum_y) = (0.0, 0.0, 0.0);
            for dy in -half..=half {
                for dx in -half..=half {
                    let (dx, dy) = (dx as f64, dy as f64);
                    let r = self
                        .expert
                        .response(image, i, current + Point::new(dx, dy))
                        .max(0.0);
                    peaks[i] = f64::max(peaks[i], r);
                    let w = r * (-(dx * dx + dy * dy) * inv_var).exp();
                    total += w;
                    sum_x += w * dx;
                    sum_y += w * dy;
                }
            }
            if total > 0.0 {
                shifts[i] = sum_x / total;
                shifts[i + n] = sum_y / total;
            }
        }
        (shifts, peaks)
    }

    /// Mean of response-at-landmark over best response in its window.
    fn confidence<I: ImageAccess + ?Sized>(
        &self,
        image: &I,
        shape: &DVector<f64>,
        window: u32,
    ) -> f64 {
        let n = shape.len() / 2;
        let half = (window / 2) as i32;
        let mut total = 0.0;
        for i in 0..n {
            let current = Point::new(shape[i], shape[i + n]);
            let at = self.expert.response(image, i, current).max(0.0);
            let mut peak = at;
            for dy in -half..=half {
                for dx in -half..=half {
                    let p = current + Point::new(dx as f64, dy as f64);
                    peak = f64::max(peak, self.expert.response(image, i, p));
                }
            }
            if peak > 0.0 {
                total += at / peak;
            }
        }
        if n == 0 {
            0.0
        } else {
            total / n as f64
        }
    }
}

impl<P: PatchExpert> LandmarkOptimizer for RlmsOptimizer<P> {
    fn fit<I: ImageAccess + ?Sized>(
        &self,
        image: &I,
        model: &mut FittedModel,
        schedule: &FitSchedule,
    ) -> FitOutcome {
        let pdm = model.pdm_handle().clone();
        let n = pdm.num_points();
        let mut params = pack(model.rigid(), model.non_rigid());
        let regularisation = regularisation(&pdm, schedule.reg_factor);
        let mut finest_window = 0;

        for (level, window) in schedule.active_levels() {
            let span = span!(Level::TRACE, "rlms_level", level, window);
            let _guard = span.enter();
            finest_window = window;
            let kernel_sigma = schedule.sigma * (window as f64 / 2.0).max(1.0);

            for iteration in 0..schedule.iterations {
                let shape = project(&pdm, &params);
                let (shifts, peaks) = self.mean_shift(image, &shape, window, kernel_sigma);
                let weights = landmark_weights(&peaks, schedule.weight_factor);

                let jacobian = numeric_jacobian(&pdm, &params, &shape);
                let mut weighted_jt = jacobian.transpose();
                for (c, mut column) in weighted_jt.column_iter_mut().enumerate() {
                    column *= weights[c % n];
                }

                let mut lhs = &weighted_jt * &jacobian;
                for j in 0..lhs.nrows() {
                    let diagonal = lhs[(j, j)];
                    lhs[(j, j)] = diagonal * (1.0 + 1e-4) + regularisation[j] + 1e-9;
                }
                let rhs = &weighted_jt * &shifts - regularisation.component_mul(&params);

                let delta = solve(lhs, rhs);
                let next = &params + &delta;
                if next[0] <= 0.0 {
                    trace!(iteration, "step would collapse scale, stopping level");
                    break;
                }
                params = next;

                let moved = (project(&pdm, &params) - &shape).norm() / (n as f64).sqrt();
                trace!(iteration, moved, "rlms step");
                if moved < self.tolerance {
                    break;
                }
            }
        }

        let (rigid, non_rigid) = unpack(&params);
        model.set_params(rigid, non_rigid);
        let shape = project(&pdm, &params);
        let confidence = self.confidence(image, &shape, finest_window);
        FitOutcome {
            success: confidence >= schedule.min_confidence,
            confidence,
        }
    }
}

fn pack(rigid: &RigidParams, non_rigid: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        RigidParams::LEN + non_rigid.len(),
        rigid.to_array().into_iter().chain(non_rigid.iter().copied()),
    )
}

fn unpack(params: &DVector<f64>) -> (RigidParams, DVector<f64>) {
    let p = params.as_slice();
    let rigid = RigidParams::from_array([p[0], p[1], p[2], p[3], p[4], p[5]]);
    let modes = params.len() - RigidParams::LEN;
    (
        rigid,
        DVector::from_iterator(modes, p[RigidParams::LEN..].iter().copied()),
    )
}

fn project(pdm: &PointDistributionModel, params: &DVector<f64>) -> DVector<f64> {
    let (rigid, non_rigid) = unpack(params);
    pdm.shape_2d(&rigid, &non_rigid)
}

/// Zero for rigid parameters, `reg_factor / eigenvalue` for each mode.
fn regularisation(pdm: &PointDistributionModel, reg_factor: f64) -> DVector<f64> {
    let mut reg = DVector::zeros(RigidParams::LEN + pdm.num_modes());
    for (k, eigen) in pdm.eigen_values().iter().enumerate() {
        reg[RigidParams::LEN + k] = reg_factor / eigen;
    }
    reg
}

fn landmark_weights(peaks: &[f64], weight_factor: f64) -> Vec<f64> {
    let max_peak = peaks.iter().copied().fold(0.0, f64::max);
    if weight_factor <= 0.0 || max_peak <= 0.0 {
        return vec![1.0; peaks.len()];
    }
    peaks
        .iter()
        .map(|p| 1.0 + weight_factor * p / max_peak)
        .collect()
}

fn numeric_jacobian(
    pdm: &PointDistributionModel,
    params: &DVector<f64>,
    base: &DVector<f64>,
) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(base.len(), params.len());
    for j in 0..params.len() {
        let h = 1e-6 * params[j].abs().max(1.0);
        let mut shifted = params.clone();
        shifted[j] += h;
        let column = (project(pdm, &shifted) - base) / h;
        jacobian.set_column(j, &column);
    }
    jacobian
}

fn solve(lhs: DMatrix<f64>, rhs: DVector<f64>) -> DVector<f64> {
    let size = rhs.len();
    match lhs.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => lhs
            .svd(true, true)
            .solve(&rhs, 1e-10)
            .unwrap_or_else(|_| DVector::zeros(size)),
    }
}
