//! Observable state of one shape-model instance.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};

use crate::error::{Error, Result};
use crate::pdm::{PointDistributionModel, RigidParams};
use crate::types::{BoundingBox, Point, Shape};

/// How 2D landmark coordinates are laid out in a numeric buffer.
///
/// Optimizers may hand back either layout; [`LandmarkLayout::detect`] is the
/// only place that inspects buffer dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkLayout {
    /// `2n x 1`: all x coordinates, then all y coordinates.
    Stacked,
    /// `1 x 2n`: `x0, y0, x1, y1, ...`
    Interleaved,
    /// `n x 2`: one point per row.
    Rows,
}

impl LandmarkLayout {
    pub fn detect(rows: usize, cols: usize, num_points: usize) -> Result<Self> {
        let layout = match (rows, cols) {
            (r, 1) if r == 2 * num_points => Self::Stacked,
            (1, c) if c == 2 * num_points => Self::Interleaved,
            (r, 2) if r == num_points => Self::Rows,
            _ => {
                return Err(Error::InvalidLandmarkBuffer {
                    rows,
                    cols,
                    expected_points: num_points,
                })
            }
        };
        Ok(layout)
    }

    /// Point `i` of a buffer known to be in this layout.
    fn point(self, buffer: &DMatrix<f64>, i: usize) -> Point {
        match self {
            Self::Stacked => {
                let n = buffer.nrows() / 2;
                Point::new(buffer[(i, 0)], buffer[(i + n, 0)])
            }
            Self::Interleaved => Point::new(buffer[(0, 2 * i)], buffer[(0, 2 * i + 1)]),
            Self::Rows => Point::new(buffer[(i, 0)], buffer[(i, 1)]),
        }
    }
}

/// Parameters, landmarks and confidence of a fitted shape model.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pdm: Arc<PointDistributionModel>,
    rigid: RigidParams,
    non_rigid: DVector<f64>,
    landmarks: DMatrix<f64>,
    layout: LandmarkLayout,
    confidence: f64,
}

impl FittedModel {
    /// The mean shape at default pose, confidence 0.
    pub fn new(pdm: Arc<PointDistributionModel>) -> Self {
        let non_rigid = pdm.zero_modes();
        let mut model = Self {
            landmarks: DMatrix::zeros(2 * pdm.num_points(), 1),
            layout: LandmarkLayout::Stacked,
            pdm,
            rigid: RigidParams::default(),
            non_rigid,
            confidence: 0.0,
        };
        model.update_landmarks();
        model
    }

    /// The mean shape rotated by `rotation` and fitted into `region`.
    pub fn from_region(
        pdm: Arc<PointDistributionModel>,
        region: &BoundingBox,
        rotation: &Vector3<f64>,
    ) -> Self {
        let mut model = Self::new(pdm);
        let rigid = model
            .pdm
            .rigid_from_bbox(region, rotation, &model.non_rigid);
        model.rigid = rigid;
        model.update_landmarks();
        model
    }

    pub fn pdm(&self) -> &PointDistributionModel {
        &self.pdm
    }

    pub(crate) fn pdm_handle(&self) -> &Arc<PointDistributionModel> {
        &self.pdm
    }

    pub fn rigid(&self) -> &RigidParams {
        &self.rigid
    }

    pub fn non_rigid(&self) -> &DVector<f64> {
        &self.non_rigid
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn num_points(&self) -> usize {
        self.pdm.num_points()
    }

    pub fn num_modes(&self) -> usize {
        self.pdm.num_modes()
    }

    pub fn landmark_buffer(&self) -> &DMatrix<f64> {
        &self.landmarks
    }

    pub fn layout(&self) -> LandmarkLayout {
        self.layout
    }

    /// Replace both parameter vectors and recompute the landmarks from them.
    pub fn set_params(&mut self, rigid: RigidParams, non_rigid: DVector<f64>) {
        debug_assert_eq!(non_rigid.len(), self.pdm.num_modes());
        self.rigid = rigid;
        self.non_rigid = non_rigid;
        self.update_landmarks();
    }

    /// Install landmarks produced outside the model, in any supported layout.
    pub fn set_landmark_buffer(&mut self, buffer: DMatrix<f64>) -> Result<()> {
        self.layout = LandmarkLayout::detect(buffer.nrows(), buffer.ncols(), self.num_points())?;
        self.landmarks = buffer;
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    /// Back to the mean shape at default pose with confidence 0.
    pub fn reset(&mut self) {
        self.set_params(RigidParams::default(), self.pdm.zero_modes());
        self.confidence = 0.0;
    }

    /// Landmarks in point order, whatever the buffer layout.
    pub fn landmarks(&self) -> Shape {
        (0..self.num_points())
            .map(|i| self.layout.point(&self.landmarks, i))
            .collect()
    }

    /// Landmark `i` in image coordinates.
    pub fn landmark(&self, i: usize) -> Point {
        self.layout.point(&self.landmarks, i)
    }

    fn update_landmarks(&mut self) {
        self.landmarks = DMatrix::from_column_slice(
            2 * self.pdm.num_points(),
            1,
            self.pdm.shape_2d(&self.rigid, &self.non_rigid).as_slice(),
        );
        self.layout = LandmarkLayout::Stacked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point3;

    fn triangle() -> Arc<PointDistributionModel> {
        Arc::new(
            PointDistributionModel::rigid(vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(0.0, 20.0, 0.0),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn layout_detection() {
        assert_eq!(LandmarkLayout::detect(6, 1, 3).unwrap(), LandmarkLayout::Stacked);
        assert_eq!(LandmarkLayout::detect(1, 6, 3).unwrap(), LandmarkLayout::Interleaved);
        assert_eq!(LandmarkLayout::detect(3, 2, 3).unwrap(), LandmarkLayout::Rows);
        assert!(matches!(
            LandmarkLayout::detect(2, 3, 3),
            Err(Error::InvalidLandmarkBuffer { .. })
        ));
        assert!(LandmarkLayout::detect(4, 1, 3).is_err());
    }

    #[test]
    fn every_layout_yields_points_in_order() {
        let expected = vec![
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            Point::new(5.0, 6.0),
        ];
        let buffers = [
            DMatrix::from_column_slice(6, 1, &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0]),
            DMatrix::from_row_slice(1, 6, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        ];

        let mut model = FittedModel::new(triangle());
        for buffer in buffers {
            model.set_landmark_buffer(buffer).unwrap();
            assert_eq!(model.landmarks().points, expected);
        }
    }

    #[test]
    fn rejected_buffer_leaves_landmarks_untouched() {
        let mut model = FittedModel::new(triangle());
        let before = model.landmarks();

        assert!(model.set_landmark_buffer(DMatrix::zeros(5, 1)).is_err());
        assert_eq!(model.landmarks(), before);
        assert_eq!(model.layout(), LandmarkLayout::Stacked);
    }

    #[test]
    fn set_params_recomputes_landmarks() {
        let mut model = FittedModel::new(triangle());
        model.set_params(RigidParams::at(100.0, 50.0), DVector::zeros(0));

        let points = model.landmarks().points;
        assert_eq!(points[0], Point::new(100.0, 50.0));
        assert_eq!(points[2], Point::new(100.0, 70.0));
    }

    #[test]
    fn region_initialisation_fits_box() {
        let region = BoundingBox::new(20.0, 40.0, 100.0, 200.0);
        let model = FittedModel::from_region(triangle(), &region, &Vector3::zeros());

        let bbox = model.landmarks().bounding_box().unwrap();
        assert!((bbox.center().x - 70.0).abs() < 1e-9);
        assert!((bbox.center().y - 140.0).abs() < 1e-9);
        assert!((model.rigid().scale - 10.0).abs() < 1e-9);
        assert_eq!(model.confidence(), 0.0);
    }

    #[test]
    fn reset_restores_mean_shape() {
        let mut model = FittedModel::new(triangle());
        model.set_params(RigidParams::at(5.0, 5.0), DVector::zeros(0));
        model.set_confidence(1.7);
        assert_eq!(model.confidence(), 1.0);

        model.reset();
        assert_eq!(*model.rigid(), RigidParams::default());
        assert_eq!(model.confidence(), 0.0);
        assert_eq!(model.landmark(1), Point::new(10.0, 0.0));
    }
}
