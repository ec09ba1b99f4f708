//! Point distribution model: a 3D mean face plus linear deformation modes,
//! placed in the image by a weak-perspective rigid transform.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3xX, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{BoundingBox, Point3};

/// Rigid placement of the model: scale, rotation (Euler, radians) and 2D
/// translation in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidParams {
    pub scale: f64,
    pub rot_x: f64,
    pub rot_y: f64,
    pub rot_z: f64,
    pub tx: f64,
    pub ty: f64,
}

impl RigidParams {
    pub const LEN: usize = 6;

    /// Default scale and rotation, translated to `(x, y)`.
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            tx: x,
            ty: y,
            ..Self::default()
        }
    }

    pub fn rotation(&self) -> Vector3<f64> {
        Vector3::new(self.rot_x, self.rot_y, self.rot_z)
    }

    /// `[scale, rot_x, rot_y, rot_z, tx, ty]`
    pub fn to_array(&self) -> [f64; 6] {
        [self.scale, self.rot_x, self.rot_y, self.rot_z, self.tx, self.ty]
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            scale: v[0],
            rot_x: v[1],
            rot_y: v[2],
            rot_z: v[3],
            tx: v[4],
            ty: v[5],
        }
    }
}

impl Default for RigidParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rot_x: 0.0,
            rot_y: 0.0,
            rot_z: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }
}

/// Rotation matrix for Euler angles applied as `Rx * Ry * Rz`.
pub fn euler_to_rotation(euler: &Vector3<f64>) -> Matrix3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), euler.x);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), euler.y);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), euler.z);
    (rx * ry * rz).into_inner()
}

/// Inverse of [`euler_to_rotation`].
pub fn rotation_to_euler(r: &Matrix3<f64>) -> Vector3<f64> {
    let rot_y = r[(0, 2)].clamp(-1.0, 1.0).asin();
    let rot_x = (-r[(1, 2)]).atan2(r[(2, 2)]);
    let rot_z = (-r[(0, 1)]).atan2(r[(0, 0)]);
    Vector3::new(rot_x, rot_y, rot_z)
}

/// Statistical shape model of `n` 3D points with `m` deformation modes.
///
/// The mean shape is stored as `3n` values (all x, then all y, then all z)
/// and the principal components as a `3n x m` matrix in the same row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDistributionModel {
    mean_shape: DVector<f64>,
    components: DMatrix<f64>,
    eigen_values: DVector<f64>,
    eye_indices: Vec<usize>,
}

impl PointDistributionModel {
    /// A model with no deformation modes.
    pub fn rigid(mean_shape: Vec<Point3>) -> Result<Self> {
        PdmBuilder::new().mean_shape(mean_shape).build()
    }

    /// Rigid 68-point mean face (iBUG ordering) in millimetres, eyes at 36..48.
    pub fn mean_face_68() -> Self {
        let n = MEAN_FACE_68.len();
        let mean_shape = DVector::from_fn(3 * n, |i, _| MEAN_FACE_68[i % n][i / n]);
        Self {
            mean_shape,
            components: DMatrix::zeros(3 * n, 0),
            eigen_values: DVector::zeros(0),
            eye_indices: (36..48).collect(),
        }
    }

    /// Load a model from a binary file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let model: Self = bincode::deserialize(&bytes)?;
        model.validate()?;
        Ok(model)
    }

    /// Save the model to a binary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    pub fn num_points(&self) -> usize {
        self.mean_shape.len() / 3
    }

    pub fn num_modes(&self) -> usize {
        self.components.ncols()
    }

    pub fn eigen_values(&self) -> &DVector<f64> {
        &self.eigen_values
    }

    pub fn eye_indices(&self) -> &[usize] {
        &self.eye_indices
    }

    /// Non-rigid parameters of the mean shape.
    pub fn zero_modes(&self) -> DVector<f64> {
        DVector::zeros(self.num_modes())
    }

    /// Deformed shape in model coordinates, one column per point.
    pub fn shape_3d(&self, non_rigid: &DVector<f64>) -> Matrix3xX<f64> {
        debug_assert_eq!(non_rigid.len(), self.num_modes());
        let n = self.num_points();
        let flat = &self.mean_shape + &self.components * non_rigid;
        Matrix3xX::from_fn(n, |r, c| flat[r * n + c])
    }

    /// Projected 2D shape, stacked as `2n` values (all x, then all y).
    pub fn shape_2d(&self, rigid: &RigidParams, non_rigid: &DVector<f64>) -> DVector<f64> {
        let n = self.num_points();
        let rotated = euler_to_rotation(&rigid.rotation()) * self.shape_3d(non_rigid);
        DVector::from_fn(2 * n, |i, _| {
            if i < n {
                rigid.scale * rotated[(0, i)] + rigid.tx
            } else {
                rigid.scale * rotated[(1, i - n)] + rigid.ty
            }
        })
    }

    /// Rigid parameters that fit the rotated shape's projected extent into `bbox`.
    pub fn rigid_from_bbox(
        &self,
        bbox: &BoundingBox,
        rotation: &Vector3<f64>,
        non_rigid: &DVector<f64>,
    ) -> RigidParams {
        let rotated = euler_to_rotation(rotation) * self.shape_3d(non_rigid);
        let row_extent = |r: usize| {
            rotated
                .row(r)
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        };
        let (min_x, max_x) = row_extent(0);
        let (min_y, max_y) = row_extent(1);

        let ratios: Vec<f64> = [
            (bbox.width, max_x - min_x),
            (bbox.height, max_y - min_y),
        ]
        .iter()
        .filter(|(_, model)| *model > f64::EPSILON)
        .map(|(target, model)| target / model)
        .collect();
        let scale = if ratios.is_empty() {
            1.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        };

        let center = bbox.center();
        RigidParams {
            scale,
            rot_x: rotation.x,
            rot_y: rotation.y,
            rot_z: rotation.z,
            tx: center.x - scale * (min_x + max_x) / 2.0,
            ty: center.y - scale * (min_y + max_y) / 2.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let len = self.mean_shape.len();
        if len == 0 || len % 3 != 0 {
            return Err(Error::InvalidModel(format!(
                "mean shape has {len} values, expected a non-zero multiple of 3"
            )));
        }
        if self.components.nrows() != len {
            return Err(Error::InvalidModel(format!(
                "principal components have {} rows, mean shape has {len} values",
                self.components.nrows()
            )));
        }
        if self.eigen_values.len() != self.components.ncols() {
            return Err(Error::InvalidModel(format!(
                "{} eigenvalues for {} modes",
                self.eigen_values.len(),
                self.components.ncols()
            )));
        }
        if self.eigen_values.iter().any(|&e| !(e > 0.0)) {
            return Err(Error::InvalidModel("eigenvalues must be positive".into()));
        }
        let n = self.num_points();
        if let Some(&bad) = self.eye_indices.iter().find(|&&i| i >= n) {
            return Err(Error::InvalidModel(format!(
                "eye index {bad} out of range for {n} points"
            )));
        }
        Ok(())
    }
}

/// Builder for creating a PointDistributionModel.
pub struct PdmBuilder {
    mean_shape: Option<Vec<Point3>>,
    components: Option<DMatrix<f64>>,
    eigen_values: Option<DVector<f64>>,
    eye_indices: Vec<usize>,
}

impl PdmBuilder {
    pub fn new() -> Self {
        Self {
            mean_shape: None,
            components: None,
            eigen_values: None,
            eye_indices: Vec::new(),
        }
    }

    pub fn mean_shape(mut self, points: Vec<Point3>) -> Self {
        self.mean_shape = Some(points);
        self
    }

    /// Deformation modes: a `3n x m` component matrix (rows ordered all x,
    /// all y, all z) and the `m` eigenvalues used for regularisation.
    pub fn modes(mut self, components: DMatrix<f64>, eigen_values: DVector<f64>) -> Self {
        self.components = Some(components);
        self.eigen_values = Some(eigen_values);
        self
    }

    pub fn eye_indices(mut self, indices: Vec<usize>) -> Self {
        self.eye_indices = indices;
        self
    }

    pub fn build(self) -> Result<PointDistributionModel> {
        let points = self
            .mean_shape
            .ok_or_else(|| Error::InvalidModel("Missing mean shape".into()))?;
        let n = points.len();
        let mean_shape = DVector::from_fn(3 * n, |i, _| {
            let p = &points[i % n];
            match i / n {
                0 => p.x,
                1 => p.y,
                _ => p.z,
            }
        });
        let components = self
            .components
            .unwrap_or_else(|| DMatrix::zeros(3 * n, 0));
        let eigen_values = self.eigen_values.unwrap_or_else(|| DVector::zeros(0));

        let model = PointDistributionModel {
            mean_shape,
            components,
            eigen_values,
            eye_indices: self.eye_indices,
        };
        model.validate()?;
        Ok(model)
    }
}

impl Default for PdmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// iBUG 68-point layout: jaw 0-16, brows 17-26, nose 27-35, eyes 36-47, mouth 48-67.
// Camera looks down +z, so the nose has the smallest depth.
#[rustfmt::skip]
const MEAN_FACE_68: [[f64; 3]; 68] = [
    [-60.0, -25.5, 40.0],
    [-58.5, -8.5, 37.8],
    [-57.0, 8.5, 35.6],
    [-54.0, 25.5, 31.5],
    [-48.0, 39.1, 23.8],
    [-39.0, 51.0, 14.0],
    [-27.0, 59.5, 4.1],
    [-13.5, 64.6, -2.7],
    [0.0, 66.3, -5.0],
    [13.5, 64.6, -2.7],
    [27.0, 59.5, 4.1],
    [39.0, 51.0, 14.0],
    [48.0, 39.1, 23.8],
    [54.0, 25.5, 31.5],
    [57.0, 8.5, 35.6],
    [58.5, -8.5, 37.8],
    [60.0, -25.5, 40.0],
    [-45.0, -40.8, 2.0],
    [-37.5, -47.6, -1.1],
    [-27.0, -49.3, -4.4],
    [-18.0, -45.9, -6.4],
    [-10.5, -39.1, -7.5],
    [10.5, -39.1, -7.5],
    [18.0, -45.9, -6.4],
    [27.0, -49.3, -4.4],
    [37.5, -47.6, -1.1],
    [45.0, -40.8, 2.0],
    [0.0, -30.6, -10.0],
    [0.0, -17.0, -18.0],
    [0.0, -3.4, -26.0],
    [0.0, 8.5, -34.0],
    [-15.0, 13.6, -6.0],
    [-7.5, 17.0, -12.0],
    [0.0, 20.4, -18.0],
    [7.5, 17.0, -12.0],
    [15.0, 13.6, -6.0],
    [-39.0, -30.6, 6.5],
    [-33.0, -35.7, 5.2],
    [-24.0, -35.7, 3.7],
    [-18.0, -28.9, 3.0],
    [-24.0, -25.5, 3.7],
    [-33.0, -25.5, 5.2],
    [18.0, -28.9, 3.0],
    [24.0, -35.7, 3.7],
    [33.0, -35.7, 5.2],
    [39.0, -30.6, 6.5],
    [33.0, -25.5, 5.2],
    [24.0, -25.5, 3.7],
    [-27.0, 37.4, -9.9],
    [-18.0, 30.6, -12.2],
    [-9.0, 27.2, -13.6],
    [0.0, 28.9, -14.0],
    [9.0, 27.2, -13.5],
    [18.0, 30.6, -12.2],
    [27.0, 37.4, -9.9],
    [18.0, 47.6, -12.2],
    [9.0, 51.0, -13.5],
    [0.0, 52.7, -14.0],
    [-9.0, 51.0, -13.6],
    [-18.0, 47.6, -12.2],
    [-21.0, 37.4, -11.5],
    [-9.0, 34.0, -13.6],
    [0.0, 34.0, -14.0],
    [9.0, 34.0, -13.5],
    [21.0, 37.4, -11.5],
    [9.0, 40.8, -13.5],
    [0.0, 42.5, -14.0],
    [-9.0, 40.8, -13.6],
];
