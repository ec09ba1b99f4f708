//! Quantities derived from a fitted model: landmarks, head pose, parameter
//! vectors and a projected head box.
//!
//! Everything here is a pure function of a [`FittedModel`] (and camera
//! intrinsics where depth is involved). Nothing is cached.

use nalgebra::{Matrix3xX, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fitted::FittedModel;
use crate::pdm::{euler_to_rotation, rotation_to_euler};
use crate::types::{Point, Point3, Shape};

/// Half the side of the head box, in millimetres.
const HEAD_BOX_HALF_SIDE: f64 = 100.0;

#[rustfmt::skip]
const BOX_VERTICES: [[f64; 3]; 8] = [
    [-1.0,  1.0, -1.0],
    [ 1.0,  1.0, -1.0],
    [ 1.0,  1.0,  1.0],
    [-1.0,  1.0,  1.0],
    [ 1.0, -1.0,  1.0],
    [ 1.0, -1.0, -1.0],
    [-1.0, -1.0, -1.0],
    [-1.0, -1.0,  1.0],
];

const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (0, 3),
    (2, 4),
    (1, 5),
    (0, 6),
    (3, 7),
    (6, 5),
    (5, 4),
    (4, 7),
    (7, 6),
];

/// Pinhole camera parameters in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraIntrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
}

impl CameraIntrinsics {
    /// Focal lengths must be finite and positive, the principal point finite.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self> {
        let focal_ok = |f: f64| f.is_finite() && f > 0.0;
        if !focal_ok(fx) || !focal_ok(fy) || !cx.is_finite() || !cy.is_finite() {
            return Err(Error::InvalidIntrinsics { fx, fy, cx, cy });
        }
        Ok(Self { fx, fy, cx, cy })
    }

    /// Rough intrinsics for an uncalibrated camera: a 500 px focal length at
    /// 640 px width, scaled with the image, principal point at the centre.
    pub fn from_image_size(width: u32, height: u32) -> Result<Self> {
        let focal = 500.0 * width as f64 / 640.0;
        Self::new(focal, focal, width as f64 / 2.0, height as f64 / 2.0)
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    /// Perspective projection of a camera-frame point.
    pub fn project(&self, p: &Vector3<f64>) -> Point {
        if p.z != 0.0 {
            Point::new(
                p.x * self.fx / p.z + self.cx,
                p.y * self.fy / p.z + self.cy,
            )
        } else {
            Point::new(p.x, p.y)
        }
    }
}

/// Head translation (mm, camera frame) and Euler rotation (radians).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rot_x: f64,
    pub rot_y: f64,
    pub rot_z: f64,
}

impl HeadPose {
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn rotation(&self) -> Vector3<f64> {
        Vector3::new(self.rot_x, self.rot_y, self.rot_z)
    }

    /// `[x, y, z, rot_x, rot_y, rot_z]`
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rot_x, self.rot_y, self.rot_z]
    }
}

/// Weak-perspective head position: depth from scale, x/y from translation.
fn head_translation(model: &FittedModel, cam: &CameraIntrinsics) -> Option<Vector3<f64>> {
    let rigid = model.rigid();
    if rigid.scale == 0.0 {
        return None;
    }
    let z = cam.fx / rigid.scale;
    let x = (rigid.tx - cam.cx) / cam.fx * z;
    let y = (rigid.ty - cam.cy) / cam.fy * z;
    Some(Vector3::new(x, y, z))
}

/// Pose with the rotation as estimated along the camera's line of sight to
/// the head. All zeros for a model with zero scale.
pub fn pose_relative_to_camera(model: &FittedModel, cam: &CameraIntrinsics) -> HeadPose {
    let Some(t) = head_translation(model, cam) else {
        return HeadPose::default();
    };
    let rigid = model.rigid();
    HeadPose {
        x: t.x,
        y: t.y,
        z: t.z,
        rot_x: rigid.rot_x,
        rot_y: rigid.rot_y,
        rot_z: rigid.rot_z,
    }
}

/// Pose with the rotation corrected for the head's offset from the optical
/// axis, i.e. relative to the fixed camera axes rather than the viewing ray.
pub fn pose_in_world(model: &FittedModel, cam: &CameraIntrinsics) -> HeadPose {
    let Some(t) = head_translation(model, cam) else {
        return HeadPose::default();
    };
    let ray_pitch = t.y.atan2((t.x * t.x + t.z * t.z).sqrt());
    let ray_yaw = -t.x.atan2((t.y * t.y + t.z * t.z).sqrt());
    let camera_rotation = euler_to_rotation(&Vector3::new(ray_pitch, ray_yaw, 0.0));
    let head_rotation = euler_to_rotation(&model.rigid().rotation());
    let corrected = rotation_to_euler(&(camera_rotation.transpose() * head_rotation));
    HeadPose {
        x: t.x,
        y: t.y,
        z: t.z,
        rot_x: corrected.x,
        rot_y: corrected.y,
        rot_z: corrected.z,
    }
}

/// One point per model point, in point order.
pub fn landmarks_2d(model: &FittedModel) -> Shape {
    model.landmarks()
}

/// The model's eye points, in the order the model lists them.
pub fn eye_landmarks_2d(model: &FittedModel) -> Shape {
    model
        .pdm()
        .eye_indices()
        .iter()
        .map(|&i| model.landmark(i))
        .collect()
}

/// Landmarks in camera coordinates (mm).
///
/// Depth is the weak-perspective head depth plus each point's depth in the
/// rotated model; x/y back-project the 2D landmark at that depth.
pub fn landmarks_3d(model: &FittedModel, cam: &CameraIntrinsics) -> Vec<Point3> {
    let rigid = model.rigid();
    if rigid.scale == 0.0 {
        return vec![Point3::default(); model.num_points()];
    }
    let rotated: Matrix3xX<f64> =
        euler_to_rotation(&rigid.rotation()) * model.pdm().shape_3d(model.non_rigid());
    let z_avg = cam.fx / rigid.scale;

    (0..model.num_points())
        .map(|i| {
            let p = model.landmark(i);
            let z = z_avg + rotated[(2, i)];
            Point3::new(
                z * (p.x - cam.cx) / cam.fx,
                z * (p.y - cam.cy) / cam.fy,
                z,
            )
        })
        .collect()
}

/// The 12 edges of a 200 mm cube around the head, projected into the image.
pub fn bounding_wireframe(pose: &HeadPose, cam: &CameraIntrinsics) -> Vec<(Point, Point)> {
    let rotation = euler_to_rotation(&pose.rotation());
    let translation = pose.translation();
    let projected: Vec<Point> = BOX_VERTICES
        .iter()
        .map(|v| {
            let corner = Vector3::new(v[0], v[1], v[2]) * HEAD_BOX_HALF_SIDE;
            cam.project(&(rotation * corner + translation))
        })
        .collect();

    BOX_EDGES
        .iter()
        .map(|&(a, b)| (projected[a], projected[b]))
        .collect()
}

/// Wireframe of the model's world pose, so the box stays aligned with the
/// face anywhere in the frame.
pub fn head_box(model: &FittedModel, cam: &CameraIntrinsics) -> Vec<(Point, Point)> {
    bounding_wireframe(&pose_in_world(model, cam), cam)
}

/// `[scale, rot_x, rot_y, rot_z, tx, ty]`
pub fn rigid_params(model: &FittedModel) -> [f64; 6] {
    model.rigid().to_array()
}

/// One coefficient per deformation mode.
pub fn non_rigid_params(model: &FittedModel) -> Vec<f64> {
    model.non_rigid().iter().copied().collect()
}

/// Rigid parameters followed by the non-rigid ones.
pub fn all_params(model: &FittedModel) -> Vec<f64> {
    let mut params = rigid_params(model).to_vec();
    params.extend(non_rigid_params(model));
    params
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nalgebra::{DMatrix, DVector};

    use super::*;
    use crate::pdm::{PdmBuilder, PointDistributionModel, RigidParams};
    use crate::types::BoundingBox;

    fn cam() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0).unwrap()
    }

    fn model_with_modes() -> FittedModel {
        let mut components = DMatrix::zeros(9, 2);
        components[(0, 0)] = 1.0;
        components[(7, 1)] = 1.0;
        let pdm = PdmBuilder::new()
            .mean_shape(vec![
                Point3::new(-30.0, -30.0, 10.0),
                Point3::new(30.0, -30.0, 10.0),
                Point3::new(0.0, 40.0, -20.0),
            ])
            .modes(components, DVector::from_vec(vec![9.0, 4.0]))
            .eye_indices(vec![1, 0])
            .build()
            .unwrap();
        let mut model = FittedModel::new(Arc::new(pdm));
        model.set_params(
            RigidParams {
                scale: 1.25,
                tx: 320.0,
                ty: 240.0,
                ..RigidParams::default()
            },
            DVector::from_vec(vec![0.5, -1.5]),
        );
        model
    }

    #[test]
    fn intrinsics_reject_non_physical_focal_lengths() {
        for (fx, fy) in [(0.0, 500.0), (500.0, -1.0), (f64::NAN, 500.0), (f64::INFINITY, 1.0)] {
            assert!(matches!(
                CameraIntrinsics::new(fx, fy, 320.0, 240.0),
                Err(Error::InvalidIntrinsics { .. })
            ));
        }
        assert!(CameraIntrinsics::new(500.0, 500.0, f64::NAN, 0.0).is_err());
        assert!(CameraIntrinsics::from_image_size(0, 480).is_err());

        let cam = CameraIntrinsics::from_image_size(1280, 720).unwrap();
        assert_eq!(cam.fx(), 1000.0);
        assert_eq!((cam.cx(), cam.cy()), (640.0, 360.0));
    }

    #[test]
    fn camera_pose_from_weak_perspective() {
        let mut model = model_with_modes();
        model.set_params(
            RigidParams {
                scale: 2.0,
                rot_y: 0.3,
                tx: 420.0,
                ty: 140.0,
                ..RigidParams::default()
            },
            model.non_rigid().clone(),
        );
        let pose = pose_relative_to_camera(&model, &cam());

        assert!((pose.z - 250.0).abs() < 1e-9);
        assert!((pose.x - 50.0).abs() < 1e-9);
        assert!((pose.y + 50.0).abs() < 1e-9);
        assert_eq!(pose.rot_y, 0.3);
    }

    #[test]
    fn world_pose_matches_camera_pose_on_axis() {
        let model = model_with_modes();
        let camera = pose_relative_to_camera(&model, &cam());
        let world = pose_in_world(&model, &cam());

        for (a, b) in camera.to_array().iter().zip(world.to_array()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn world_pose_corrects_for_off_axis_heads() {
        let mut model = model_with_modes();
        // head to the right of the optical axis, facing the camera
        model.set_params(
            RigidParams {
                scale: 1.0,
                tx: 820.0,
                ty: 240.0,
                ..RigidParams::default()
            },
            model.non_rigid().clone(),
        );
        let world = pose_in_world(&model, &cam());

        // ray at 45 degrees: yaw corrected by +45 degrees
        assert!((world.rot_y - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
        assert!(world.rot_x.abs() < 1e-9);
        assert_eq!(pose_relative_to_camera(&model, &cam()).rot_y, 0.0);
    }

    #[test]
    fn zero_scale_gives_zero_pose() {
        let mut model = model_with_modes();
        model.set_params(
            RigidParams {
                scale: 0.0,
                ..RigidParams::default()
            },
            model.non_rigid().clone(),
        );
        assert_eq!(pose_in_world(&model, &cam()), HeadPose::default());
        assert_eq!(pose_relative_to_camera(&model, &cam()), HeadPose::default());
    }

    #[test]
    fn landmarks_3d_back_project_onto_2d_landmarks() {
        let model = model_with_modes();
        let cam = cam();
        let points = landmarks_3d(&model, &cam);
        let landmarks = landmarks_2d(&model);

        assert_eq!(points.len(), 3);
        for (p3, p2) in points.iter().zip(&landmarks.points) {
            let projected = cam.project(&Vector3::new(p3.x, p3.y, p3.z));
            assert!(projected.distance(p2) < 1e-9);
        }
        // depth: fx / scale plus the point's own depth
        assert!((points[2].z - (400.0 - 20.0)).abs() < 1e-9);
    }

    #[test]
    fn eye_landmarks_follow_model_indices() {
        let model = model_with_modes();
        let all = landmarks_2d(&model);
        let eyes = eye_landmarks_2d(&model);

        assert_eq!(eyes.points, vec![all[1], all[0]]);
    }

    #[test]
    fn wireframe_has_twelve_edges_around_the_head() {
        let pose = HeadPose {
            z: 1000.0,
            ..HeadPose::default()
        };
        let lines = bounding_wireframe(&pose, &cam());

        assert_eq!(lines.len(), 12);
        // front face (z = 900) projects larger than the back face (z = 1100)
        let (a, b) = lines[0];
        assert!((a.x - (320.0 - 100.0 * 500.0 / 900.0)).abs() < 1e-9);
        assert!((b.x - (320.0 + 100.0 * 500.0 / 900.0)).abs() < 1e-9);
        let (c, d) = lines[2];
        assert!((c.x - (320.0 + 100.0 * 500.0 / 1100.0)).abs() < 1e-9);
        assert!((d.x - (320.0 - 100.0 * 500.0 / 1100.0)).abs() < 1e-9);
        // consecutive edges share endpoints per the cube topology
        assert_eq!(lines[0].1, lines[1].0);
        assert_eq!(head_box(&model_with_modes(), &cam()).len(), 12);
    }

    #[test]
    fn head_box_follows_world_pose_off_axis() {
        let model = FittedModel::from_region(
            Arc::new(PointDistributionModel::mean_face_68()),
            &BoundingBox::new(540.0, 165.0, 100.0, 150.0),
            &Vector3::zeros(),
        );
        let cam = CameraIntrinsics::from_image_size(640, 480).unwrap();
        let world = pose_in_world(&model, &cam);
        let camera = pose_relative_to_camera(&model, &cam);
        assert!(world.rot_y > 0.3);
        assert_eq!(camera.rot_y, 0.0);

        let lines = head_box(&model, &cam);
        assert_eq!(lines, bounding_wireframe(&world, &cam));
        assert_ne!(lines, bounding_wireframe(&camera, &cam));
        // yawed box: the top front edge is no longer horizontal
        let (a, b) = lines[0];
        assert!((a.y - b.y).abs() > 1.0);
    }

    #[test]
    fn all_params_concatenates_rigid_then_non_rigid() {
        let model = model_with_modes();
        let rigid = rigid_params(&model);
        let non_rigid = non_rigid_params(&model);
        let all = all_params(&model);

        assert_eq!(rigid, [1.25, 0.0, 0.0, 0.0, 320.0, 240.0]);
        assert_eq!(non_rigid, vec![0.5, -1.5]);
        assert_eq!(all.len(), 6 + model.num_modes());
        assert_eq!(&all[..6], &rigid);
        assert_eq!(&all[6..], non_rigid.as_slice());
    }

    #[test]
    fn landmarks_2d_ignore_buffer_layout() {
        let mut model = FittedModel::new(Arc::new(PointDistributionModel::mean_face_68()));
        let stacked = landmarks_2d(&model);

        let interleaved = DMatrix::from_row_slice(1, 136, &stacked.to_flat_vec());
        model.set_landmark_buffer(interleaved).unwrap();
        let from_row = landmarks_2d(&model);

        assert_eq!(from_row.num_landmarks(), 68);
        assert_eq!(from_row, stacked);
    }
}
