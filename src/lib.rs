//! # face-tracker
//!
//! Facial landmark tracking over a deformable 3D shape model.
//!
//! This crate provides:
//! - **Tracking sessions**: follow one face across video frames, re-detecting
//!   after a lost track, or fit still images from scratch
//! - **Multi-face fitting**: detect every face in an image and fit each region
//!   in parallel
//! - **Geometry**: head pose, 2D/3D landmarks, parameter vectors and a
//!   projected head box from a fitted model
//! - **Parameter profiles**: video and still-image presets for window sizes,
//!   regularisation and iteration counts
//!
//! ## Algorithm Overview
//!
//! 1. A face detector proposes a region (or the caller seeds a location)
//! 2. The point distribution model is placed inside the region, once per
//!    rotation hypothesis
//! 3. For each window size of the active schedule:
//!    - Local experts vote for each landmark's position (mean-shift)
//!    - A regularised Gauss-Newton step updates rigid and non-rigid parameters
//! 4. The most confident hypothesis wins; on video the next frame starts from
//!    its parameters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use face_tracker::{
//!     CameraIntrinsics, GrayImage, ParameterProfile, PatchExpert,
//!     PointDistributionModel, RlmsOptimizer, RustfaceDetector, TrackingSession,
//!     ImageAccess, Point,
//! };
//!
//! // Plug in your trained local experts
//! struct MyExperts;
//! impl PatchExpert for MyExperts {
//!     fn response<I: ImageAccess + ?Sized>(&self, _image: &I, _landmark: usize, _at: Point) -> f64 {
//!         0.0
//!     }
//! }
//!
//! let pdm = Arc::new(PointDistributionModel::mean_face_68());
//! let detector = RustfaceDetector::from_file("models/seeta_fd_frontal_v1.0.bin").unwrap();
//! let mut session = TrackingSession::new(pdm, detector, RlmsOptimizer::new(MyExperts));
//! let profile = ParameterProfile::video();
//!
//! let frame = GrayImage::filled(640, 480, 0);
//! if session.fit_video_frame(&frame, &profile).unwrap() {
//!     let cam = CameraIntrinsics::from_image_size(640, 480).unwrap();
//!     let pose = face_tracker::pose_in_world(session.model(), &cam);
//!     println!("head at z = {:.0} mm", pose.z);
//! }
//! ```
//!
//! ## Custom Image Types
//!
//! Implement the [`ImageAccess`] trait for your own image types:
//!
//! ```rust
//! use face_tracker::ImageAccess;
//!
//! struct MyImage { /* ... */ }
//!
//! impl ImageAccess for MyImage {
//!     fn get_pixel(&self, x: i32, y: i32) -> u8 {
//!         // Return grayscale intensity at (x, y)
//!         // Return 0 for out-of-bounds
//!         0
//!     }
//!     fn width(&self) -> u32 { 640 }
//!     fn height(&self) -> u32 { 480 }
//! }
//! ```

mod detector;
mod error;
mod fitted;
mod frame;
mod geometry;
mod multi_face;
mod optimizer;
mod params;
mod pdm;
mod session;
mod types;

pub use detector::{best_region, closest_region, FaceDetector, RustfaceDetector};
pub use error::{Error, Result};
pub use fitted::{FittedModel, LandmarkLayout};
pub use frame::{sample_bilinear, to_luma_buffer, GrayImage, ImageAccess};
pub use geometry::{
    all_params, bounding_wireframe, eye_landmarks_2d, head_box, landmarks_2d, landmarks_3d,
    non_rigid_params, pose_in_world, pose_relative_to_camera, rigid_params, CameraIntrinsics,
    HeadPose,
};
pub use multi_face::{detect_all, FaceLandmarks};
pub use optimizer::{FitOutcome, LandmarkOptimizer, PatchExpert, RlmsOptimizer};
pub use params::{FitSchedule, FitStage, ParameterProfile, ProfileMode};
pub use pdm::{
    euler_to_rotation, rotation_to_euler, PdmBuilder, PointDistributionModel, RigidParams,
};
pub use session::{fit_region, SessionState, TrackingSession};
pub use types::{BoundingBox, FaceRegion, Point, Point3, Shape};
