use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("Profile serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Parameter profile used before configure_for_video() or configure_for_image()")]
    UnconfiguredProfile,

    #[error("Invalid parameter profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid camera intrinsics: fx={fx}, fy={fy}, cx={cx}, cy={cy}")]
    InvalidIntrinsics { fx: f64, fy: f64, cx: f64, cy: f64 },

    #[error(
        "Landmark buffer of {rows}x{cols} does not hold {expected_points} points in a known layout"
    )]
    InvalidLandmarkBuffer {
        rows: usize,
        cols: usize,
        expected_points: usize,
    },

    #[error("Face detector error: {0}")]
    Detector(String),
}

pub type Result<T> = std::result::Result<T, Error>;
