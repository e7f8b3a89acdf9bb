#[cfg(feature = "onnx")]
pub mod detector;
pub mod keypoint;
pub mod region;
pub mod smooth;

#[cfg(feature = "onnx")]
pub use detector::OnnxPoseModel;
pub use keypoint::{FrameInference, Keypoint, KeypointMap, Landmark, UserFacing};
pub use region::{NormalizedRect, RegionEstimator};
pub use smooth::TemporalSmoother;
