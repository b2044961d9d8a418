pub mod annotate;
pub mod buffer;
#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod classifier;
pub mod features;
mod font;
pub mod inference;
pub mod rgba_converter;
pub mod smoother;
pub mod source;
pub mod state;

// Re-exports for convenience
pub use buffer::SequenceBuffer;
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, available_cameras, start_camera_stream};
pub use classifier::SequenceClassifier;
pub use features::{Extraction, FeatureExtractor};
pub use inference::{Command, InferenceHandle, InferenceLoop, LoopConfig, LoopPhase};
pub use smoother::{SmootherConfig, TemporalSmoother, TieBreak};
pub use source::{ChannelSource, FrameSource, ImageFolderSource};
pub use state::{GestureMessage, InferenceSnapshot, SharedInferenceState, StatusReport};
