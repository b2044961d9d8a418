//! External model collaborators.
//!
//! The pipeline only depends on the traits below; the ONNX Runtime backed
//! implementations live in the submodules and are assembled by [`ModelPaths`].

mod common;
mod hands;
mod palm;
mod pose;
mod sequence;
mod yolo;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use ndarray::ArrayView2;

use crate::{
    model_download::{
        default_handpose_estimator_model_path, default_palm_detector_model_path,
        ensure_handpose_estimator_model_ready, ensure_palm_detector_model_ready,
    },
    types::{BoundingBox, Frame, HandLandmarks, PoseLandmarks},
};

pub use hands::{HandDetectorConfig, OrtHandDetector};
pub use palm::{PalmDetector, PalmDetectorConfig};
pub use pose::{OrtPoseDetector, PoseDetectorConfig};
pub use sequence::OrtSequenceModel;
pub use yolo::{OrtObjectDetector, YoloConfig};

/// Best region of interest for the hand detector, if any.
pub trait ObjectDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<BoundingBox>>;
}

/// Zero, one or two hands, coordinates normalized to `frame`.
pub trait HandDetector: Send {
    fn detect_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>>;
}

/// Indexed body landmarks normalized to `frame`, or `None` when no body is visible.
pub trait PoseDetector: Send {
    fn detect_pose(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>>;
}

/// Maps a `(SEQUENCE_LENGTH, FEATURE_SIZE)` window to class probabilities.
pub trait SequenceModel: Send {
    fn classify(&mut self, window: ArrayView2<'_, f32>) -> Result<Vec<f32>>;
}

#[derive(Clone, Debug)]
pub struct ModelPaths {
    pub palm_detector: PathBuf,
    pub handpose_estimator: PathBuf,
    pub pose: PathBuf,
    pub object_detector: Option<PathBuf>,
    pub sequence: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            palm_detector: default_palm_detector_model_path(),
            handpose_estimator: default_handpose_estimator_model_path(),
            pose: PathBuf::from("models").join("pose_landmark_full.onnx"),
            object_detector: Some(PathBuf::from("models").join("hand_yolo.onnx")),
            sequence: PathBuf::from("models").join("gesture_sequence.onnx"),
        }
    }
}

pub struct ModelSet {
    pub object_detector: Option<Box<dyn ObjectDetector>>,
    pub hands: Box<dyn HandDetector>,
    pub pose: Box<dyn PoseDetector>,
    pub sequence: Box<dyn SequenceModel>,
}

impl ModelPaths {
    /// Loads every model. Any missing file aborts startup.
    pub fn load(&self) -> Result<ModelSet> {
        ensure_palm_detector_model_ready(&self.palm_detector, |_evt| {})
            .context("palm detector model unavailable")?;
        ensure_handpose_estimator_model_ready(&self.handpose_estimator, |_evt| {})
            .context("handpose estimator model unavailable")?;
        require_file(&self.pose, "pose landmark")?;
        require_file(&self.sequence, "gesture sequence")?;

        let hands = OrtHandDetector::new(
            &self.palm_detector,
            &self.handpose_estimator,
            HandDetectorConfig::default(),
        )?;
        log::info!(
            "hand detector ready using {} and {}",
            self.palm_detector.display(),
            self.handpose_estimator.display()
        );

        let pose = OrtPoseDetector::new(&self.pose, PoseDetectorConfig::default())?;
        log::info!("pose detector ready using {}", self.pose.display());

        let object_detector: Option<Box<dyn ObjectDetector>> = match &self.object_detector {
            Some(path) => {
                require_file(path, "object detector")?;
                let detector = OrtObjectDetector::new(path, YoloConfig::default())?;
                log::info!("object detector ready using {}", path.display());
                Some(Box::new(detector))
            }
            None => {
                log::info!("no object detector configured, hands are searched in the full frame");
                None
            }
        };

        let sequence = OrtSequenceModel::new(&self.sequence)?;
        log::info!("sequence classifier ready using {}", self.sequence.display());

        Ok(ModelSet {
            object_detector,
            hands: Box::new(hands),
            pose: Box::new(pose),
            sequence: Box::new(sequence),
        })
    }
}

fn require_file(path: &std::path::Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{what} model not found at {}", path.display());
    }
    Ok(())
}
