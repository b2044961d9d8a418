use thiserror::Error;

use crate::pipeline::inference::LoopPhase;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classifier returned {got} probabilities, expected {expected}")]
    ClassifierOutputSize { got: usize, expected: usize },

    #[error("classifier returned no finite probabilities")]
    ClassifierOutputInvalid,

    #[error("pose result has {got} landmarks, need at least {need}")]
    PoseLandmarksTooShort { got: usize, need: usize },

    #[error("frame buffer size mismatch: got {got} bytes, expected {expected}")]
    FrameSize { got: usize, expected: usize },

    #[error("hand detector returned {got} landmarks for one hand, expected {expected}")]
    HandLandmarkCount { got: usize, expected: usize },
}

/// A failure confined to a single frame; the loop logs it and moves on.
#[derive(Debug, Error)]
#[error("frame {frame} failed while {phase}: {source:#}")]
pub struct FrameError {
    pub frame: u64,
    pub phase: LoopPhase,
    #[source]
    pub source: anyhow::Error,
}
