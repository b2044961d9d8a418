use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    PoseDetector,
    common::{Letterbox, TensorLayout, decode_points, letterbox, sigmoid},
};
use crate::types::{Frame, PoseLandmarks};

#[derive(Clone, Debug)]
pub struct PoseDetectorConfig {
    pub input_size: u32,
    pub num_landmarks: usize,
    /// Values per landmark in the flat output (x, y, z, visibility, presence).
    pub point_stride: usize,
    pub presence_threshold: f32,
}

impl Default for PoseDetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 256,
            num_landmarks: 33,
            point_stride: 5,
            presence_threshold: 0.5,
        }
    }
}

pub struct OrtPoseDetector {
    session: Session,
    cfg: PoseDetectorConfig,
}

impl OrtPoseDetector {
    pub fn new(model_path: &Path, cfg: PoseDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load pose model from {}", model_path.display()))?;
        Ok(Self { session, cfg })
    }
}

impl PoseDetector for OrtPoseDetector {
    fn detect_pose(&mut self, frame: &Frame) -> Result<Option<PoseLandmarks>> {
        let (input, lb) = letterbox(frame, self.cfg.input_size, TensorLayout::Nhwc)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run pose session")?;
        if outputs.len() < 1 {
            return Err(anyhow!("pose model returned no outputs"));
        }

        if outputs.len() > 1 {
            let presence = outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .map(presence_probability)
                .unwrap_or(1.0);
            if presence < self.cfg.presence_threshold {
                return Ok(None);
            }
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        let points = decode_points(&flat, self.cfg.num_landmarks, self.cfg.point_stride)?;
        Ok(Some(normalize_pose(&points, &lb)))
    }
}

fn presence_probability(raw: f32) -> f32 {
    if (0.0..=1.0).contains(&raw) {
        raw
    } else {
        sigmoid(raw)
    }
}

fn normalize_pose(points: &[[f32; 2]], lb: &Letterbox) -> PoseLandmarks {
    let (w, h) = (lb.orig_w.max(1) as f32, lb.orig_h.max(1) as f32);
    PoseLandmarks {
        points: points
            .iter()
            .map(|[x, y]| {
                let (px, py) = lb.unproject(*x, *y);
                (px / w, py / h)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_logits_are_squashed() {
        assert_eq!(presence_probability(0.8), 0.8);
        assert!(presence_probability(-6.0) < 0.01);
        assert!(presence_probability(6.0) > 0.99);
    }

    #[test]
    fn landmarks_are_normalized_to_the_frame() {
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 28.0,
            orig_w: 512,
            orig_h: 400,
        };
        let pose = normalize_pose(&[[64.0, 128.0]], &lb);
        assert_eq!(pose.points, vec![(0.25, 0.5)]);
    }
}
