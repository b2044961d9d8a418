use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    HandDetector,
    common::{RotatedCrop, decode_points},
    palm::{PalmDetector, PalmDetectorConfig},
};
use crate::{
    error::PipelineError,
    types::{Frame, HandLandmarks, MAX_HANDS, NUM_HAND_LANDMARKS},
};

const HANDPOSE_INPUT_SIZE: u32 = 224;
const HANDPOSE_POINT_STRIDE: usize = 3;

#[derive(Clone, Debug)]
pub struct HandDetectorConfig {
    pub max_hands: usize,
    pub min_confidence: f32,
    pub palm: PalmDetectorConfig,
}

impl Default for HandDetectorConfig {
    fn default() -> Self {
        Self {
            max_hands: MAX_HANDS,
            min_confidence: 0.5,
            palm: PalmDetectorConfig::default(),
        }
    }
}

/// Two-stage MediaPipe hand pipeline: palm detection, then landmark
/// regression on a rotated crop around each palm.
pub struct OrtHandDetector {
    palm_detector: PalmDetector,
    handpose: Session,
    cfg: HandDetectorConfig,
}

impl OrtHandDetector {
    pub fn new(
        palm_detector_model_path: &Path,
        handpose_model_path: &Path,
        cfg: HandDetectorConfig,
    ) -> Result<Self> {
        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(handpose_model_path)
            .with_context(|| {
                format!(
                    "failed to load handpose session from {}",
                    handpose_model_path.display()
                )
            })?;
        let palm_detector = PalmDetector::new(palm_detector_model_path, cfg.palm.clone())?;

        Ok(Self {
            palm_detector,
            handpose,
            cfg,
        })
    }

    fn landmarks_for(&mut self, frame: &Frame, crop: &RotatedCrop) -> Result<(Vec<(f32, f32)>, f32)> {
        let tensor = Tensor::from_array(crop.sample(frame)?)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;
        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        let points = decode_points(&flat, NUM_HAND_LANDMARKS, HANDPOSE_POINT_STRIDE)?;

        let confidence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let projected = points.iter().map(|[x, y]| crop.project(*x, *y)).collect();
        Ok((projected, confidence))
    }
}

impl HandDetector for OrtHandDetector {
    fn detect_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>> {
        let palms = self.palm_detector.detect(frame)?;
        let mut hands = Vec::with_capacity(self.cfg.max_hands);

        for palm in palms.iter().take(self.cfg.max_hands) {
            let (center, side, angle) = palm.crop_params();
            let crop = RotatedCrop {
                center,
                side,
                angle,
                output_size: HANDPOSE_INPUT_SIZE,
                orig_w: frame.width,
                orig_h: frame.height,
            };
            let (projected, confidence) = self.landmarks_for(frame, &crop)?;
            let score = (confidence * palm.score).clamp(0.0, 1.0);
            if score < self.cfg.min_confidence {
                log::trace!("dropping hand with score {score:.2}");
                continue;
            }
            hands.push(normalize_hand(&projected, frame.width, frame.height, score)?);
        }

        Ok(hands)
    }
}

fn normalize_hand(points: &[(f32, f32)], width: u32, height: u32, score: f32) -> Result<HandLandmarks> {
    if points.len() != NUM_HAND_LANDMARKS {
        return Err(PipelineError::HandLandmarkCount {
            got: points.len(),
            expected: NUM_HAND_LANDMARKS,
        }
        .into());
    }
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let mut normalized = [(0.0, 0.0); NUM_HAND_LANDMARKS];
    for (dst, (x, y)) in normalized.iter_mut().zip(points) {
        *dst = (x / w, y / h);
    }
    Ok(HandLandmarks {
        points: normalized,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_unit_square() {
        let points: Vec<(f32, f32)> = (0..NUM_HAND_LANDMARKS).map(|i| (i as f32 * 10.0, 50.0)).collect();
        let hand = normalize_hand(&points, 200, 100, 0.8).unwrap();
        assert_eq!(hand.points[0], (0.0, 0.5));
        assert_eq!(hand.points[20], (1.0, 0.5));
        assert_eq!(hand.score, 0.8);
    }

    #[test]
    fn rejects_short_landmark_lists() {
        let err = normalize_hand(&[(0.0, 0.0); 5], 10, 10, 1.0).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }
}
