use anyhow::{Context, Result};

use crate::{
    error::PipelineError,
    models::{HandDetector, PoseDetector},
    types::{
        BoundingBox, FeatureVector, Frame, HAND_FEATURES, HandLandmarks, MAX_HANDS,
        NUM_HAND_LANDMARKS, POSE_FEATURES, POSE_INDICES, PoseLandmarks, Region,
    },
};

/// Everything one frame produced, kept for rendering the annotated preview.
#[derive(Clone, Debug)]
pub struct Extraction {
    pub features: FeatureVector,
    /// The area the hand detector ran on.
    pub region: Region,
    /// Hand landmarks normalized to `region`.
    pub hands: Vec<HandLandmarks>,
    pub pose: Option<PoseLandmarks>,
}

pub struct FeatureExtractor {
    hands: Box<dyn HandDetector>,
    pose: Box<dyn PoseDetector>,
}

impl FeatureExtractor {
    pub fn new(hands: Box<dyn HandDetector>, pose: Box<dyn PoseDetector>) -> Self {
        Self { hands, pose }
    }

    pub fn extract(&mut self, frame: &Frame, bbox: Option<BoundingBox>) -> Result<Extraction> {
        let region = bbox
            .and_then(|b| b.clamp_to(frame.width, frame.height))
            .unwrap_or_else(|| frame.full_region());

        let hands = if region == frame.full_region() {
            self.hands.detect_hands(frame)
        } else {
            self.hands.detect_hands(&frame.crop(&region))
        }
        .context("hand landmark detection failed")?;

        let pose = self
            .pose
            .detect_pose(frame)
            .context("pose landmark detection failed")?;

        let features =
            FeatureVector::from_parts(&hand_features(&hands), &pose_features(pose.as_ref())?);

        Ok(Extraction {
            features,
            region,
            hands,
            pose,
        })
    }
}

/// Up to two hands in detection order, zero-filled to a fixed width.
pub fn hand_features(hands: &[HandLandmarks]) -> [f32; HAND_FEATURES] {
    let mut out = [0.0; HAND_FEATURES];
    for (slot, hand) in out
        .chunks_exact_mut(NUM_HAND_LANDMARKS * 2)
        .zip(hands.iter().take(MAX_HANDS))
    {
        for (dst, (x, y)) in slot.chunks_exact_mut(2).zip(hand.points.iter()) {
            dst[0] = *x;
            dst[1] = *y;
        }
    }
    out
}

pub fn pose_features(pose: Option<&PoseLandmarks>) -> Result<[f32; POSE_FEATURES], PipelineError> {
    let mut out = [0.0; POSE_FEATURES];
    let Some(pose) = pose else {
        return Ok(out);
    };

    for (dst, &idx) in out.chunks_exact_mut(2).zip(POSE_INDICES.iter()) {
        let (x, y) = *pose
            .points
            .get(idx)
            .ok_or(PipelineError::PoseLandmarksTooShort {
                got: pose.points.len(),
                need: POSE_INDICES[POSE_INDICES.len() - 1] + 1,
            })?;
        dst[0] = x;
        dst[1] = y;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::types::FEATURE_SIZE;

    struct FixedHands {
        hands: Vec<HandLandmarks>,
        seen_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl HandDetector for FixedHands {
        fn detect_hands(&mut self, frame: &Frame) -> Result<Vec<HandLandmarks>> {
            self.seen_sizes.lock().unwrap().push((frame.width, frame.height));
            Ok(self.hands.clone())
        }
    }

    struct FixedPose(Option<PoseLandmarks>);

    impl PoseDetector for FixedPose {
        fn detect_pose(&mut self, _frame: &Frame) -> Result<Option<PoseLandmarks>> {
            Ok(self.0.clone())
        }
    }

    fn hand(value: f32) -> HandLandmarks {
        HandLandmarks {
            points: [(value, value + 0.5); NUM_HAND_LANDMARKS],
            score: 0.9,
        }
    }

    fn pose() -> PoseLandmarks {
        PoseLandmarks {
            points: (0..33).map(|i| (i as f32 / 100.0, i as f32 / 50.0)).collect(),
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 64 * 48 * 4], 64, 48).unwrap()
    }

    fn extractor(
        hands: Vec<HandLandmarks>,
        pose: Option<PoseLandmarks>,
    ) -> (FeatureExtractor, Arc<Mutex<Vec<(u32, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let extractor = FeatureExtractor::new(
            Box::new(FixedHands {
                hands,
                seen_sizes: seen.clone(),
            }),
            Box::new(FixedPose(pose)),
        );
        (extractor, seen)
    }

    #[test]
    fn length_is_fixed_for_any_detection_count() {
        for count in 0..=3 {
            for pose in [None, Some(pose())] {
                let hands = (0..count).map(|i| hand(i as f32 * 0.1)).collect();
                let (mut ex, _) = extractor(hands, pose);
                let out = ex.extract(&frame(), None).unwrap();
                assert_eq!(out.features.as_slice().len(), FEATURE_SIZE);
            }
        }
    }

    #[test]
    fn missing_second_hand_is_zero_filled() {
        let features = hand_features(&[hand(0.25)]);
        assert_eq!(features[0], 0.25);
        assert_eq!(features[1], 0.75);
        assert_eq!(features[41], 0.75);
        assert!(features[42..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn hands_keep_detection_order() {
        let features = hand_features(&[hand(0.1), hand(0.2), hand(0.3)]);
        assert_eq!(features[0], 0.1);
        assert_eq!(features[42], 0.2);
    }

    #[test]
    fn pose_uses_shoulders_then_elbows() {
        let features = pose_features(Some(&pose())).unwrap();
        assert_eq!(
            features,
            [0.11, 0.22, 0.12, 0.24, 0.13, 0.26, 0.14, 0.28]
        );
    }

    #[test]
    fn absent_pose_is_zero() {
        assert_eq!(pose_features(None).unwrap(), [0.0; POSE_FEATURES]);
    }

    #[test]
    fn truncated_pose_is_an_error() {
        let short = PoseLandmarks {
            points: vec![(0.0, 0.0); 13],
        };
        assert!(matches!(
            pose_features(Some(&short)),
            Err(PipelineError::PoseLandmarksTooShort { got: 13, need: 15 })
        ));
    }

    #[test]
    fn bbox_crops_hand_search_area() {
        let (mut ex, seen) = extractor(vec![hand(0.5)], Some(pose()));
        let out = ex
            .extract(&frame(), Some(BoundingBox::new(-10, 8, 40, 100)))
            .unwrap();
        assert_eq!(
            out.region,
            Region {
                x: 0,
                y: 8,
                width: 40,
                height: 40
            }
        );
        assert_eq!(seen.lock().unwrap().as_slice(), &[(40, 40)]);
    }

    #[test]
    fn degenerate_bbox_falls_back_to_full_frame() {
        let (mut ex, seen) = extractor(Vec::new(), None);
        let out = ex
            .extract(&frame(), Some(BoundingBox::new(30, 30, 30, 40)))
            .unwrap();
        assert_eq!(out.region, frame().full_region());
        assert_eq!(seen.lock().unwrap().as_slice(), &[(64, 48)]);
    }
}
