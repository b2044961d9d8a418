use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{Letterbox, TensorLayout, letterbox, sigmoid};
use crate::types::Frame;

pub const PALM_INPUT_SIZE: u32 = 192;
const PALM_KEYPOINTS: usize = 7;
const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 8,
        }
    }
}

/// A detected palm in frame pixels.
#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(PALM_INPUT_SIZE),
            cfg,
        })
    }

    /// Palms sorted by descending score after non-maximum suppression.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, lb) = letterbox(frame, PALM_INPUT_SIZE, TensorLayout::Nhwc)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let feature_dim = *boxes
            .shape()
            .last()
            .ok_or_else(|| anyhow!("palm box output has no dimensions"))?;
        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();

        decode_palms(&boxes, feature_dim, &scores, &self.anchors, &lb, &self.cfg)
    }
}

/// SSD anchor centers for the MediaPipe palm model, in `[0, 1]` input space.
fn generate_anchors(input_size: u32) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut per_cell = 0;
        while layer < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[layer] == stride {
            per_cell += 2;
            layer += 1;
        }
        let cells = input_size.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let cx = (x as f32 + 0.5) / cells as f32;
                let cy = (y as f32 + 0.5) / cells as f32;
                anchors.extend(std::iter::repeat_n([cx, cy], per_cell));
            }
        }
    }
    anchors
}

fn decode_palms(
    boxes: &[f32],
    feature_dim: usize,
    scores: &[f32],
    anchors: &[[f32; 2]],
    lb: &Letterbox,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    if feature_dim < 4 + PALM_KEYPOINTS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {feature_dim}"));
    }
    let count = anchors.len().min(scores.len()).min(boxes.len() / feature_dim);
    let input = PALM_INPUT_SIZE as f32;

    let mut candidates = Vec::new();
    for (idx, anchor) in anchors.iter().take(count).enumerate() {
        let score = sigmoid(scores[idx]);
        if score < cfg.score_threshold {
            continue;
        }
        let raw = &boxes[idx * feature_dim..(idx + 1) * feature_dim];
        // Offsets are in input pixels relative to the anchor center.
        let to_frame = |dx: f32, dy: f32| {
            lb.unproject((dx / input + anchor[0]) * input, (dy / input + anchor[1]) * input)
        };

        let (hw, hh) = (raw[2] / 2.0, raw[3] / 2.0);
        let (x1, y1) = to_frame(raw[0] - hw, raw[1] - hh);
        let (x2, y2) = to_frame(raw[0] + hw, raw[1] + hh);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let keypoints = (0..PALM_KEYPOINTS)
            .map(|k| to_frame(raw[4 + k * 2], raw[4 + k * 2 + 1]))
            .collect();

        candidates.push(PalmRegion {
            bbox: [x1, y1, x2, y2],
            keypoints,
            score,
        });
    }

    Ok(nms(candidates, cfg.nms_threshold, cfg.top_k))
}

impl PalmRegion {
    /// Center, side length and rotation of the crop fed to the landmark model.
    pub fn crop_params(&self) -> ((f32, f32), f32, f32) {
        let center = if self.keypoints.is_empty() {
            (
                (self.bbox[0] + self.bbox[2]) * 0.5,
                (self.bbox[1] + self.bbox[3]) * 0.5,
            )
        } else {
            let (sx, sy) = self
                .keypoints
                .iter()
                .fold((0.0f32, 0.0f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            let n = self.keypoints.len() as f32;
            (sx / n, sy / n)
        };

        let base = (self.bbox[2] - self.bbox[0])
            .abs()
            .max((self.bbox[3] - self.bbox[1]).abs());
        // Expand generously so extended fingers stay inside the crop.
        let side = base.max(80.0) * 2.4;

        (center, side, self.orientation())
    }

    fn orientation(&self) -> f32 {
        // Keypoint 0 is the wrist, keypoint 2 the middle finger base.
        match (self.keypoints.first(), self.keypoints.get(2)) {
            (Some(wrist), Some(middle)) => {
                let angle = (middle.1 - wrist.1).atan2(middle.0 - wrist.0);
                angle + PI * 0.5
            }
            _ => 0.0,
        }
    }
}

fn nms(mut candidates: Vec<PalmRegion>, threshold: f32, top_k: usize) -> Vec<PalmRegion> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut keep: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if keep.len() >= top_k {
            break;
        }
        if keep.iter().all(|k| iou(&candidate.bbox, &k.bbox) < threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bbox: [f32; 4], score: f32) -> PalmRegion {
        PalmRegion {
            bbox,
            keypoints: Vec::new(),
            score,
        }
    }

    #[test]
    fn anchor_grid_matches_palm_model() {
        let anchors = generate_anchors(PALM_INPUT_SIZE);
        assert_eq!(anchors.len(), 2016);
        assert_eq!(anchors[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1], anchors[0]);
        assert_eq!(anchors[1152], [0.5 / 12.0, 0.5 / 12.0]);
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let kept = nms(
            vec![
                region([0.0, 0.0, 10.0, 10.0], 0.6),
                region([1.0, 1.0, 10.0, 10.0], 0.9),
                region([50.0, 50.0, 60.0, 60.0], 0.7),
            ],
            0.3,
            8,
        );
        let scores: Vec<f32> = kept.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn decode_skips_low_scores() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 192,
            orig_h: 192,
        };
        let feature_dim = 18;
        let mut boxes = vec![0.0; feature_dim * 2];
        boxes[2] = 20.0;
        boxes[3] = 20.0;
        boxes[feature_dim + 2] = 20.0;
        boxes[feature_dim + 3] = 20.0;
        let anchors = vec![[0.5, 0.5], [0.25, 0.25]];
        let scores = vec![4.0, -4.0];
        let palms = decode_palms(
            &boxes,
            feature_dim,
            &scores,
            &anchors,
            &lb,
            &PalmDetectorConfig::default(),
        )
        .unwrap();
        assert_eq!(palms.len(), 1);
        for (got, want) in palms[0].bbox.iter().zip([86.0, 86.0, 106.0, 106.0]) {
            assert!((got - want).abs() < 1e-3, "{got} != {want}");
        }
        assert_eq!(palms[0].keypoints.len(), PALM_KEYPOINTS);
    }
}
