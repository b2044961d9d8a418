use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    ObjectDetector,
    common::{Letterbox, TensorLayout, letterbox},
};
use crate::types::{BoundingBox, Frame};

#[derive(Clone, Debug)]
pub struct YoloConfig {
    pub input_size: u32,
    pub score_threshold: f32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_threshold: 0.25,
        }
    }
}

/// Single-box detector over an Ultralytics-style `[1, 4 + classes, anchors]` head.
pub struct OrtObjectDetector {
    session: Session,
    cfg: YoloConfig,
}

impl OrtObjectDetector {
    pub fn new(model_path: &Path, cfg: YoloConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load object detector from {}", model_path.display())
            })?;
        Ok(Self { session, cfg })
    }
}

impl ObjectDetector for OrtObjectDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<BoundingBox>> {
        let (input, lb) = letterbox(frame, self.cfg.input_size, TensorLayout::Nchw)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run object detector session")?;
        if outputs.len() < 1 {
            return Err(anyhow!("object detector returned no outputs"));
        }

        let predictions = outputs[0].try_extract_array::<f32>()?;
        let shape = predictions.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(anyhow!("unexpected object detector output shape {shape:?}"));
        }
        let flat: Vec<f32> = predictions.iter().copied().collect();
        Ok(best_box(&flat, shape[1], shape[2], &lb, self.cfg.score_threshold))
    }
}

/// Picks the highest scoring anchor across all classes. Rows are
/// `cx, cy, w, h, class scores...`, laid out feature-major.
fn best_box(
    flat: &[f32],
    features: usize,
    anchors: usize,
    lb: &Letterbox,
    threshold: f32,
) -> Option<BoundingBox> {
    let at = |f: usize, a: usize| flat.get(f * anchors + a).copied().unwrap_or(0.0);

    let (anchor, score) = (0..anchors)
        .map(|a| {
            let score = (4..features).map(|f| at(f, a)).fold(f32::MIN, f32::max);
            (a, score)
        })
        .filter(|(_, score)| score.is_finite() && *score >= threshold)
        .fold(None, |best: Option<(usize, f32)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })?;
    log::trace!("object detector best anchor {anchor} score {score:.2}");

    let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
    let (x1, y1) = lb.unproject(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = lb.unproject(cx + w / 2.0, cy + h / 2.0);
    Some(BoundingBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 640,
            orig_h: 640,
        }
    }

    #[test]
    fn picks_highest_scoring_anchor() {
        // Two anchors, one class.
        let flat = [
            100.0, 300.0, // cx
            100.0, 300.0, // cy
            20.0, 40.0, // w
            20.0, 40.0, // h
            0.4, 0.9, // score
        ];
        let bbox = best_box(&flat, 5, 2, &identity(), 0.25).unwrap();
        assert_eq!(bbox, BoundingBox::new(280, 280, 320, 320));
    }

    #[test]
    fn nothing_above_threshold() {
        let flat = [100.0, 100.0, 20.0, 20.0, 0.1];
        assert_eq!(best_box(&flat, 5, 1, &identity(), 0.25), None);
    }
}
