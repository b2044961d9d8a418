use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::{ArrayView2, Axis};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::SequenceModel;

/// The trained gesture sequence network, exported to ONNX with an input of
/// `[1, SEQUENCE_LENGTH, FEATURE_SIZE]`.
pub struct OrtSequenceModel {
    session: Session,
}

impl OrtSequenceModel {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load sequence model from {}", model_path.display())
            })?;
        Ok(Self { session })
    }
}

impl SequenceModel for OrtSequenceModel {
    fn classify(&mut self, window: ArrayView2<'_, f32>) -> Result<Vec<f32>> {
        let batch = window.insert_axis(Axis(0)).to_owned();
        let tensor = Tensor::from_array(batch)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run sequence model")?;
        if outputs.len() < 1 {
            return Err(anyhow!("sequence model returned no outputs"));
        }
        let scores = outputs[0].try_extract_array::<f32>()?;
        Ok(as_probabilities(scores.iter().copied().collect()))
    }
}

/// Exports without a final softmax hand back logits; normalize those.
fn as_probabilities(scores: Vec<f32>) -> Vec<f32> {
    let sum: f32 = scores.iter().sum();
    let is_distribution =
        scores.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution || scores.is_empty() {
        return scores;
    }

    let max = scores.iter().copied().fold(f32::MIN, f32::max);
    let exp: Vec<f32> = scores.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributions_pass_through() {
        let probs = vec![0.1, 0.7, 0.2];
        assert_eq!(as_probabilities(probs.clone()), probs);
    }

    #[test]
    fn logits_are_softmaxed() {
        let probs = as_probabilities(vec![2.0, 0.0, -1.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }
}
