use anyhow::Result;

use super::buffer::SequenceBuffer;
use crate::{error::PipelineError, models::SequenceModel, types::RawPrediction};

/// Runs the sequence model over a full window and reduces its output to the
/// most likely class.
pub struct SequenceClassifier {
    model: Box<dyn SequenceModel>,
    num_classes: usize,
}

impl SequenceClassifier {
    pub fn new(model: Box<dyn SequenceModel>, num_classes: usize) -> Self {
        Self { model, num_classes }
    }

    /// `Ok(None)` means the window is still filling up.
    pub fn classify(&mut self, buffer: &SequenceBuffer) -> Result<Option<RawPrediction>> {
        if !buffer.is_ready() {
            return Ok(None);
        }

        let window = buffer.snapshot();
        let probabilities = self.model.classify(window.view())?;
        if probabilities.len() != self.num_classes {
            return Err(PipelineError::ClassifierOutputSize {
                got: probabilities.len(),
                expected: self.num_classes,
            }
            .into());
        }

        let (class_index, confidence) =
            argmax(&probabilities).ok_or(PipelineError::ClassifierOutputInvalid)?;
        Ok(Some(RawPrediction::new(
            class_index,
            confidence.clamp(0.0, 1.0),
        )))
    }
}

/// First index holding the largest finite value.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best, (idx, v)| match best {
            Some((_, best_v)) if best_v >= v => best,
            _ => Some((idx, v)),
        })
}

#[cfg(test)]
mod tests {
    use ndarray::ArrayView2;

    use super::*;
    use crate::types::{FEATURE_SIZE, FeatureVector, GestureKind, SEQUENCE_LENGTH};

    struct FixedModel {
        output: Vec<f32>,
        calls: usize,
    }

    impl SequenceModel for FixedModel {
        fn classify(&mut self, window: ArrayView2<'_, f32>) -> Result<Vec<f32>> {
            assert_eq!(window.shape(), &[SEQUENCE_LENGTH, FEATURE_SIZE]);
            self.calls += 1;
            Ok(self.output.clone())
        }
    }

    fn classifier(output: Vec<f32>) -> SequenceClassifier {
        SequenceClassifier::new(
            Box::new(FixedModel { output, calls: 0 }),
            GestureKind::COUNT,
        )
    }

    #[test]
    fn returns_none_until_window_is_full() {
        let mut classifier = classifier(vec![0.0, 0.9, 0.1, 0.0, 0.0, 0.0, 0.0]);
        let mut buffer = SequenceBuffer::new();
        for _ in 0..SEQUENCE_LENGTH - 1 {
            buffer.append(FeatureVector::zeros());
            assert_eq!(classifier.classify(&buffer).unwrap(), None);
        }
        buffer.append(FeatureVector::zeros());
        let prediction = classifier.classify(&buffer).unwrap().unwrap();
        assert_eq!(prediction.class_index, 1);
        assert!((prediction.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn wrong_output_width_is_an_error() {
        let mut classifier = classifier(vec![0.5, 0.5]);
        let mut buffer = SequenceBuffer::new();
        for _ in 0..SEQUENCE_LENGTH {
            buffer.append(FeatureVector::zeros());
        }
        let err = classifier.classify(&buffer).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ClassifierOutputSize { got: 2, .. })
        ));
    }

    #[test]
    fn argmax_prefers_first_maximum_and_skips_nan() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some((1, 0.4)));
        assert_eq!(argmax(&[f32::NAN, 0.1]), Some((1, 0.1)));
        assert_eq!(argmax(&[f32::NAN]), None);
        assert_eq!(argmax(&[]), None);
    }
}
