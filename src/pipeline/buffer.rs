use std::collections::VecDeque;

use ndarray::Array2;

use crate::types::{FEATURE_SIZE, FeatureVector, SEQUENCE_LENGTH};

/// Sliding window over the most recent feature vectors, oldest first.
#[derive(Clone, Debug)]
pub struct SequenceBuffer {
    frames: VecDeque<FeatureVector>,
    capacity: usize,
}

impl SequenceBuffer {
    pub fn new() -> Self {
        Self::with_capacity(SEQUENCE_LENGTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, features: FeatureVector) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(features);
    }

    pub fn is_ready(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&FeatureVector> {
        self.frames.front()
    }

    /// Copies the window into a `(len, FEATURE_SIZE)` array in arrival order.
    pub fn snapshot(&self) -> Array2<f32> {
        let mut flat = Vec::with_capacity(self.frames.len() * FEATURE_SIZE);
        for frame in &self.frames {
            flat.extend_from_slice(frame.as_slice());
        }
        Array2::from_shape_vec((self.frames.len(), FEATURE_SIZE), flat)
            .unwrap_or_else(|_| Array2::zeros((0, FEATURE_SIZE)))
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }
}

impl Default for SequenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked(value: f32) -> FeatureVector {
        let mut values = [0.0; FEATURE_SIZE];
        values[0] = value;
        values[FEATURE_SIZE - 1] = value;
        FeatureVector::from(values)
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = SequenceBuffer::new();
        for i in 0..100 {
            buffer.append(marked(i as f32));
            assert!(buffer.len() <= SEQUENCE_LENGTH);
        }
        assert_eq!(buffer.len(), SEQUENCE_LENGTH);
    }

    #[test]
    fn overflow_evicts_exactly_the_oldest() {
        let mut buffer = SequenceBuffer::new();
        for i in 1..=SEQUENCE_LENGTH + 1 {
            buffer.append(marked(i as f32));
        }
        assert_eq!(buffer.len(), SEQUENCE_LENGTH);
        assert_eq!(buffer.oldest(), Some(&marked(2.0)));
    }

    #[test]
    fn ready_only_when_full() {
        let mut buffer = SequenceBuffer::new();
        for i in 0..SEQUENCE_LENGTH - 1 {
            buffer.append(marked(i as f32));
            assert!(!buffer.is_ready());
        }
        buffer.append(marked(99.0));
        assert!(buffer.is_ready());
    }

    #[test]
    fn snapshot_keeps_arrival_order_and_does_not_mutate() {
        let mut buffer = SequenceBuffer::new();
        for i in 0..SEQUENCE_LENGTH + 5 {
            buffer.append(marked(i as f32));
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.shape(), &[SEQUENCE_LENGTH, FEATURE_SIZE]);
        for row in 0..SEQUENCE_LENGTH {
            assert_eq!(snapshot[[row, 0]], (row + 5) as f32);
            assert_eq!(snapshot[[row, FEATURE_SIZE - 1]], (row + 5) as f32);
        }
        assert_eq!(buffer.len(), SEQUENCE_LENGTH);
        assert_eq!(buffer.oldest(), Some(&marked(5.0)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut buffer = SequenceBuffer::new();
        for i in 0..SEQUENCE_LENGTH {
            buffer.append(marked(i as f32));
        }
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.is_ready());
    }
}
