use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;

use crate::types::{ProducerStatus, SmoothedGesture};

pub const NO_GESTURE: &str = "no gesture";

/// One complete published value. Readers only ever see whole snapshots.
#[derive(Clone, Debug)]
pub struct InferenceSnapshot {
    pub gesture: Option<SmoothedGesture>,
    pub frame_jpeg: Option<Bytes>,
    pub status: ProducerStatus,
    /// Increments on every publish, so readers can tell a resend from news.
    pub sequence: u64,
    pub buffered: usize,
    pub frames_processed: u64,
    pub frame_errors: u64,
    pub updated_at: Instant,
}

impl Default for InferenceSnapshot {
    fn default() -> Self {
        Self {
            gesture: None,
            frame_jpeg: None,
            status: ProducerStatus::Starting,
            sequence: 0,
            buffered: 0,
            frames_processed: 0,
            frame_errors: 0,
            updated_at: Instant::now(),
        }
    }
}

/// The structured feed record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GestureMessage {
    pub gesture: String,
    pub confidence: f64,
}

impl GestureMessage {
    pub fn no_gesture() -> Self {
        Self {
            gesture: NO_GESTURE.to_string(),
            confidence: 0.0,
        }
    }
}

impl From<Option<SmoothedGesture>> for GestureMessage {
    fn from(gesture: Option<SmoothedGesture>) -> Self {
        match gesture {
            Some(g) => Self {
                gesture: g.kind.label().to_string(),
                confidence: g.confidence as f64,
            },
            None => Self::no_gesture(),
        }
    }
}

impl InferenceSnapshot {
    pub fn message(&self) -> GestureMessage {
        if self.status == ProducerStatus::Stopped {
            return GestureMessage::no_gesture();
        }
        self.gesture.into()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub status: ProducerStatus,
    pub sequence: u64,
    pub buffered: usize,
    pub frames_processed: u64,
    pub frame_errors: u64,
    pub last_update_ms: u128,
    pub gesture: GestureMessage,
}

impl From<&InferenceSnapshot> for StatusReport {
    fn from(snapshot: &InferenceSnapshot) -> Self {
        Self {
            status: snapshot.status,
            sequence: snapshot.sequence,
            buffered: snapshot.buffered,
            frames_processed: snapshot.frames_processed,
            frame_errors: snapshot.frame_errors,
            last_update_ms: snapshot.updated_at.elapsed().as_millis(),
            gesture: snapshot.message(),
        }
    }
}

/// Single-writer, many-reader cell between the inference thread and the
/// async server. Publishing swaps the whole snapshot.
#[derive(Clone, Debug)]
pub struct SharedInferenceState {
    tx: Arc<watch::Sender<InferenceSnapshot>>,
}

impl SharedInferenceState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(InferenceSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the current value, stamping sequence and time. Usable from
    /// any thread; never blocks on readers.
    pub fn publish(&self, mut snapshot: InferenceSnapshot) {
        self.tx.send_modify(|current| {
            snapshot.sequence = current.sequence + 1;
            snapshot.updated_at = Instant::now();
            *current = snapshot;
        });
    }

    /// Marks the producer as gone. The last gesture is cleared so no reader
    /// keeps serving it.
    pub fn mark_stopped(&self) {
        let mut last = self.current();
        last.status = ProducerStatus::Stopped;
        last.gesture = None;
        self.publish(last);
    }

    pub fn current(&self) -> InferenceSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InferenceSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for SharedInferenceState {
    fn default() -> Self {
        Self::new()
    }
}
