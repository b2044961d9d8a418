use std::{
    fmt,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::{
    annotate::{self, Overlay},
    buffer::SequenceBuffer,
    classifier::SequenceClassifier,
    features::{Extraction, FeatureExtractor},
    smoother::{SmootherConfig, TemporalSmoother},
    source::FrameSource,
    state::{InferenceSnapshot, SharedInferenceState},
};
use crate::{
    error::FrameError,
    models::{ModelSet, ObjectDetector},
    types::{Frame, GestureKind, ProducerStatus, SEQUENCE_LENGTH, SmoothedGesture},
};

/// Where the producer is in its per-frame cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Capturing,
    Extracting,
    Buffering,
    Classifying,
    Smoothing,
    Publishing,
    Stopped,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Capturing => "capturing",
            LoopPhase::Extracting => "extracting",
            LoopPhase::Buffering => "buffering",
            LoopPhase::Classifying => "classifying",
            LoopPhase::Smoothing => "smoothing",
            LoopPhase::Publishing => "publishing",
            LoopPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Clear the sequence window and the prediction history.
    Reset,
    Stop,
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Wait between iterations. Commands cut it short.
    pub pacing: Duration,
    pub mirror: bool,
    /// Draw landmarks and status onto the published frame.
    pub annotate: bool,
    pub jpeg_quality: u8,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(50),
            mirror: true,
            annotate: true,
            jpeg_quality: 80,
        }
    }
}

struct FrameOutcome {
    extraction: Extraction,
    gesture: Option<SmoothedGesture>,
}

/// The producer: frames in, one published snapshot per frame out.
pub struct InferenceLoop {
    source: Box<dyn FrameSource>,
    object_detector: Option<Box<dyn ObjectDetector>>,
    extractor: FeatureExtractor,
    buffer: SequenceBuffer,
    classifier: SequenceClassifier,
    smoother: TemporalSmoother,
    state: SharedInferenceState,
    config: LoopConfig,
    phase: LoopPhase,
    frames_processed: u64,
    frame_errors: u64,
}

impl InferenceLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        models: ModelSet,
        smoother: SmootherConfig,
        state: SharedInferenceState,
        config: LoopConfig,
    ) -> Self {
        Self {
            source,
            object_detector: models.object_detector,
            extractor: FeatureExtractor::new(models.hands, models.pose),
            buffer: SequenceBuffer::with_capacity(SEQUENCE_LENGTH),
            classifier: SequenceClassifier::new(models.sequence, GestureKind::COUNT),
            smoother: TemporalSmoother::new(smoother),
            state,
            config,
            phase: LoopPhase::Idle,
            frames_processed: 0,
            frame_errors: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
        self.smoother.reset();
        log::info!("sequence buffer and prediction history cleared");
    }

    /// Runs on a dedicated thread until the source ends, a `Stop` arrives or
    /// every command sender is dropped.
    pub fn spawn(self) -> Result<InferenceHandle> {
        let (commands, command_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("inference".into())
            .spawn(move || self.run(command_rx))
            .context("failed to spawn inference thread")?;
        Ok(InferenceHandle {
            commands,
            handle: Some(handle),
        })
    }

    pub fn run(mut self, commands: Receiver<Command>) {
        log::info!("inference loop started");
        loop {
            self.phase = LoopPhase::Capturing;
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("frame source ended");
                    break;
                }
                Err(err) => {
                    log::error!("frame capture failed: {err:#}");
                    break;
                }
            };

            self.process(frame);

            match commands.recv_timeout(self.config.pacing) {
                Ok(Command::Reset) => self.reset(),
                Ok(Command::Stop) => {
                    log::info!("inference loop stop requested");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.phase = LoopPhase::Stopped;
        self.state.mark_stopped();
        log::info!(
            "inference loop stopped after {} frames ({} failed)",
            self.frames_processed,
            self.frame_errors
        );
    }

    /// Runs one frame through the pipeline and publishes the result. A
    /// failing frame publishes "no gesture" and is counted.
    pub fn process(&mut self, mut frame: Frame) -> Option<SmoothedGesture> {
        let started = Instant::now();
        if self.config.mirror {
            frame.mirror_horizontal();
        }
        self.frames_processed += 1;

        let outcome = match self.run_stages(&frame) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                self.frame_errors += 1;
                log::warn!("{err}");
                None
            }
        };
        let gesture = outcome.as_ref().and_then(|o| o.gesture);
        let reached = self.phase;

        self.phase = LoopPhase::Publishing;
        let frame_jpeg = self.encode_frame(&frame, outcome.as_ref());
        self.state.publish(InferenceSnapshot {
            gesture,
            frame_jpeg,
            status: ProducerStatus::Running,
            buffered: self.buffer.len(),
            frames_processed: self.frames_processed,
            frame_errors: self.frame_errors,
            ..InferenceSnapshot::default()
        });

        log::trace!(
            "frame {} reached {reached} in {:?}: {:?}",
            self.frames_processed,
            started.elapsed(),
            gesture
        );
        gesture
    }

    fn run_stages(&mut self, frame: &Frame) -> Result<FrameOutcome, FrameError> {
        let frame_no = self.frames_processed;

        self.phase = LoopPhase::Extracting;
        let bbox = match self.object_detector.as_mut() {
            Some(detector) => detector
                .detect(frame)
                .context("object detection failed")
                .map_err(frame_error(frame_no, LoopPhase::Extracting))?,
            None => None,
        };
        let extraction = self
            .extractor
            .extract(frame, bbox)
            .map_err(frame_error(frame_no, LoopPhase::Extracting))?;

        self.phase = LoopPhase::Buffering;
        self.buffer.append(extraction.features);

        self.phase = LoopPhase::Classifying;
        let prediction = self
            .classifier
            .classify(&self.buffer)
            .map_err(frame_error(frame_no, LoopPhase::Classifying))?;

        self.phase = LoopPhase::Smoothing;
        let gesture = prediction.and_then(|p| self.smoother.update(p));

        Ok(FrameOutcome {
            extraction,
            gesture,
        })
    }

    fn encode_frame(&self, frame: &Frame, outcome: Option<&FrameOutcome>) -> Option<Bytes> {
        let overlay = Overlay {
            extraction: outcome.map(|o| &o.extraction),
            buffered: self.buffer.len(),
            capacity: self.buffer.capacity(),
            gesture: outcome.and_then(|o| o.gesture),
        };
        let overlay = self.config.annotate.then_some(&overlay);
        match annotate::render_jpeg(frame, overlay, self.config.jpeg_quality) {
            Ok(jpeg) => Some(jpeg),
            Err(err) => {
                log::warn!("frame {}: {err:#}", self.frames_processed);
                None
            }
        }
    }
}

fn frame_error(frame: u64, phase: LoopPhase) -> impl FnOnce(anyhow::Error) -> FrameError {
    move |source| FrameError {
        frame,
        phase,
        source,
    }
}

/// Owner of the inference thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct InferenceHandle {
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceHandle {
    /// A sender for other owners, e.g. the reset route.
    pub fn commands(&self) -> Sender<Command> {
        self.commands.clone()
    }

    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("inference thread panicked");
            }
        }
    }
}

impl Drop for InferenceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
