use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, TrySendError};
use nokhwa::{
    Buffer, Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::rgba_converter::{self, PixelFormat};
use crate::types::Frame;

/// Consecutive read failures after which the camera counts as gone.
const MAX_READ_FAILURES: u32 = 10;
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

// Built-in macOS cameras often reject YUYV even though nokhwa reports it.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Any decodable format, highest rate first; some drivers reject 15 FPS defaults.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: u32,
    pub label: String,
}

/// The capture thread. Dropping it stops the thread, which in turn closes
/// the frame channel.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto).context("failed to enumerate cameras")?;
    Ok(cameras
        .into_iter()
        .filter_map(|info| match info.index() {
            CameraIndex::Index(index) => Some(CameraDevice {
                index: *index,
                label: info.human_name(),
            }),
            CameraIndex::String(_) => None,
        })
        .collect())
}

fn build_camera(index: u32) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(CameraIndex::Index(index), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
        .with_context(|| format!("camera {index} could not be opened"))
}

fn pixel_format(format: FrameFormat) -> PixelFormat {
    match format {
        FrameFormat::NV12 => PixelFormat::Nv12,
        FrameFormat::YUYV => PixelFormat::Yuyv,
        FrameFormat::MJPEG => PixelFormat::Mjpeg,
        FrameFormat::RAWRGB => PixelFormat::Rgb,
        FrameFormat::RAWBGR => PixelFormat::Bgr,
        FrameFormat::GRAY => PixelFormat::Gray,
    }
}

fn convert(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    rgba_converter::to_frame(
        pixel_format(buffer.source_frame_format()),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureEnd {
    Stopped,
    ReceiverGone,
    ReadFailed,
}

/// Reads, decodes and forwards frames until stopped, the receiver goes away
/// or reads keep failing. The channel closes once the caller drops `frame_tx`.
fn forward_frames<B>(
    mut read: impl FnMut() -> Result<B>,
    mut decode: impl FnMut(&B) -> Result<Frame>,
    stop: &AtomicBool,
    frame_tx: &Sender<Frame>,
    retry_delay: Duration,
) -> CaptureEnd {
    let mut failures = 0;

    while !stop.load(Ordering::Relaxed) {
        let buffer = match read() {
            Ok(buffer) => {
                failures = 0;
                buffer
            }
            Err(err) => {
                failures += 1;
                if failures >= MAX_READ_FAILURES {
                    log::error!("camera read failed {failures} times in a row, giving up: {err:#}");
                    return CaptureEnd::ReadFailed;
                }
                log::warn!("camera frame read failed ({failures}/{MAX_READ_FAILURES}): {err:#}");
                thread::sleep(retry_delay);
                continue;
            }
        };

        let frame = match decode(&buffer) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("failed to decode camera frame: {err:#}");
                continue;
            }
        };

        // A full slot means the producer is busy; it only wants the newest frame.
        match frame_tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => return CaptureEnd::ReceiverGone,
        }
    }
    CaptureEnd::Stopped
}

/// Opens camera `index` and forwards converted frames to `frame_tx` until
/// stopped, the receiver goes away or the camera stops delivering. The
/// channel closes in every case, which ends the inference loop.
pub fn start_camera_stream(index: u32, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    let check = build_camera(index)?;
    log::info!(
        "camera {index} opened at {:?} ({:?})",
        check.resolution(),
        check.frame_format()
    );
    drop(check);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("camera".into())
        .spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to reopen camera: {err:#}");
                    return;
                }
            };

            let end = forward_frames(
                || Ok(camera.frame()?),
                convert,
                &stop_flag,
                &frame_tx,
                READ_RETRY_DELAY,
            );
            log::info!("camera {index} released ({end:?})");
        })
        .context("failed to spawn camera thread")?;

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use crossbeam_channel::{bounded, unbounded};

    use super::*;

    fn frame(value: u8) -> Frame {
        Frame::new(vec![value; 4], 1, 1).unwrap()
    }

    fn scripted(reads: Vec<Result<u8>>) -> impl FnMut() -> Result<u8> {
        let mut reads: VecDeque<Result<u8>> = reads.into();
        move || reads.pop_front().unwrap_or_else(|| Err(anyhow!("device unplugged")))
    }

    #[test]
    fn unplugged_camera_gives_up_after_repeated_failures() {
        let (tx, rx) = unbounded();
        let mut attempts = 0;
        let end = forward_frames(
            || {
                attempts += 1;
                Err::<u8, _>(anyhow!("device unplugged"))
            },
            |v: &u8| Ok(frame(*v)),
            &AtomicBool::new(false),
            &tx,
            Duration::ZERO,
        );
        assert_eq!(end, CaptureEnd::ReadFailed);
        assert_eq!(attempts, MAX_READ_FAILURES);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn a_good_read_resets_the_failure_count() {
        let glitch = MAX_READ_FAILURES as usize - 1;
        let mut reads = Vec::new();
        for value in [1, 2] {
            reads.extend((0..glitch).map(|_| Err(anyhow!("timeout"))));
            reads.push(Ok(value));
        }
        let (tx, rx) = unbounded();
        let end = forward_frames(
            scripted(reads),
            |v: &u8| Ok(frame(*v)),
            &AtomicBool::new(false),
            &tx,
            Duration::ZERO,
        );
        assert_eq!(end, CaptureEnd::ReadFailed);
        let delivered: Vec<u8> = rx.try_iter().map(|f| f.rgba[0]).collect();
        assert_eq!(delivered, vec![1, 2]);
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let (tx, rx) = unbounded();
        forward_frames(
            scripted(vec![Ok(1), Ok(0), Ok(3)]),
            |v: &u8| {
                if *v == 0 {
                    Err(anyhow!("corrupt MJPEG"))
                } else {
                    Ok(frame(*v))
                }
            },
            &AtomicBool::new(false),
            &tx,
            Duration::ZERO,
        );
        let delivered: Vec<u8> = rx.try_iter().map(|f| f.rgba[0]).collect();
        assert_eq!(delivered, vec![1, 3]);
    }

    #[test]
    fn dropped_receiver_and_stop_flag_end_the_loop() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let end = forward_frames(
            || Ok(7u8),
            |v: &u8| Ok(frame(*v)),
            &AtomicBool::new(false),
            &tx,
            Duration::ZERO,
        );
        assert_eq!(end, CaptureEnd::ReceiverGone);

        let (tx, _rx) = bounded(1);
        let end = forward_frames(
            || Ok(7u8),
            |v: &u8| Ok(frame(*v)),
            &AtomicBool::new(true),
            &tx,
            Duration::ZERO,
        );
        assert_eq!(end, CaptureEnd::Stopped);
    }
}
