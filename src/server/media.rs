use std::{convert::Infallible, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::{pipeline::SharedInferenceState, types::ProducerStatus};

pub const BOUNDARY: &str = "frame";
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart section holding a JPEG.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// The newest published frame per tick. A frame is sent once; ticks without
/// a new frame are skipped. Ends when the producer stops or on shutdown.
pub fn mjpeg_parts(
    state: SharedInferenceState,
    interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = Bytes> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_sent = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = state.current();
            if snapshot.status == ProducerStatus::Stopped {
                break;
            }
            if last_sent == Some(snapshot.sequence) {
                continue;
            }
            if let Some(jpeg) = &snapshot.frame_jpeg {
                last_sent = Some(snapshot.sequence);
                yield multipart_part(jpeg);
            }
        }
    }
}

pub(super) async fn video_feed(State(app): State<AppState>) -> Response {
    log::info!("video client connected");
    let parts = mjpeg_parts(
        app.state.clone(),
        app.feed.media_interval,
        app.shutdown.child_token(),
    )
    .map(Ok::<_, Infallible>);

    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InferenceSnapshot;

    fn with_frame(jpeg: &'static [u8]) -> InferenceSnapshot {
        InferenceSnapshot {
            frame_jpeg: Some(Bytes::from_static(jpeg)),
            status: ProducerStatus::Running,
            ..InferenceSnapshot::default()
        }
    }

    #[test]
    fn part_carries_boundary_and_content_type() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let mut expected = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(part.as_ref(), expected.as_slice());
        assert!(MJPEG_CONTENT_TYPE.ends_with(&format!("boundary={BOUNDARY}")));
    }

    #[tokio::test(start_paused = true)]
    async fn each_frame_is_sent_once_until_the_producer_stops() {
        let state = SharedInferenceState::new();
        state.publish(with_frame(b"first"));

        let parts = mjpeg_parts(
            state.clone(),
            Duration::from_millis(50),
            CancellationToken::new(),
        );
        futures::pin_mut!(parts);

        let first = parts.next().await.unwrap();
        assert!(first.ends_with(b"first\r\n"));

        let publisher = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            publisher.publish(with_frame(b"second"));
            tokio::time::sleep(Duration::from_millis(500)).await;
            publisher.mark_stopped();
        });

        let start = tokio::time::Instant::now();
        let second = parts.next().await.unwrap();
        assert!(second.ends_with(b"second\r\n"));
        assert!(start.elapsed() >= Duration::from_millis(500));

        assert!(parts.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_before_the_first_frame() {
        let shutdown = CancellationToken::new();
        let parts = mjpeg_parts(
            SharedInferenceState::new(),
            Duration::from_millis(50),
            shutdown.clone(),
        );
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let collected: Vec<Bytes> = parts.collect().await;
        assert!(collected.is_empty());
    }
}
