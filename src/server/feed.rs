use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::{
    pipeline::{GestureMessage, SharedInferenceState},
    types::ProducerStatus,
};

/// The current gesture on every tick, whether or not it changed. Ends after
/// the sentinel once the producer has stopped, or when `shutdown` fires.
pub fn gesture_updates(
    state: SharedInferenceState,
    interval: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = GestureMessage> {
    async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = state.current();
            yield snapshot.message();
            if snapshot.status == ProducerStatus::Stopped {
                break;
            }
        }
    }
}

pub(super) async fn gesture_socket(
    ws: WebSocketUpgrade,
    State(app): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, app))
}

async fn serve_socket(mut socket: WebSocket, app: AppState) {
    log::info!("gesture client connected");
    let updates = gesture_updates(
        app.state.clone(),
        app.feed.gesture_interval,
        app.shutdown.child_token(),
    );
    futures::pin_mut!(updates);

    loop {
        let message = tokio::select! {
            next = updates.next() => match next {
                Some(message) => message,
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("gesture client disconnected");
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    log::debug!("gesture client read failed: {err}");
                    return;
                }
            },
        };

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                log::error!("failed to encode gesture message: {err}");
                break;
            }
        };
        if let Err(err) = socket.send(Message::Text(text.into())).await {
            log::debug!("gesture client went away: {err}");
            return;
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    log::info!("gesture feed closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::InferenceSnapshot,
        types::{GestureKind, SmoothedGesture},
    };

    fn running(confidence: f32) -> InferenceSnapshot {
        InferenceSnapshot {
            gesture: Some(SmoothedGesture {
                kind: GestureKind::DynamicServeLeft,
                confidence,
            }),
            status: ProducerStatus::Running,
            ..InferenceSnapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_state_is_resent_every_tick() {
        let state = SharedInferenceState::new();
        state.publish(running(0.9));

        let updates = gesture_updates(
            state.clone(),
            Duration::from_millis(200),
            CancellationToken::new(),
        );
        let messages: Vec<GestureMessage> = updates.take(3).collect().await;

        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m == &messages[0]));
        assert_eq!(messages[0].gesture, "DynamicServeLeft");
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_interval() {
        let state = SharedInferenceState::new();
        let updates = gesture_updates(state, Duration::from_millis(200), CancellationToken::new());
        futures::pin_mut!(updates);

        let start = tokio::time::Instant::now();
        updates.next().await;
        updates.next().await;
        updates.next().await;
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_producer_ends_the_feed_with_the_sentinel() {
        let state = SharedInferenceState::new();
        state.publish(running(0.95));
        state.mark_stopped();

        let messages: Vec<GestureMessage> =
            gesture_updates(state, Duration::from_millis(200), CancellationToken::new())
                .collect()
                .await;
        assert_eq!(messages, vec![GestureMessage::no_gesture()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_feed() {
        let shutdown = CancellationToken::new();
        let updates = gesture_updates(
            SharedInferenceState::new(),
            Duration::from_millis(200),
            shutdown.clone(),
        );
        futures::pin_mut!(updates);
        assert!(updates.next().await.is_some());
        shutdown.cancel();
        assert!(updates.next().await.is_none());
    }
}
