// Live metrics stream. Each connection is a subscriber: the first one starts
// collection, the last one leaving stops it (unless background collection is on).

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::lifecycle::Subscription;
use crate::models::{ClientMessage, LiveMessage};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_metrics(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    ws.on_upgrade(move |socket| async move {
        let mut subscription = orchestrator.subscribe().await;
        if let Err(e) = stream_metrics(socket, &mut subscription).await {
            tracing::info!("Metrics stream error: {}", e);
        }
        subscription.release().await;
    })
}

/// Send `message` as a text frame. False when the client is gone or too slow.
async fn send_json(socket: &mut WebSocket, message: &LiveMessage) -> anyhow::Result<bool> {
    let json = serde_json::to_string(message)?;
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    Ok(matches!(r, Ok(Ok(()))))
}

async fn stream_metrics(
    mut socket: WebSocket,
    subscription: &mut Subscription,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to metrics stream");

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; skip it so the first ping goes out after one period.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            result = subscription.rx.recv() => {
                match result {
                    Ok(message) => {
                        if !send_json(&mut socket, &message).await? {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /api/ws/metrics client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if ClientMessage::parse(text.as_str()) == Some(ClientMessage::Ping)
                            && !send_json(&mut socket, &LiveMessage::Pong).await?
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "metrics stream receive failed");
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if !matches!(r, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }
    tracing::info!("Client disconnected from metrics stream");
    Ok(())
}
