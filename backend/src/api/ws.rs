//! WebSocket side of the browser bridge
//!
//! Browsers receive every chat line that reaches the UDP bridge listener and
//! may inject chat lines of their own, which are fanned out to every
//! registered member. They also get the clock handshake over the same socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::api::{AppState, Event};
use crate::clocksync::{now_millis, stamp_reply};
use crate::models::{Envelope, MemberKey};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Event>(16);
    let mut events = state.event_tx.subscribe();
    info!("WebSocket client connected");

    // Forward broadcast chat and per-connection replies to the browser
    let mut forward = tokio::spawn(async move {
        if send_event(&mut sender, &Event::Welcome).await.is_err() {
            return;
        }
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagging, skipped {} message(s)", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    if let Some(reply) = handle_frame(&state, &text).await {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut forward => inbound.abort(),
        _ = &mut inbound => forward.abort(),
    }
    info!("WebSocket client disconnected");
}

async fn send_event<S>(sender: &mut S, event: &Event) -> Result<(), axum::Error>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(text)).await
}

/// Apply one browser frame; returns the reply for this connection, if any
pub async fn handle_frame(state: &AppState, text: &str) -> Option<Event> {
    let frame: Event = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Discarding WebSocket frame: {}", e);
            return None;
        }
    };

    match frame {
        Event::Chat(raw) => {
            match Envelope::decode(raw.as_bytes()) {
                Ok(Envelope::Chat(_)) => {}
                Ok(other) => {
                    warn!("Discarding WebSocket {} envelope, only chat is relayed", other.kind());
                    return None;
                }
                Err(e) => {
                    warn!("Discarding WebSocket chat: {}", e);
                    return None;
                }
            }

            let Some(fanout) = &state.fanout else {
                warn!("No outbound socket configured, dropping browser chat");
                return None;
            };
            let targets: Vec<MemberKey> = state
                .registry
                .read()
                .await
                .snapshot()
                .iter()
                .map(|m| m.key())
                .collect();
            let sent = fanout.send_raw(raw.as_bytes(), &targets).await;
            debug!("relayed browser chat to {} member(s)", sent);
            None
        }
        Event::Ntp(t1) => {
            let t2 = now_millis();
            let t3 = now_millis();
            match stamp_reply(&t1, t2, t3) {
                Ok(reply) => Some(Event::Ntp(reply)),
                Err(e) => {
                    warn!("Bad clock request over WebSocket: {}", e);
                    None
                }
            }
        }
        Event::Welcome => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::MemberRegistry;

    fn state() -> AppState {
        let config = Config::default();
        AppState::new(MemberRegistry::new(config.client_timeout()).shared(), config)
    }

    #[test]
    fn test_event_frames() {
        let frame = serde_json::to_value(Event::Chat("{}".into())).unwrap();
        assert_eq!(frame, serde_json::json!({"type": "message", "data": "{}"}));

        let welcome = serde_json::to_value(Event::Welcome).unwrap();
        assert_eq!(welcome, serde_json::json!({"type": "welcome"}));
    }

    #[tokio::test]
    async fn test_ntp_frame_is_stamped() {
        let reply = handle_frame(&state(), r#"{"type":"ntp","data":"1000"}"#).await;
        let Some(Event::Ntp(reply)) = reply else {
            panic!("expected ntp reply");
        };
        let (t1, t2, t3) = crate::clocksync::parse_reply(&reply).unwrap();
        assert_eq!(t1, 1000);
        assert!(t2 <= t3);
    }

    #[tokio::test]
    async fn test_garbage_frames_are_ignored() {
        assert!(handle_frame(&state(), "not json").await.is_none());
        assert!(handle_frame(&state(), r#"{"type":"message","data":"{\"x\":1}"}"#)
            .await
            .is_none());
    }
}
