//! UDP side of the browser bridge
//!
//! A permanent registry member named `server` so that every peer's fan-out
//! also reaches the service. Chat lines received here are republished to
//! WebSocket clients.

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{AppState, Event};
use crate::models::{Envelope, Member};

pub const BRIDGE_USERNAME: &str = "server";

/// Bind the bridge listener, add it to the registry and start forwarding
pub async fn start_bridge(state: &AppState) -> std::io::Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(state.config.bridge_addr()).await?;
    let addr = socket.local_addr()?;
    info!("Listening with UDP on port {} at IP {}", addr.port(), state.config.bridge_ip);

    state.registry.write().await.insert_permanent(Member::permanent(
        BRIDGE_USERNAME,
        state.config.bridge_ip.clone(),
        addr.port(),
    ));

    let event_tx = state.event_tx.clone();
    Ok(tokio::spawn(run_bridge(socket, event_tx)))
}

async fn run_bridge(socket: UdpSocket, event_tx: broadcast::Sender<Event>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                if forward_datagram(&buf[..n], &event_tx) {
                    debug!("bridge: forwarded chat from {}", from);
                }
            }
            Err(e) => warn!("UDP bridge socket error: {}", e),
        }
    }
}

/// Republish a chat datagram. Announcements are ignored, garbage is dropped.
pub fn forward_datagram(raw: &[u8], event_tx: &broadcast::Sender<Event>) -> bool {
    match Envelope::decode(raw) {
        Ok(Envelope::Chat(_)) => {
            metrics::increment_counter!("udpchat_bridge_forwarded_total");
            // no subscribers is fine
            let _ = event_tx.send(Event::Chat(String::from_utf8_lossy(raw).into_owned()));
            true
        }
        Ok(Envelope::Announce(_)) => false,
        Err(e) => {
            warn!("bridge: discarding datagram: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_chat_is_forwarded() {
        let (tx, mut rx) = broadcast::channel(4);

        let chat = br#"{"from":"a","to":"all","message":"hi","timestamp":1,"offset":0.0}"#;
        assert!(forward_datagram(chat, &tx));
        assert!(!forward_datagram(
            br#"{"username":"b","ip":"127.0.0.1","port":1,"timestamp":1}"#,
            &tx
        ));
        assert!(!forward_datagram(b"{oops", &tx));

        assert_eq!(rx.try_recv().unwrap(), Event::Chat(String::from_utf8_lossy(chat).into_owned()));
        assert!(rx.try_recv().is_err());
    }
}
