//! Broadcast Fan-out
//!
//! Best-effort unicast of one payload to every target address. No
//! acknowledgement, retry or cross-address ordering.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::models::{AnnounceEnvelope, ChatEnvelope, DecodeError, Envelope, MemberKey};

/// What an inbound datagram means for the receiver
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A chat line to show to the user
    Display(ChatEnvelope),
    /// A member to add to the local cache
    CacheUpdate(AnnounceEnvelope),
}

/// Classify an inbound payload. Failures are recoverable; callers log and drop.
pub fn classify(raw: &[u8]) -> Result<Received, DecodeError> {
    match Envelope::decode(raw)? {
        Envelope::Chat(chat) => Ok(Received::Display(chat)),
        Envelope::Announce(announce) => Ok(Received::CacheUpdate(announce)),
    }
}

#[derive(Debug, Clone)]
pub struct Fanout {
    socket: Arc<UdpSocket>,
}

impl Fanout {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        Ok(Self::new(Arc::new(UdpSocket::bind(addr).await?)))
    }

    /// Serialize once and send one datagram per target
    pub async fn send(&self, envelope: &Envelope, targets: &[MemberKey]) -> Result<usize, serde_json::Error> {
        let payload = envelope.encode()?;
        Ok(self.send_raw(&payload, targets).await)
    }

    /// Returns the number of datagrams handed to the transport
    pub async fn send_raw(&self, payload: &[u8], targets: &[MemberKey]) -> usize {
        let mut sent = 0;
        for target in targets {
            match self.socket.send_to(payload, (target.ip.as_str(), target.port)).await {
                Ok(_) => sent += 1,
                Err(e) => warn!("send to {} failed: {}", target, e),
            }
        }
        debug!("fan-out: sent={} targets={}", sent, targets.len());
        sent
    }
}
