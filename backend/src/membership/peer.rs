//! Peer runtime
//!
//! `Peer::join` performs the blocking startup (clock handshake, bind,
//! registration, announce). `Peer::run` is the steady state: one dispatch
//! loop consuming heartbeat ticks, inbound datagrams and outgoing chat lines.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clocksync::{now_millis, ClockSample, ClockSyncClient};
use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::fanout::{classify, Fanout, Received};
use crate::membership::{MembershipCache, RegistryClient};
use crate::models::{AnnounceEnvelope, ChatEnvelope, Envelope, MemberKey};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Inputs to the dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    HeartbeatTick,
    EnvelopeReceived { payload: Vec<u8>, from: SocketAddr },
    Outgoing(String),
}

pub struct Peer {
    username: String,
    ip: String,
    port: u16,
    clock: ClockSample,
    socket: Arc<UdpSocket>,
    fanout: Fanout,
    registry: RegistryClient,
    cache: MembershipCache,
    heartbeat_interval: Duration,
    announced: bool,
}

impl Peer {
    /// Synchronize the clock, bind, register and announce.
    ///
    /// A failed clock handshake or bind aborts the join. A failed
    /// registration does not: the cache stays empty and the next heartbeat
    /// retries.
    pub async fn join(config: &PeerConfig) -> Result<Self, PeerError> {
        let mut clock = ClockSyncClient::new(config.ntp_addr(), config.clock_sync_timeout());
        let sample = clock.synchronize().await?;

        let bind_addr = format!("{}:{}", config.ip, config.port);
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|source| PeerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let port = socket.local_addr()?.port();
        info!("Listening with UDP on port {} at IP {}", port, config.ip);

        let socket = Arc::new(socket);
        let mut peer = Peer {
            username: config.username.clone(),
            ip: config.ip.clone(),
            port,
            clock: sample,
            fanout: Fanout::new(socket.clone()),
            socket,
            registry: RegistryClient::new(&config.registry_host, config.registry_port)?,
            cache: MembershipCache::new(),
            heartbeat_interval: config.heartbeat_interval(),
            announced: false,
        };

        if let Err(e) = peer.heartbeat().await {
            warn!("Initial registration failed, retrying on next heartbeat: {}", e);
        }

        Ok(peer)
    }

    /// Re-register and overwrite the cache with the fresh snapshot.
    ///
    /// On error the previous cache is kept. The first successful
    /// registration also pushes an announcement to everyone it returned.
    pub async fn heartbeat(&mut self) -> Result<usize, PeerError> {
        let snapshot = self
            .registry
            .register(&self.username, &self.ip, self.port)
            .await?;
        self.cache.replace(snapshot);
        debug!("heartbeat: cache refreshed members={}", self.cache.len());

        if !self.announced {
            self.announce().await?;
            self.announced = true;
        }
        Ok(self.cache.len())
    }

    async fn announce(&self) -> Result<usize, PeerError> {
        let announce = AnnounceEnvelope::for_member(&self.username, &self.ip, self.port, now_millis());
        let sent = self
            .fanout
            .send(&Envelope::Announce(announce), &self.cache.targets())
            .await?;
        info!("Announced to {} member(s)", sent);
        Ok(sent)
    }

    /// Send a chat line to every cached member
    pub async fn send_chat(&self, message: &str) -> Result<usize, PeerError> {
        let chat = ChatEnvelope::to_all(&self.username, message, now_millis(), self.clock.offset());
        Ok(self.fanout.send(&Envelope::Chat(chat), &self.cache.targets()).await?)
    }

    /// Apply one inbound payload. Returns a chat line to display, if any.
    pub fn handle_datagram(&mut self, payload: &[u8], from: SocketAddr) -> Option<ChatEnvelope> {
        match classify(payload) {
            Ok(Received::Display(chat)) => Some(chat),
            Ok(Received::CacheUpdate(announce)) => {
                let key = format!("{}:{}", announce.ip, announce.port);
                if self.cache.on_announce(announce) {
                    info!("announce: new member {} members={}", key, self.cache.len());
                } else {
                    debug!("announce: already known {}", key);
                }
                None
            }
            Err(e) => {
                warn!("Discarding datagram from {}: {}", from, e);
                None
            }
        }
    }

    /// Wait for one datagram and apply it
    pub async fn receive_datagram(&mut self) -> Result<Option<ChatEnvelope>, PeerError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        Ok(self.handle_datagram(&buf[..n], from))
    }

    pub async fn dispatch(&mut self, event: PeerEvent) -> Option<ChatEnvelope> {
        match event {
            PeerEvent::HeartbeatTick => {
                if let Err(e) = self.heartbeat().await {
                    warn!("Heartbeat failed, keeping {} cached member(s): {}", self.cache.len(), e);
                }
                None
            }
            PeerEvent::EnvelopeReceived { payload, from } => self.handle_datagram(&payload, from),
            PeerEvent::Outgoing(line) => {
                if !line.is_empty() {
                    if let Err(e) = self.send_chat(&line).await {
                        warn!("Failed to send chat message: {}", e);
                    }
                }
                None
            }
        }
    }

    /// Steady state until `outgoing` closes or `display` is dropped
    pub async fn run(
        mut self,
        mut outgoing: mpsc::Receiver<String>,
        display: mpsc::Sender<ChatEnvelope>,
    ) -> Result<(), PeerError> {
        let socket = self.socket.clone();
        let mut ticker = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        info!("Configured heartbeat interval: {:?}", self.heartbeat_interval);

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => PeerEvent::HeartbeatTick,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, from)) => PeerEvent::EnvelopeReceived { payload: buf[..n].to_vec(), from },
                    Err(e) => {
                        warn!("UDP socket error: {}", e);
                        continue;
                    }
                },
                line = outgoing.recv() => match line {
                    Some(line) => PeerEvent::Outgoing(line),
                    None => break,
                },
            };

            if let Some(chat) = self.dispatch(event).await {
                if display.send(chat).await.is_err() {
                    break;
                }
            }
        }

        info!("Leaving chat session");
        Ok(())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn local_key(&self) -> MemberKey {
        MemberKey {
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    pub fn clock(&self) -> ClockSample {
        self.clock
    }

    pub fn offset(&self) -> f64 {
        self.clock.offset()
    }

    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }
}
