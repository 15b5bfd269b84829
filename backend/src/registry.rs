//! Member Registry
//!
//! The authoritative table of known peers. A single `MemberRegistry` is owned
//! by the service behind a `tokio::sync::RwLock`; registration handlers and the
//! eviction sweep take the write lock so no entry is ever observed half-updated.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::models::Member;

pub type SharedRegistry = Arc<RwLock<MemberRegistry>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid member: {0}")]
    InvalidMember(String),
}

/// Raw registration parameters as received from the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub ip: Option<String>,
    pub port: Option<String>,
}

impl RegisterRequest {
    pub fn new(username: &str, ip: &str, port: u16) -> Self {
        Self {
            username: Some(username.to_string()),
            ip: Some(ip.to_string()),
            port: Some(port.to_string()),
        }
    }

    fn validate(&self) -> Result<(String, String, u16), RegistryError> {
        let username = self
            .username
            .as_deref()
            .ok_or_else(|| RegistryError::InvalidMember("missing username".into()))?;

        let ip = self
            .ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| RegistryError::InvalidMember("missing ip".into()))?;

        let raw_port = self
            .port
            .as_deref()
            .ok_or_else(|| RegistryError::InvalidMember("missing port".into()))?;
        let port = raw_port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| RegistryError::InvalidMember(format!("bad port '{}'", raw_port)))?;

        Ok((username.to_string(), ip.to_string(), port))
    }
}

#[derive(Debug, Clone)]
pub struct MemberRegistry {
    members: Vec<Member>,
    ttl_ms: i64,
}

impl MemberRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            members: Vec::new(),
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Register (or refresh) a member and return everyone else.
    ///
    /// An existing entry with the same `(ip, port)` is removed first, so the
    /// returned snapshot never contains the caller.
    pub fn register(&mut self, request: &RegisterRequest, now: i64) -> Result<Vec<Member>, RegistryError> {
        let (username, ip, port) = request.validate()?;

        let refreshed = self.remove(&ip, port).is_some();
        let others = self.members.clone();
        let member = Member::new(username, ip, port, now);

        if refreshed {
            debug!("Refreshing member: {:?}", member);
        } else {
            info!("Registering member: {:?}", member);
        }
        self.members.push(member);

        Ok(others)
    }

    /// Insert an entry that the sweep never evicts
    pub fn insert_permanent(&mut self, member: Member) {
        self.remove(&member.ip, member.port);
        info!("Adding permanent member: {:?}", member);
        self.members.push(Member {
            timestamp: None,
            ..member
        });
    }

    /// Evict every non-permanent member older than the TTL
    pub fn sweep(&mut self, now: i64) -> Vec<Member> {
        let ttl_ms = self.ttl_ms;
        let (expired, alive): (Vec<Member>, Vec<Member>) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| matches!(m.timestamp, Some(ts) if now - ts > ttl_ms));
        self.members = alive;

        for member in &expired {
            info!("Removing member: {:?}", member);
        }
        expired
    }

    pub fn snapshot(&self) -> Vec<Member> {
        self.members.clone()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms as u64)
    }

    fn remove(&mut self, ip: &str, port: u16) -> Option<Member> {
        let index = self.members.iter().position(|m| m.has_key(ip, port))?;
        Some(self.members.remove(index))
    }
}

/// Run the eviction sweep on a fixed interval for the process lifetime
pub fn spawn_sweeper(registry: SharedRegistry, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Eviction sweep running every {:?}", every);

        loop {
            ticker.tick().await;
            let mut guard = registry.write().await;
            let evicted = guard.sweep(Utc::now().timestamp_millis());
            if !evicted.is_empty() {
                metrics::counter!("udpchat_evictions_total", evicted.len() as u64);
                metrics::gauge!("udpchat_members", guard.len() as f64);
                info!("members pruned: evicted={} remaining={}", evicted.len(), guard.len());
            }
        }
    })
}
