use std::fmt;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};

/// A chat participant known to the registry or to a peer's cache.
///
/// `timestamp` is the last time the member registered, in milliseconds since
/// the Unix epoch. `None` marks a permanent entry that is never evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    pub ip: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub timestamp: Option<i64>,
}

/// Unique address of a member, `(host, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl Member {
    pub fn new(username: impl Into<String>, ip: impl Into<String>, port: u16, now: i64) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            port,
            timestamp: Some(now),
        }
    }

    /// An infrastructure listener exempt from eviction
    pub fn permanent(username: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            port,
            timestamp: None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.timestamp.is_none()
    }

    pub fn key(&self) -> MemberKey {
        MemberKey {
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    pub fn has_key(&self, ip: &str, port: u16) -> bool {
        self.ip == ip && self.port == port
    }

    /// Registration time rendered in local date and time
    pub fn registered_at(&self) -> String {
        match self.timestamp.and_then(|ts| Local.timestamp_millis_opt(ts).single()) {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "never expires".to_string(),
        }
    }
}

// Older clients echo the port back as the query-string text they were given.
fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
