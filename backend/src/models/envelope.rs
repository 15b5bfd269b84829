//! Datagram envelopes exchanged between peers
//!
//! The wire format is a bare JSON object. The kind is recognised by its
//! fields: a `username` key marks an announcement, a `message` key marks a
//! chat line. Anything else is rejected at decode time.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Member;

/// Recipient selector of a chat envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    #[serde(rename = "all")]
    All,
}

/// A broadcast chat line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatEnvelope {
    pub from: String,
    pub to: Recipient,
    pub message: String,
    /// Sender's local clock at send time, ms since the Unix epoch
    pub timestamp: i64,
    /// Sender's clock offset against the reference service, in ms
    pub offset: f64,
}

/// Pushes a newly joined member to peers outside the heartbeat cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceEnvelope {
    pub username: String,
    pub ip: String,
    pub port: u16,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Announce(AnnounceEnvelope),
    Chat(ChatEnvelope),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("payload is neither an announcement nor a chat message")]
    UnknownKind,

    #[error("malformed {kind} envelope: {source}")]
    Schema {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ChatEnvelope {
    pub fn to_all(from: impl Into<String>, message: impl Into<String>, timestamp: i64, offset: f64) -> Self {
        Self {
            from: from.into(),
            to: Recipient::All,
            message: message.into(),
            timestamp,
            offset,
        }
    }

    /// Origin timestamp corrected by the sender's declared offset.
    ///
    /// Falls back to the raw timestamp when the correction leaves the `i64`
    /// range; `as` saturates the rounded offset.
    pub fn corrected_millis(&self) -> i64 {
        self.timestamp
            .checked_add(self.offset.round() as i64)
            .unwrap_or(self.timestamp)
    }

    pub fn corrected_time(&self) -> Option<DateTime<Local>> {
        Local.timestamp_millis_opt(self.corrected_millis()).single()
    }

    /// `[date time] from: message`
    pub fn display_line(&self) -> String {
        let stamp = self
            .corrected_time()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.corrected_millis().to_string());
        format!("[{}] {}: {}", stamp, self.from, self.message)
    }
}

impl AnnounceEnvelope {
    pub fn for_member(username: impl Into<String>, ip: impl Into<String>, port: u16, now: i64) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            port,
            timestamp: now,
        }
    }
}

impl From<AnnounceEnvelope> for Member {
    fn from(announce: AnnounceEnvelope) -> Self {
        Member {
            username: announce.username,
            ip: announce.ip,
            port: announce.port,
            timestamp: Some(announce.timestamp),
        }
    }
}

impl Envelope {
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(raw).map_err(DecodeError::InvalidJson)?;
        let object = value.as_object().ok_or(DecodeError::UnknownKind)?;

        if object.contains_key("username") {
            serde_json::from_value(value)
                .map(Envelope::Announce)
                .map_err(|source| DecodeError::Schema { kind: "announce", source })
        } else if object.contains_key("message") {
            serde_json::from_value(value)
                .map(Envelope::Chat)
                .map_err(|source| DecodeError::Schema { kind: "chat", source })
        } else {
            Err(DecodeError::UnknownKind)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Announce(_) => "announce",
            Envelope::Chat(_) => "chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_chat() {
        let raw = json!({
            "from": "alice",
            "to": "all",
            "message": "hello",
            "timestamp": 1000,
            "offset": -0.5
        })
        .to_string();

        match Envelope::decode(raw.as_bytes()).unwrap() {
            Envelope::Chat(chat) => {
                assert_eq!(chat.from, "alice");
                assert_eq!(chat.to, Recipient::All);
                assert_eq!(chat.offset, -0.5);
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_announce() {
        let raw = br#"{"username":"bob","ip":"127.0.0.1","port":5000,"timestamp":42}"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(envelope.kind(), "announce");
        let Envelope::Announce(announce) = envelope else {
            panic!("expected announce");
        };
        let member = Member::from(announce);
        assert_eq!(member.key().to_string(), "127.0.0.1:5000");
        assert_eq!(member.timestamp, Some(42));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let err = Envelope::decode(br#"{"hello":"world"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind));

        let err = Envelope::decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = Envelope::decode(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_incomplete_chat() {
        let err = Envelope::decode(br#"{"message":"hi","from":"x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Schema { kind: "chat", .. }));
    }

    #[test]
    fn test_chat_encodes_flat_object() {
        let chat = Envelope::Chat(ChatEnvelope::to_all("carol", "yo", 10, 2.0));
        let value: Value = serde_json::from_slice(&chat.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"from": "carol", "to": "all", "message": "yo", "timestamp": 10, "offset": 2.0})
        );
    }

    #[test]
    fn test_corrected_millis_applies_offset() {
        let chat = ChatEnvelope::to_all("dave", "x", 1_000, 250.4);
        assert_eq!(chat.corrected_millis(), 1_250);
        assert!(chat.display_line().ends_with("] dave: x"));
    }

    #[test]
    fn test_extreme_stamps_fall_back_to_raw_timestamp() {
        let chat = ChatEnvelope::to_all("eve", "boom", i64::MAX, 1.0);
        assert_eq!(chat.corrected_millis(), i64::MAX);
        assert!(chat.display_line().ends_with("eve: boom"));

        let chat = ChatEnvelope::to_all("eve", "boom", i64::MIN, -5.0);
        assert_eq!(chat.corrected_millis(), i64::MIN);
        assert!(chat.display_line().ends_with("eve: boom"));

        let chat = ChatEnvelope::to_all("eve", "boom", 1_000, 1e300);
        assert_eq!(chat.corrected_millis(), 1_000);

        let raw = br#"{"from":"eve","to":"all","message":"boom","timestamp":9223372036854775807,"offset":1}"#;
        let Envelope::Chat(chat) = Envelope::decode(raw).unwrap() else {
            panic!("expected chat");
        };
        assert!(chat.display_line().contains(&i64::MAX.to_string()));
    }
}
