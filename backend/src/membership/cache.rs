use crate::models::{AnnounceEnvelope, Member, MemberKey};

/// A peer's local copy of the registry snapshot.
///
/// Replaced wholesale on every heartbeat. Announcements add to it in between.
#[derive(Debug, Clone, Default)]
pub struct MembershipCache {
    members: Vec<Member>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite with a fresh registry snapshot
    pub fn replace(&mut self, snapshot: Vec<Member>) {
        self.members = snapshot;
    }

    /// Insert an announced member unless its `(ip, port)` is already cached.
    /// Returns whether the cache changed.
    pub fn on_announce(&mut self, announce: AnnounceEnvelope) -> bool {
        if self.contains(&announce.ip, announce.port) {
            return false;
        }
        self.members.push(announce.into());
        true
    }

    /// Current fan-out set
    pub fn targets(&self) -> Vec<MemberKey> {
        let mut keys: Vec<MemberKey> = self.members.iter().map(Member::key).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn contains(&self, ip: &str, port: u16) -> bool {
        self.members.iter().any(|m| m.has_key(ip, port))
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
