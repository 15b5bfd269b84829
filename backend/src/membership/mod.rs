//! Peer-side membership: the local cache, the registry client and the peer
//! runtime that joins, heartbeats and dispatches datagrams.

pub mod cache;
pub mod client;
pub mod peer;

pub use cache::MembershipCache;
pub use client::RegistryClient;
pub use peer::{Peer, PeerEvent};
