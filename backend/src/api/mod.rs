pub mod health;
pub mod members;
pub mod metrics;
pub mod response;
pub mod ws;

use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::fanout::Fanout;
use crate::registry::SharedRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub config: Config,
    pub event_tx: broadcast::Sender<Event>,
    /// Outbound socket for chat lines arriving over WebSocket
    pub fanout: Option<Fanout>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(registry: SharedRegistry, config: Config) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            registry,
            config,
            event_tx,
            fanout: None,
            metrics: None,
        }
    }

    pub fn with_fanout(mut self, fanout: Fanout) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Frames exchanged with browser clients over WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Raw chat envelope JSON
    #[serde(rename = "message")]
    Chat(String),
    /// `T1` from the browser, `T1,T2,T3` back
    #[serde(rename = "ntp")]
    Ntp(String),
    #[serde(rename = "welcome")]
    Welcome,
}
