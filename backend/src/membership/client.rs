use std::time::Duration;

use tracing::debug;

use crate::error::PeerError;
use crate::models::Member;

/// HTTP client for the registry's `/register` endpoint
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(host: &str, port: u16) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("http://{}:{}", host, port),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register and return the registry's view of everyone else
    pub async fn register(&self, username: &str, ip: &str, port: u16) -> Result<Vec<Member>, PeerError> {
        debug!("Registering with registry at {}...", self.base_url);

        let port = port.to_string();
        let response = self
            .http
            .get(format!("{}/register", self.base_url))
            .query(&[("username", username), ("ip", ip), ("port", port.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Vec<Member>>().await?)
    }
}
