//! Webhook 转发：把 RelayMessage 以 JSON POST 到配置的 endpoint

use std::time::Duration;

use async_trait::async_trait;

use super::{RelayConfig, RelayError, RelayMessage, RelaySink};

pub struct WebhookRelay {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<String>,
}

impl WebhookRelay {
    pub fn new(endpoint: impl Into<String>, credentials: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
            credentials,
        }
    }

    /// endpoint 为空时返回 None
    pub fn from_config(config: &RelayConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty())?;
        Some(Self::new(
            endpoint,
            config.credentials.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        ))
    }
}

#[async_trait]
impl RelaySink for WebhookRelay {
    async fn deliver(&self, message: &RelayMessage) -> Result<(), RelayError> {
        let mut request = self.client.post(&self.endpoint).json(message);
        if let Some(token) = &self.credentials {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Rejected { status, body });
        }
        Ok(())
    }
}
