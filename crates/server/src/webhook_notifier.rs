// reqwest-backed `WebhookNotifier` (§4.5): the concrete outbound HTTP client
// the core `WebhookProxy` delegates to. Kept in the composition root rather
// than core per ADR-001 — core never depends on a concrete HTTP client.

use async_trait::async_trait;
use std::time::Duration;
use testflinger_core::port::WebhookNotifier;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReqwestWebhookNotifier {
    client: reqwest::Client,
}

impl ReqwestWebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .expect("reqwest client builder with static config should never fail"),
        }
    }
}

impl Default for ReqwestWebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookNotifier for ReqwestWebhookNotifier {
    async fn notify(&self, url: &str, events: &serde_json::Value) -> Result<(), String> {
        let response = self.client.post(url).json(events).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("webhook endpoint returned {}", response.status()));
        }
        Ok(())
    }
}
