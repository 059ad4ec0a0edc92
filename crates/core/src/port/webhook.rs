// Outbound status-webhook delivery port. The concrete reqwest-based client
// lives in testflinger-server; core only needs the ability to fire one POST
// with a fixed timeout and learn whether it got through.

use async_trait::async_trait;

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// POST `events` (already-serialized JSON) to `url`. Ok(()) on any 2xx;
    /// errors (timeout, connection refused, non-2xx) are returned for the
    /// caller to log and swallow, never to fail the job.
    async fn notify(&self, url: &str, events: &serde_json::Value) -> Result<(), String>;
}
