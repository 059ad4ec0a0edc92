// Status-update proxy: forwards an agent-reported event stream to the
// job's submitter-provided webhook URL, if any. Failures are logged and
// swallowed; a flaky third-party endpoint must never take a job down.

use crate::port::WebhookNotifier;
use std::sync::Arc;

pub struct WebhookProxy {
    notifier: Arc<dyn WebhookNotifier>,
}

impl WebhookProxy {
    pub fn new(notifier: Arc<dyn WebhookNotifier>) -> Self {
        Self { notifier }
    }

    /// `POST /v1/job/{id}/events`. `webhook_url` is the job's
    /// `job_status_webhook`, if one was supplied at submission time.
    pub async fn forward(&self, job_id: &str, webhook_url: Option<&str>, events: &serde_json::Value) {
        let Some(url) = webhook_url else {
            return;
        };
        if let Err(err) = self.notifier.notify(url, events).await {
            tracing::warn!(job_id, url, error = %err, "status webhook delivery failed, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingNotifier(AtomicUsize);
    #[async_trait]
    impl WebhookNotifier for FailingNotifier {
        async fn notify(&self, _url: &str, _events: &serde_json::Value) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("timed out".into())
        }
    }

    #[tokio::test]
    async fn delivery_failure_does_not_panic_or_propagate() {
        let notifier = Arc::new(FailingNotifier(AtomicUsize::new(0)));
        let proxy = WebhookProxy::new(notifier.clone());
        proxy.forward("j1", Some("http://example.invalid/hook"), &serde_json::json!({"event": "test_start"})).await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_webhook_url_is_a_no_op() {
        let notifier = Arc::new(FailingNotifier(AtomicUsize::new(0)));
        let proxy = WebhookProxy::new(notifier.clone());
        proxy.forward("j1", None, &serde_json::json!({})).await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 0);
    }
}
