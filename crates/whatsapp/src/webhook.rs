//! Fire-and-forget forwarding of inbound events to an HTTP sink.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
};

use wagate_config::WebhookConfig;

#[derive(Serialize)]
struct WebhookBody<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    body: &'a Value,
    #[serde(rename = "instanceKey")]
    instance_key: &'a str,
}

/// Posts `{type, body, instanceKey}` to the configured URL without waiting
/// for the result. Delivery failures are logged and counted, never retried.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: Option<Arc<str>>,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl WebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.target().map(Arc::from),
            delivered: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A dispatcher that never sends anything.
    pub fn disabled() -> Self {
        Self::new(&WebhookConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Queue one delivery. Returns the task handle so callers that care
    /// (tests) can await it; dropping it does not cancel the delivery.
    pub fn forward(
        &self,
        event_type: &str,
        payload: &Value,
        session_id: &str,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let url = self.url.clone()?;
        let body = match serde_json::to_vec(&WebhookBody {
            event_type,
            body: payload,
            instance_key: session_id,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!(session_id, event_type, error = %e, "webhook payload not serializable");
                self.failed.fetch_add(1, Ordering::Relaxed);
                return None;
            },
        };

        let client = self.client.clone();
        let delivered = Arc::clone(&self.delivered);
        let failed = Arc::clone(&self.failed);
        let session_id = session_id.to_string();
        let event_type = event_type.to_string();

        Some(tokio::spawn(async move {
            let result = client
                .post(&*url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(resp) => {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(%session_id, %event_type, status = %resp.status(), "webhook delivered");
                },
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(%session_id, %event_type, error = %e, "webhook delivery failed");
                },
            }
        }))
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
