use std::{sync::Arc, time::Duration};

use wagate_whatsapp::{Session, SessionManager};

use crate::response::{Reply, SESSION_NOT_FOUND};

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    pub manager: Arc<SessionManager>,
    /// Client for fetching remote media (profile pictures).
    pub http: reqwest::Client,
    /// How long `POST /sessions/add` waits for a QR code.
    pub qr_timeout: Duration,
    pub version: String,
}

impl GatewayState {
    pub fn new(manager: Arc<SessionManager>, qr_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            manager,
            http: reqwest::Client::new(),
            qr_timeout,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Look up a live session, or the 404 reply.
    pub fn session(&self, id: &str) -> Result<Arc<Session>, Reply> {
        self.manager
            .get(id)
            .ok_or_else(|| Reply::not_found(SESSION_NOT_FOUND))
    }
}
