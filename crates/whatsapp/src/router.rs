//! Per-mode connector dispatch.

use std::sync::Arc;

use {async_trait::async_trait, tracing::trace};

use crate::{
    client::{AuthMode, ConnectRequest, Connection, WaConnector},
    error::Result,
};

/// Sends each connection attempt to the connector serving its auth mode.
pub struct ModeRouter {
    multi_file: Arc<dyn WaConnector>,
    legacy: Arc<dyn WaConnector>,
}

impl ModeRouter {
    pub fn new(multi_file: Arc<dyn WaConnector>, legacy: Arc<dyn WaConnector>) -> Self {
        Self { multi_file, legacy }
    }
}

#[async_trait]
impl WaConnector for ModeRouter {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection> {
        trace!(session_id = %request.session_id, mode = ?request.mode, "routing connect");
        match request.mode {
            AuthMode::MultiFile => self.multi_file.connect(request).await,
            AuthMode::Legacy => self.legacy.connect(request).await,
        }
    }
}
