//! Live session handle.

use std::sync::Arc;

use {
    serde::Serialize,
    tokio::{
        sync::{Mutex, RwLock},
        task::AbortHandle,
    },
};

use crate::{
    client::{AuthMode, WaClient},
    machine::Phase,
    store::ChatStore,
};

/// Which context runs a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskRole {
    /// An API caller (HTTP handler, shutdown).
    External,
    Driver,
    Reconnect,
}

#[derive(Default)]
struct Tasks {
    driver: Option<AbortHandle>,
    flusher: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
}

/// One tenant's connection: protocol client, chat mirror, lifecycle phase
/// and the background tasks serving it.
///
/// The handle survives reconnects; only the client is swapped. A new
/// handle (with a new generation) is created when the id is opened again
/// after a teardown.
pub struct Session {
    id: String,
    mode: AuthMode,
    generation: u64,
    store: Arc<ChatStore>,
    client: RwLock<Option<Arc<dyn WaClient>>>,
    phase: RwLock<Phase>,
    tasks: RwLock<Tasks>,
    /// Held for the whole of a mirror write, including the part that
    /// outlives an aborted flusher.
    flush_gate: Arc<Mutex<()>>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub legacy: bool,
    pub phase: Phase,
    pub generation: u64,
}

impl Session {
    pub fn new(id: impl Into<String>, mode: AuthMode, generation: u64, store: Arc<ChatStore>) -> Self {
        Self {
            id: id.into(),
            mode,
            generation,
            store,
            client: RwLock::new(None),
            phase: RwLock::new(Phase::Connecting),
            tasks: RwLock::new(Tasks::default()),
            flush_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn is_legacy(&self) -> bool {
        self.mode.is_legacy()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub(crate) fn flush_gate(&self) -> &Arc<Mutex<()>> {
        &self.flush_gate
    }

    /// Client of the current connection, if one is up.
    pub async fn client(&self) -> Option<Arc<dyn WaClient>> {
        self.client.read().await.clone()
    }

    pub(crate) async fn set_client(&self, client: Option<Arc<dyn WaClient>>) -> Option<Arc<dyn WaClient>> {
        std::mem::replace(&mut *self.client.write().await, client)
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    pub(crate) async fn set_phase(&self, phase: Phase) {
        *self.phase.write().await = phase;
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            legacy: self.is_legacy(),
            phase: self.phase().await,
            generation: self.generation,
        }
    }

    pub(crate) async fn set_driver(&self, handle: AbortHandle) {
        if let Some(old) = self.tasks.write().await.driver.replace(handle) {
            old.abort();
        }
    }

    pub(crate) async fn set_flusher(&self, handle: AbortHandle) {
        if let Some(old) = self.tasks.write().await.flusher.replace(handle) {
            old.abort();
        }
    }

    /// Only one reconnect is ever pending; the previous handle belongs to a
    /// finished task or to the caller itself, so it is not aborted.
    pub(crate) async fn set_reconnect(&self, handle: AbortHandle) {
        self.tasks.write().await.reconnect = Some(handle);
    }

    /// Abort background tasks, except the one doing the aborting.
    pub(crate) async fn abort_tasks(&self, caller: TaskRole) {
        let mut tasks = self.tasks.write().await;
        if let Some(flusher) = tasks.flusher.take() {
            flusher.abort();
        }
        if let Some(reconnect) = tasks.reconnect.take()
            && caller != TaskRole::Reconnect
        {
            reconnect.abort();
        }
        if let Some(driver) = tasks.driver.take()
            && caller != TaskRole::Driver
        {
            driver.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
