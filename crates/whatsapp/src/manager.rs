//! Session lifecycle manager.
//!
//! Owns the registry, the retry counters and the credential store. Each
//! connection gets a driver task that feeds its events through
//! [`machine::step`] and executes the resulting effects while holding the
//! session's per-id lock.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    futures::future::BoxFuture,
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use wagate_config::{SessionsConfig, WagateConfig};

use crate::{
    client::{AuthMode, Chat, ConnectRequest, Connection, WaConnector, WaEvent},
    credentials::{AuthState, CredentialStore, validate_session_id},
    error::{Error, Result},
    machine::{self, Effect, Phase, StepContext, TeardownCause, Transition, UNABLE_TO_CREATE_QR},
    pending::{OpenOutcome, QrWaiter},
    qr,
    reconnect::{ReconnectPolicy, RetryCounter},
    registry::SessionRegistry,
    session::{Session, SessionInfo, TaskRole},
    store::{ChatKind, ChatStore},
    webhook::WebhookDispatcher,
};

/// Tunables of the manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub sessions_dir: PathBuf,
    pub policy: ReconnectPolicy,
    pub send_delay: Duration,
    pub flush_interval: Duration,
}

impl ManagerOptions {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self::from_sessions_config(&SessionsConfig {
            dir: Some(sessions_dir.into()),
            ..Default::default()
        })
    }

    pub fn from_sessions_config(config: &SessionsConfig) -> Self {
        Self {
            sessions_dir: config.resolved_dir(),
            policy: ReconnectPolicy::new(
                config.max_retries,
                Duration::from_millis(config.reconnect_interval_ms),
            ),
            send_delay: Duration::from_millis(config.send_delay_ms),
            flush_interval: Duration::from_secs(config.store_flush_interval_secs.max(1)),
        }
    }
}

pub struct SessionManager {
    connector: Arc<dyn WaConnector>,
    registry: SessionRegistry,
    retries: RetryCounter,
    credentials: CredentialStore,
    webhook: WebhookDispatcher,
    options: ManagerOptions,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn WaConnector>,
        webhook: WebhookDispatcher,
        options: ManagerOptions,
    ) -> Self {
        Self {
            connector,
            registry: SessionRegistry::new(),
            retries: RetryCounter::new(),
            credentials: CredentialStore::new(options.sessions_dir.clone()),
            webhook,
            options,
        }
    }

    pub fn from_config(config: &WagateConfig, connector: Arc<dyn WaConnector>) -> Self {
        Self::new(
            connector,
            WebhookDispatcher::new(&config.webhook),
            ManagerOptions::from_sessions_config(&config.sessions),
        )
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn send_delay(&self) -> Duration {
        self.options.send_delay
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn webhook(&self) -> &WebhookDispatcher {
        &self.webhook
    }

    /// Consecutive retries granted to `id` since its last successful open.
    pub fn retry_count(&self, id: &str) -> u32 {
        self.retries.get(id)
    }

    // ── Public API ───────────────────────────────────────────────────────────

    pub fn exists(&self, id: &str) -> bool {
        self.registry.exists(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.registry.list()
    }

    /// Session summaries sorted by id.
    pub async fn list_info(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for session in self.registry.list() {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Chats of one address family from the session's mirror.
    pub async fn list_chats(&self, id: &str, is_group: bool) -> Result<Vec<Chat>> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        Ok(session.store().chats(ChatKind::from_group_flag(is_group)).await)
    }

    /// Open a new session. `waiter` receives the first QR code, a
    /// `Connected` outcome, or a failure.
    ///
    /// Fails when the id is invalid or already live, or when persisted
    /// credentials cannot be read. Connection failures are not returned:
    /// they go through the reconnect policy like any other disconnect.
    pub async fn open_session(
        self: &Arc<Self>,
        id: &str,
        mode: AuthMode,
        waiter: Option<QrWaiter>,
    ) -> Result<Arc<Session>> {
        validate_session_id(id)?;
        let _guard = self.registry.lock(id).await;
        if self.registry.exists(id) {
            return Err(Error::SessionExists(id.to_string()));
        }

        let auth = self.credentials.load(id, mode).await?;

        let store = Arc::new(ChatStore::new());
        if !mode.is_legacy()
            && let Err(e) = store.read_from_file(&self.credentials.mirror_path(id)).await
        {
            warn!(session_id = %id, error = %e, "ignoring unreadable chat mirror");
        }

        let session = Arc::new(Session::new(id, mode, self.registry.next_generation(), store));
        self.registry.put(Arc::clone(&session));
        info!(
            session_id = %id,
            ?mode,
            generation = session.generation(),
            "session created"
        );

        if !mode.is_legacy() {
            let handle = self.spawn_flusher(Arc::clone(&session));
            session.set_flusher(handle).await;
        }

        self.connect_locked(&session, auth, waiter, TaskRole::External)
            .await;
        Ok(session)
    }

    /// Tear a session down unconditionally: stop its tasks, drop the
    /// connection, erase its artifacts and counters. Idempotent.
    ///
    /// Returns whether a live session was removed.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        validate_session_id(id)?;
        let _guard = self.registry.lock(id).await;

        let removed = self.registry.remove(id);
        match &removed {
            Some(session) => {
                self.stop(session, TaskRole::External).await;
                self.credentials.remove(id, session.mode()).await?;
                let _gate = session.flush_gate().lock().await;
                self.credentials.remove_mirror(id).await?;
            },
            None => {
                self.credentials.remove(id, AuthMode::MultiFile).await?;
                self.credentials.remove(id, AuthMode::Legacy).await?;
                self.credentials.remove_mirror(id).await?;
            },
        }
        self.retries.clear(id);

        info!(session_id = %id, live = removed.is_some(), "session deleted");
        Ok(removed.is_some())
    }

    /// Re-open every session persisted under the storage root.
    ///
    /// Opens are spawned; this returns as soon as the root was scanned.
    /// A storage root that cannot be read is an error.
    pub async fn restore(self: &Arc<Self>) -> Result<usize> {
        let persisted = self.credentials.scan().await?;
        let mut spawned = 0;
        for entry in persisted {
            if let Err(e) = validate_session_id(&entry.id) {
                warn!(path = %entry.path.display(), error = %e, "skipping persisted session");
                continue;
            }
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = manager.open_session(&entry.id, entry.mode, None).await {
                    warn!(session_id = %entry.id, error = %e, "failed to restore session");
                }
            });
            spawned += 1;
        }
        info!(sessions = spawned, root = %self.credentials.root().display(), "restoring sessions");
        Ok(spawned)
    }

    /// Flush every live multi-file mirror and stop all background work.
    pub async fn shutdown(&self) {
        let sessions = self.registry.list();
        info!(sessions = sessions.len(), "flushing sessions before exit");
        for session in sessions {
            self.flush(&session).await;
            session.abort_tasks(TaskRole::External).await;
            if let Some(client) = session.set_client(None).await {
                client.close().await;
            }
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────────────

    /// Open one connection for `session`. Caller holds the per-id lock.
    async fn connect_locked(
        self: &Arc<Self>,
        session: &Arc<Session>,
        auth: AuthState,
        waiter: Option<QrWaiter>,
        role: TaskRole,
    ) {
        session.set_phase(Phase::Connecting).await;
        let request = ConnectRequest {
            session_id: session.id().to_string(),
            mode: session.mode(),
            auth,
        };

        match self.connector.connect(request).await {
            Ok(Connection { client, events }) => {
                if let Some(old) = session.set_client(Some(client)).await {
                    old.close().await;
                }
                let handle = self.spawn_driver(Arc::clone(session), events, waiter);
                session.set_driver(handle).await;
                debug!(session_id = %session.id(), "connection established");
            },
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "connect failed");
                self.process_locked(session, &machine::connection_lost(), &waiter, role)
                    .await;
            },
        }
    }

    fn spawn_driver(
        self: &Arc<Self>,
        session: Arc<Session>,
        events: mpsc::Receiver<WaEvent>,
        waiter: Option<QrWaiter>,
    ) -> tokio::task::AbortHandle {
        let manager = Arc::clone(self);
        let task: BoxFuture<'static, ()> =
            Box::pin(async move { manager.drive(session, events, waiter).await });
        tokio::spawn(task).abort_handle()
    }

    /// Consume one connection's events until it closes.
    async fn drive(
        self: Arc<Self>,
        session: Arc<Session>,
        mut events: mpsc::Receiver<WaEvent>,
        waiter: Option<QrWaiter>,
    ) {
        let id = session.id().to_string();
        loop {
            let (event, ended) = match events.recv().await {
                Some(event) => (event, false),
                None => {
                    debug!(session_id = %id, "event queue ended without close");
                    (machine::connection_lost(), true)
                },
            };

            let _guard = self.registry.lock(&id).await;
            if !self.registry.is_current(&id, session.generation()) {
                debug!(session_id = %id, "driver outlived its session");
                return;
            }
            let transition = self
                .process_locked(&session, &event, &waiter, TaskRole::Driver)
                .await;
            if ended || transition.ends_connection() {
                return;
            }
        }
    }

    /// Run one event through the state machine and execute its effects.
    async fn process_locked(
        self: &Arc<Self>,
        session: &Arc<Session>,
        event: &WaEvent,
        waiter: &Option<QrWaiter>,
        role: TaskRole,
    ) -> Transition {
        let ctx = StepContext {
            waiter_pending: waiter.as_ref().is_some_and(QrWaiter::is_pending),
            attempts: self.retries.get(session.id()),
        };
        let previous = session.phase().await;
        let transition = machine::step(previous, event, ctx, &self.options.policy);
        if previous != transition.phase {
            debug!(
                session_id = %session.id(),
                event = event.kind(),
                from = %previous,
                to = %transition.phase,
                "phase change"
            );
        }
        session.set_phase(transition.phase).await;

        for effect in transition.effects.iter().cloned() {
            self.execute(session, effect, waiter, role).await;
        }
        transition
    }

    async fn execute(
        self: &Arc<Self>,
        session: &Arc<Session>,
        effect: Effect,
        waiter: &Option<QrWaiter>,
        role: TaskRole,
    ) {
        let id = session.id();
        match effect {
            Effect::PersistCredentials(update) => {
                if let Err(e) = self.credentials.apply(id, session.mode(), &update).await {
                    error!(session_id = %id, error = %e, "failed to persist credentials");
                }
            },
            Effect::MirrorChats(chats) => {
                if session.is_legacy() {
                    session.store().insert_if_absent(&chats).await;
                } else {
                    session.store().upsert(&chats).await;
                }
            },
            Effect::MirrorMessages(payload) => {
                session.store().record_messages(&payload).await;
            },
            Effect::ForwardWebhook {
                event_type,
                payload,
            } => {
                self.webhook.forward(event_type, &payload, id);
            },
            Effect::ClearRetries => {
                self.retries.clear(id);
                info!(session_id = %id, "session connected");
            },
            Effect::BumpRetries => {
                let attempts = self.retries.bump(id);
                info!(session_id = %id, attempts, "reconnecting");
            },
            Effect::ScheduleReconnect(delay) => {
                let handle = self.schedule_reconnect(Arc::clone(session), waiter.clone(), delay);
                session.set_reconnect(handle).await;
            },
            Effect::RespondConnected => {
                respond(waiter, OpenOutcome::Connected);
            },
            Effect::DeliverQr(raw) => match qr::render_data_url(&raw) {
                Ok(url) => {
                    respond(waiter, OpenOutcome::Qr(url));
                    debug!(session_id = %id, "QR code delivered");
                },
                Err(e) => {
                    warn!(session_id = %id, error = %e, "QR rendering failed");
                    respond(waiter, OpenOutcome::Failed(UNABLE_TO_CREATE_QR.into()));
                    self.logout(session).await;
                    session.set_phase(Phase::Closed).await;
                    self.teardown_locked(session, TeardownCause::QrFailed, role)
                        .await;
                },
            },
            Effect::RespondFailed(message) => {
                respond(waiter, OpenOutcome::Failed(message.into()));
            },
            Effect::Logout => self.logout(session).await,
            Effect::Teardown(cause) => self.teardown_locked(session, cause, role).await,
        }
    }

    fn schedule_reconnect(
        self: &Arc<Self>,
        session: Arc<Session>,
        waiter: Option<QrWaiter>,
        delay: Duration,
    ) -> tokio::task::AbortHandle {
        let manager = Arc::clone(self);
        let task: BoxFuture<'static, ()> =
            Box::pin(async move { manager.reconnect(session, waiter, delay).await });
        tokio::spawn(task).abort_handle()
    }

    async fn reconnect(
        self: Arc<Self>,
        session: Arc<Session>,
        waiter: Option<QrWaiter>,
        delay: Duration,
    ) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = session.id().to_string();
        let _guard = self.registry.lock(&id).await;
        if !self.registry.is_current(&id, session.generation()) {
            debug!(session_id = %id, "reconnect cancelled, session is gone");
            return;
        }

        match self.credentials.load(&id, session.mode()).await {
            Ok(auth) => {
                self.connect_locked(&session, auth, waiter, TaskRole::Reconnect)
                    .await;
            },
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to reload credentials");
                self.process_locked(
                    &session,
                    &machine::connection_lost(),
                    &waiter,
                    TaskRole::Reconnect,
                )
                .await;
            },
        }
    }

    async fn logout(&self, session: &Session) {
        if let Some(client) = session.client().await
            && let Err(e) = client.logout().await
        {
            debug!(session_id = %session.id(), error = %e, "logout failed");
        }
    }

    /// Remove a session after a terminal transition. Caller holds the
    /// per-id lock. Artifacts are only erased while the registry still
    /// holds this session's generation.
    async fn teardown_locked(&self, session: &Session, cause: TeardownCause, role: TaskRole) {
        let id = session.id();
        self.stop(session, role).await;

        if self
            .registry
            .remove_if_generation(id, session.generation())
            .is_none()
        {
            debug!(session_id = %id, ?cause, "stale teardown ignored");
            return;
        }

        if let Err(e) = self.credentials.remove(id, session.mode()).await {
            error!(session_id = %id, error = %e, "failed to remove credentials");
        }
        // Wait out a mirror write the aborted flusher left running.
        let _gate = session.flush_gate().lock().await;
        if let Err(e) = self.credentials.remove_mirror(id).await {
            error!(session_id = %id, error = %e, "failed to remove chat mirror");
        }
        self.retries.clear(id);
        info!(session_id = %id, ?cause, "session removed");
    }

    async fn stop(&self, session: &Session, role: TaskRole) {
        session.set_phase(Phase::Closed).await;
        session.abort_tasks(role).await;
        if let Some(client) = session.set_client(None).await {
            client.close().await;
        }
    }

    // ── Mirror flushing ──────────────────────────────────────────────────────

    fn spawn_flusher(self: &Arc<Self>, session: Arc<Session>) -> tokio::task::AbortHandle {
        let manager = Arc::clone(self);
        let period = self.options.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.flush(&session).await;
            }
        })
        .abort_handle()
    }

    async fn flush(&self, session: &Session) {
        if session.is_legacy() {
            return;
        }
        let path = self.credentials.mirror_path(session.id());
        let gate = Arc::clone(session.flush_gate()).lock_owned().await;
        let store = Arc::clone(session.store());
        // Detached so an abort of the caller cannot drop the gate while the
        // blocking write is still running.
        let write = tokio::spawn(async move {
            let _gate = gate;
            store.write_to_file(&path).await
        });
        match write.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(session_id = %session.id(), error = %e, "failed to flush chat mirror");
            },
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "chat mirror flush task failed");
            },
        }
    }
}

fn respond(waiter: &Option<QrWaiter>, outcome: OpenOutcome) {
    if let Some(waiter) = waiter {
        waiter.respond(outcome);
    }
}
