//! In-memory connector for tests.
//!
//! [`FakeConnector`] hands out [`FakeClient`]s and keeps the sending half
//! of every connection's event queue so tests can push protocol events.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use {async_trait::async_trait, serde_json::Value, tokio::sync::mpsc};

use crate::{
    client::{
        Connection, ConnectRequest, GroupMetadata, GroupSetting, ParticipantAction,
        RegistrationStatus, WaClient, WaConnector, WaEvent,
    },
    error::{Error, Result},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ConnectorState {
    requests: Vec<ConnectRequest>,
    established: HashMap<String, usize>,
    senders: HashMap<String, mpsc::Sender<WaEvent>>,
    clients: HashMap<String, Arc<FakeClient>>,
}

#[derive(Default)]
pub struct FakeConnector {
    state: Mutex<ConnectorState>,
    failures: AtomicU32,
    groups: Mutex<Vec<(String, String)>>,
    registered: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Seed every client created from now on with a group.
    pub fn with_group(&self, jid: &str, subject: &str) {
        lock(&self.groups).push((jid.to_string(), subject.to_string()));
    }

    /// Seed every client created from now on with a registered user.
    pub fn with_registered(&self, jid: &str) {
        lock(&self.registered).push(jid.to_string());
    }

    /// Every connect request seen, failed ones included.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn connect_attempts(&self, id: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.session_id == id)
            .count()
    }

    /// Successful connects for `id`.
    pub fn connect_count(&self, id: &str) -> usize {
        lock(&self.state).established.get(id).copied().unwrap_or(0)
    }

    /// Client of the latest connection of `id`.
    pub fn client(&self, id: &str) -> Option<Arc<FakeClient>> {
        lock(&self.state).clients.get(id).cloned()
    }

    /// Push an event into the latest connection of `id`.
    pub async fn emit(&self, id: &str, event: WaEvent) -> bool {
        let sender = lock(&self.state).senders.get(id).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// End the latest connection's event queue without a close event.
    pub fn drop_events(&self, id: &str) {
        lock(&self.state).senders.remove(id);
    }
}

#[async_trait]
impl WaConnector for FakeConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection> {
        let id = request.session_id.clone();
        lock(&self.state).requests.push(request);

        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Transport("connection refused".into()));
        }

        let client = Arc::new(FakeClient::new());
        for (jid, subject) in lock(&self.groups).iter() {
            client.add_group(jid, subject);
        }
        for jid in lock(&self.registered).iter() {
            client.register(jid);
        }

        let (tx, rx) = mpsc::channel(64);
        let mut state = lock(&self.state);
        *state.established.entry(id.clone()).or_insert(0) += 1;
        state.senders.insert(id.clone(), tx);
        state.clients.insert(id, Arc::clone(&client));

        Ok(Connection {
            client,
            events: rx,
        })
    }
}

/// Records every call; answers from seeded groups and registered users.
#[derive(Default)]
pub struct FakeClient {
    calls: Mutex<Vec<String>>,
    groups: Mutex<BTreeMap<String, GroupMetadata>>,
    registered: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, Value)>>,
    last_participants: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, jid: &str, subject: &str) {
        lock(&self.groups).insert(jid.to_string(), GroupMetadata {
            id: jid.to_string(),
            subject: Some(subject.to_string()),
            extra: Default::default(),
        });
    }

    /// A group the backend answers for with an empty id.
    pub fn add_group_without_id(&self, jid: &str) {
        lock(&self.groups).insert(jid.to_string(), GroupMetadata::default());
    }

    pub fn register(&self, jid: &str) {
        lock(&self.registered).insert(jid.to_string());
    }

    /// Make every remote call fail.
    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn was_called(&self, name: &str) -> bool {
        self.call_count(name) > 0
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == name).count()
    }

    /// Messages sent so far as `(jid, content)`.
    pub fn sent(&self) -> Vec<(String, Value)> {
        lock(&self.sent).clone()
    }

    pub fn last_participants(&self) -> Vec<String> {
        lock(&self.last_participants).clone()
    }

    pub fn group(&self, jid: &str) -> Option<GroupMetadata> {
        lock(&self.groups).get(jid).cloned()
    }

    fn record(&self, name: &str) -> Result<()> {
        lock(&self.calls).push(name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Remote {
                code: 500,
                message: format!("{name} failed"),
            });
        }
        Ok(())
    }

    fn known_group(&self, jid: &str) -> Result<()> {
        if lock(&self.groups).contains_key(jid) {
            Ok(())
        } else {
            Err(Error::Remote {
                code: 404,
                message: "item-not-found".into(),
            })
        }
    }
}

#[async_trait]
impl WaClient for FakeClient {
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        self.record("group_metadata")?;
        self.known_group(jid)?;
        Ok(self.group(jid).unwrap_or_default())
    }

    async fn send_message(&self, jid: &str, content: &Value) -> Result<Value> {
        self.record("send_message")?;
        lock(&self.sent).push((jid.to_string(), content.clone()));
        Ok(serde_json::json!({"key": {"remoteJid": jid, "fromMe": true}}))
    }

    async fn on_whatsapp(&self, jid: &str) -> Result<Vec<RegistrationStatus>> {
        self.record("on_whatsapp")?;
        let exists = lock(&self.registered).contains(jid);
        Ok(vec![RegistrationStatus {
            exists,
            jid: exists.then(|| jid.to_string()),
        }])
    }

    async fn logout(&self) -> Result<()> {
        self.record("logout")
    }

    async fn group_update_subject(&self, jid: &str, subject: &str) -> Result<()> {
        self.record("group_update_subject")?;
        self.known_group(jid)?;
        if let Some(meta) = lock(&self.groups).get_mut(jid) {
            meta.subject = Some(subject.to_string());
        }
        Ok(())
    }

    async fn group_update_description(&self, jid: &str, _description: &str) -> Result<()> {
        self.record("group_update_description")?;
        self.known_group(jid)
    }

    async fn group_setting_update(&self, jid: &str, _setting: GroupSetting) -> Result<()> {
        self.record("group_setting_update")?;
        self.known_group(jid)
    }

    async fn update_profile_picture(&self, _jid: &str, _image: Vec<u8>) -> Result<()> {
        self.record("update_profile_picture")
    }

    async fn group_invite_code(&self, jid: &str) -> Result<String> {
        self.record("group_invite_code")?;
        self.known_group(jid)?;
        Ok(format!("INVITE-{jid}"))
    }

    async fn group_create(&self, subject: &str, participants: &[String]) -> Result<GroupMetadata> {
        self.record("group_create")?;
        *lock(&self.last_participants) = participants.to_vec();
        let jid = format!("{}-1@g.us", lock(&self.groups).len() + 1);
        self.add_group(&jid, subject);
        Ok(self.group(&jid).unwrap_or_default())
    }

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<Value> {
        self.record("group_participants_update")?;
        *lock(&self.last_participants) = participants.to_vec();
        Ok(serde_json::json!({"jid": jid, "action": action, "participants": participants}))
    }

    async fn group_fetch_all_participating(&self) -> Result<BTreeMap<String, GroupMetadata>> {
        self.record("group_fetch_all_participating")?;
        Ok(lock(&self.groups).clone())
    }

    async fn close(&self) {
        lock(&self.calls).push("close".into());
    }
}
