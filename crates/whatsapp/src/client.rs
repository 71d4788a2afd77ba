//! Protocol client seam.
//!
//! A [`WaConnector`] opens one connection per session and hands back a
//! [`WaClient`] for remote calls plus the queue of [`WaEvent`]s the
//! connection produces. Session code only ever sees this seam, whichever
//! backend speaks the wire protocol.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tokio::sync::mpsc,
    tracing::debug,
};

use crate::{credentials::AuthState, error::Result};

// ── Modes ────────────────────────────────────────────────────────────────────

/// The two mutually exclusive authentication schemes of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Single-device scheme, credentials kept in one JSON file.
    Legacy,
    /// Multi-device scheme, credentials kept as a directory of key files.
    MultiFile,
}

impl AuthMode {
    pub fn from_legacy_flag(is_legacy: bool) -> Self {
        if is_legacy {
            Self::Legacy
        } else {
            Self::MultiFile
        }
    }

    pub fn is_legacy(self) -> bool {
        self == Self::Legacy
    }

    /// File name prefix used in the sessions directory.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Legacy => "legacy_",
            Self::MultiFile => "md_",
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Rotated key material pushed by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    /// Fields to merge into the main credential object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Map<String, Value>>,
    /// Signal keys by name; `null` removes a key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Option<Value>>,
}

/// A chat entry as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_timestamp: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Chat {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            unread_count: None,
            conversation_timestamp: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Connection-state notification. Fields are independent: one update may
/// carry a state change, a QR challenge, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionState>,
    /// Status code of the last disconnect, when `connection` is `close`.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Raw QR challenge payload.
    #[serde(default)]
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionState::Open),
            ..Default::default()
        }
    }

    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            status_code: Some(reason.code()),
            qr: None,
        }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Default::default()
        }
    }

    /// Disconnect reason; a close without a status code counts as a lost connection.
    pub fn reason(&self) -> DisconnectReason {
        self.status_code
            .map(DisconnectReason::from_code)
            .unwrap_or(DisconnectReason::ConnectionLost)
    }
}

/// Events produced by a live connection, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum WaEvent {
    CredsUpdate(CredentialUpdate),
    ChatsSet(Vec<Chat>),
    /// Inbound messages, forwarded verbatim to the webhook.
    MessagesUpsert(Value),
    ConnectionUpdate(ConnectionUpdate),
}

impl WaEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredsUpdate(_) => "creds.update",
            Self::ChatsSet(_) => "chats.set",
            Self::MessagesUpsert(_) => "messages.upsert",
            Self::ConnectionUpdate(_) => "connection.update",
        }
    }
}

/// Backend disconnect reasons (status codes mirror the web client's).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Other(code) => code,
        }
    }
}

// ── Remote call payloads ─────────────────────────────────────────────────────

/// Group metadata. Only `id` is interpreted; everything else is passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a registration lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSetting {
    Announcement,
    NotAnnouncement,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

// ── Traits ───────────────────────────────────────────────────────────────────

/// Parameters of a single connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub session_id: String,
    pub mode: AuthMode,
    pub auth: AuthState,
}

/// A live connection: the call handle plus its event queue.
pub struct Connection {
    pub client: Arc<dyn WaClient>,
    pub events: mpsc::Receiver<WaEvent>,
}

/// Event hand-off for connector implementations.
///
/// Pushing into the returned sender never waits on the session driver; a
/// forwarder feeds the bounded queue that goes into [`Connection::events`].
/// The queue ends once the sender is dropped and the backlog is delivered.
pub fn event_queue(
    session_id: &str,
    capacity: usize,
) -> (mpsc::UnboundedSender<WaEvent>, mpsc::Receiver<WaEvent>) {
    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<WaEvent>();
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        while let Some(event) = queue_rx.recv().await {
            if events_tx.send(event).await.is_err() {
                debug!(%session_id, "event consumer gone");
                break;
            }
        }
    });
    (queue_tx, events_rx)
}

/// Opens protocol connections.
#[async_trait]
pub trait WaConnector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection>;
}

/// Remote calls on an open connection.
#[async_trait]
pub trait WaClient: Send + Sync {
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata>;

    /// Send a message; `content` is the backend's message object (e.g. `{"text": "hi"}`).
    async fn send_message(&self, jid: &str, content: &Value) -> Result<Value>;

    async fn on_whatsapp(&self, jid: &str) -> Result<Vec<RegistrationStatus>>;

    async fn logout(&self) -> Result<()>;

    async fn group_update_subject(&self, jid: &str, subject: &str) -> Result<()>;

    async fn group_update_description(&self, jid: &str, description: &str) -> Result<()>;

    async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<()>;

    async fn update_profile_picture(&self, jid: &str, image: Vec<u8>) -> Result<()>;

    async fn group_invite_code(&self, jid: &str) -> Result<String>;

    async fn group_create(&self, subject: &str, participants: &[String]) -> Result<GroupMetadata>;

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<Value>;

    async fn group_fetch_all_participating(&self) -> Result<BTreeMap<String, GroupMetadata>>;

    /// Drop the connection without logging out.
    async fn close(&self);
}
