//! In-process multi-device backend.
//!
//! With the `native` feature, [`NativeConnector`] serves multi-file
//! sessions through `whatsapp-rust`. The device store lives next to the
//! session's credential files, at `md_{id}/device.db`, so scan, restore
//! and delete treat it like any other multi-file artifact.
//!
//! The translation from backend happenings to [`WaEvent`]s is kept free of
//! the protocol crates and is compiled in every build.

#[cfg(feature = "native")]
mod backend;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

#[cfg(feature = "native")]
pub use backend::NativeConnector;

use crate::{
    client::{AuthMode, ConnectionUpdate, CredentialUpdate, DisconnectReason, WaEvent},
    credentials::CredentialStore,
};

pub const DEVICE_DB: &str = "device.db";

/// Status code answered for calls the native backend does not implement.
pub const NOT_IMPLEMENTED: i64 = 501;

/// Device store location of session `id` under `sessions_dir`.
pub fn device_db_path(sessions_dir: &Path, id: &str) -> PathBuf {
    CredentialStore::new(sessions_dir)
        .artifact_path(id, AuthMode::MultiFile)
        .join(DEVICE_DB)
}

/// A backend happening, stripped of protocol types.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Signal {
    Qr(String),
    Connected,
    LoggedOut,
    Disconnected,
    Message(InboundText),
}

#[cfg_attr(not(feature = "native"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InboundText {
    pub chat: String,
    pub sender: String,
    pub id: String,
    pub from_me: bool,
    pub timestamp: u64,
    pub text: Option<String>,
}

/// Events a signal produces, in delivery order.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
pub(crate) fn translate(signal: Signal) -> Vec<WaEvent> {
    match signal {
        Signal::Qr(code) => vec![WaEvent::ConnectionUpdate(ConnectionUpdate::qr(code))],
        // Marks the device linked in creds.json; the keys stay in the device store.
        Signal::Connected => {
            let mut creds = Map::new();
            creds.insert("registered".into(), Value::Bool(true));
            vec![
                WaEvent::CredsUpdate(CredentialUpdate {
                    creds: Some(creds),
                    keys: Default::default(),
                }),
                WaEvent::ConnectionUpdate(ConnectionUpdate::open()),
            ]
        },
        Signal::LoggedOut => vec![WaEvent::ConnectionUpdate(ConnectionUpdate::closed(
            DisconnectReason::LoggedOut,
        ))],
        Signal::Disconnected => vec![WaEvent::ConnectionUpdate(ConnectionUpdate::closed(
            DisconnectReason::ConnectionLost,
        ))],
        Signal::Message(message) => vec![WaEvent::MessagesUpsert(upsert_payload(&message))],
    }
}

/// The `messages.upsert` shape the chat mirror and webhook consume.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
fn upsert_payload(message: &InboundText) -> Value {
    let mut entry = json!({
        "key": {
            "remoteJid": message.chat,
            "fromMe": message.from_me,
            "id": message.id,
        },
        "messageTimestamp": message.timestamp,
    });
    if message.sender != message.chat {
        entry["key"]["participant"] = Value::String(message.sender.clone());
    }
    if let Some(text) = &message.text {
        entry["message"] = json!({"conversation": text});
    }
    json!({"messages": [entry], "type": "notify"})
}

/// Text body of an outbound message object, if it has one.
#[cfg_attr(not(feature = "native"), allow(dead_code))]
pub(crate) fn outbound_text(content: &Value) -> Option<&str> {
    content
        .get("text")
        .or_else(|| content.get("conversation"))
        .and_then(Value::as_str)
}
