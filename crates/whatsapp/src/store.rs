//! In-memory mirror of the chat list, with JSON snapshots on disk.

use std::{collections::HashMap, io::ErrorKind, path::Path};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, trace},
};

use crate::{
    client::Chat,
    credentials::write_atomic,
    error::Result,
    jid::{GROUP_SUFFIX, USER_SUFFIX},
};

#[derive(Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    chats: Vec<Chat>,
}

/// Which address family to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Individual,
    Group,
}

impl ChatKind {
    pub fn from_group_flag(is_group: bool) -> Self {
        if is_group { Self::Group } else { Self::Individual }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Individual => USER_SUFFIX,
            Self::Group => GROUP_SUFFIX,
        }
    }
}

/// Per-session chat mirror.
#[derive(Default)]
pub struct ChatStore {
    chats: RwLock<HashMap<String, Chat>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert chats that are not known yet. Returns how many were added.
    pub async fn insert_if_absent(&self, chats: &[Chat]) -> usize {
        let mut map = self.chats.write().await;
        let mut added = 0;
        for chat in chats {
            if !map.contains_key(&chat.id) {
                map.insert(chat.id.clone(), chat.clone());
                added += 1;
            }
        }
        added
    }

    /// Insert or replace chats.
    pub async fn upsert(&self, chats: &[Chat]) {
        let mut map = self.chats.write().await;
        for chat in chats {
            map.insert(chat.id.clone(), chat.clone());
        }
    }

    /// Make sure every chat referenced by an inbound-message batch exists and
    /// carries the newest message timestamp.
    pub async fn record_messages(&self, payload: &Value) {
        let Some(messages) = payload.get("messages").and_then(Value::as_array) else {
            return;
        };
        let mut map = self.chats.write().await;
        for message in messages {
            let Some(jid) = message
                .pointer("/key/remoteJid")
                .and_then(Value::as_str)
                .filter(|j| !j.is_empty())
            else {
                continue;
            };
            let ts = message.get("messageTimestamp").and_then(parse_timestamp);
            let chat = map
                .entry(jid.to_string())
                .or_insert_with(|| Chat::new(jid));
            if let Some(ts) = ts
                && chat.conversation_timestamp.is_none_or(|cur| cur < ts)
            {
                chat.conversation_timestamp = Some(ts);
            }
        }
    }

    /// Chats of one address family, newest conversation first.
    pub async fn chats(&self, kind: ChatKind) -> Vec<Chat> {
        let suffix = kind.suffix();
        let mut chats: Vec<Chat> = self
            .chats
            .read()
            .await
            .values()
            .filter(|c| c.id.ends_with(suffix))
            .cloned()
            .collect();
        chats.sort_by(|a, b| {
            b.conversation_timestamp
                .cmp(&a.conversation_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        chats
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }

    /// Load a snapshot, merging it under what is already mirrored.
    /// Returns `false` when there was no snapshot.
    pub async fn read_from_file(&self, path: &Path) -> Result<bool> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let added = self.insert_if_absent(&snapshot.chats).await;
        debug!(path = %path.display(), chats = added, "loaded chat mirror");
        Ok(true)
    }

    /// Write the current mirror to `path` atomically.
    pub async fn write_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            chats: self.chats.read().await.values().cloned().collect(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(path, &serde_json::to_vec(&snapshot)?).await?;
        trace!(path = %path.display(), chats = snapshot.chats.len(), "flushed chat mirror");
        Ok(())
    }
}

fn parse_timestamp(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        // Long-encoded timestamps: {"low": .., "high": ..}
        Value::Object(o) => o.get("low").and_then(Value::as_u64),
        _ => None,
    }
}
