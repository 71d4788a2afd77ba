//! `whatsapp-rust` glue: one bot per session.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info},
    wacore::types::events::Event,
    wacore_binary::jid::Jid,
    waproto::whatsapp as wa,
    whatsapp_rust::{bot::Bot, client::Client, store::SqliteStore},
    whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory,
    whatsapp_rust_ureq_http_client::UreqHttpClient,
};

use super::{InboundText, NOT_IMPLEMENTED, Signal, device_db_path, outbound_text, translate};
use crate::{
    client::{
        ConnectRequest, Connection, GroupMetadata, GroupSetting, ParticipantAction,
        RegistrationStatus, WaClient, WaConnector, event_queue,
    },
    error::{Error, Result},
};

const EVENT_BUFFER: usize = 256;

/// Serves multi-file sessions in-process.
#[derive(Debug, Clone)]
pub struct NativeConnector {
    sessions_dir: PathBuf,
}

impl NativeConnector {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }
}

#[async_trait]
impl WaConnector for NativeConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection> {
        let session_id = request.session_id.clone();
        let db = device_db_path(&self.sessions_dir, &session_id);
        if let Some(parent) = db.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(
            session_id = %session_id,
            db = %db.display(),
            linked = request.auth.is_initialized(),
            "opening native device store"
        );
        let store = SqliteStore::new(&db.to_string_lossy())
            .await
            .map_err(|e| Error::Transport(format!("device store {}: {e}", db.display())))?;

        let (events_tx, events_rx) = event_queue(&session_id, EVENT_BUFFER);
        let handler_id = session_id.clone();
        let mut bot = Bot::builder()
            .with_backend(Arc::new(store))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, _client| {
                let events_tx = events_tx.clone();
                let session_id = handler_id.clone();
                async move {
                    let Some(signal) = signal_of(event) else {
                        return;
                    };
                    for event in translate(signal) {
                        if events_tx.send(event).is_err() {
                            debug!(%session_id, "native event dropped, session gone");
                            return;
                        }
                    }
                }
            })
            .build()
            .await
            .map_err(|e| Error::Transport(format!("native client: {e}")))?;

        let client = bot.client();
        let runner = bot
            .run()
            .await
            .map_err(|e| Error::Transport(format!("native run: {e}")))?;
        info!(session_id = %session_id, "native connection started");

        Ok(Connection {
            client: Arc::new(NativeClient {
                session_id,
                client,
                runner: Mutex::new(Some(runner)),
            }),
            events: events_rx,
        })
    }
}

fn signal_of(event: Event) -> Option<Signal> {
    match event {
        Event::PairingQrCode { code, .. } => Some(Signal::Qr(code)),
        Event::Connected(_) => Some(Signal::Connected),
        Event::LoggedOut(_) => Some(Signal::LoggedOut),
        Event::Disconnected(_) => Some(Signal::Disconnected),
        Event::Message(message, info) => Some(Signal::Message(InboundText {
            chat: info.source.chat.to_string(),
            sender: info.source.sender.to_string(),
            id: info.id.clone(),
            from_me: info.source.is_from_me,
            timestamp: u64::try_from(info.timestamp.timestamp()).unwrap_or_default(),
            text: message.conversation.clone(),
        })),
        _ => None,
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Text sends are served natively; the remaining calls answer 501.
pub struct NativeClient {
    session_id: String,
    client: Arc<Client>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl NativeClient {
    fn unsupported<T>(&self, op: &str) -> Result<T> {
        debug!(session_id = %self.session_id, op, "not available on the native backend");
        Err(Error::Remote {
            code: NOT_IMPLEMENTED,
            message: format!("{op} is not available on the native backend"),
        })
    }
}

fn parse_jid(raw: &str) -> Result<Jid> {
    raw.parse::<Jid>().map_err(|e| Error::Remote {
        code: 400,
        message: format!("invalid jid {raw:?}: {e}"),
    })
}

#[async_trait]
impl WaClient for NativeClient {
    async fn group_metadata(&self, _jid: &str) -> Result<GroupMetadata> {
        self.unsupported("groupMetadata")
    }

    async fn send_message(&self, jid: &str, content: &Value) -> Result<Value> {
        let Some(text) = outbound_text(content) else {
            return self.unsupported("sendMessage (non-text)");
        };
        let to = parse_jid(jid)?;
        let message = wa::Message {
            conversation: Some(text.to_string()),
            ..Default::default()
        };
        let id = self
            .client
            .send_message(to, message)
            .await
            .map_err(|e| Error::Remote {
                code: 500,
                message: e.to_string(),
            })?;
        Ok(json!({"key": {"remoteJid": jid, "fromMe": true, "id": id}}))
    }

    async fn on_whatsapp(&self, _jid: &str) -> Result<Vec<RegistrationStatus>> {
        self.unsupported("onWhatsApp")
    }

    async fn logout(&self) -> Result<()> {
        self.unsupported("logout")
    }

    async fn group_update_subject(&self, _jid: &str, _subject: &str) -> Result<()> {
        self.unsupported("groupUpdateSubject")
    }

    async fn group_update_description(&self, _jid: &str, _description: &str) -> Result<()> {
        self.unsupported("groupUpdateDescription")
    }

    async fn group_setting_update(&self, _jid: &str, _setting: GroupSetting) -> Result<()> {
        self.unsupported("groupSettingUpdate")
    }

    async fn update_profile_picture(&self, _jid: &str, _image: Vec<u8>) -> Result<()> {
        self.unsupported("updateProfilePicture")
    }

    async fn group_invite_code(&self, _jid: &str) -> Result<String> {
        self.unsupported("groupInviteCode")
    }

    async fn group_create(&self, _subject: &str, _participants: &[String]) -> Result<GroupMetadata> {
        self.unsupported("groupCreate")
    }

    async fn group_participants_update(
        &self,
        _jid: &str,
        _participants: &[String],
        _action: ParticipantAction,
    ) -> Result<Value> {
        self.unsupported("groupParticipantsUpdate")
    }

    async fn group_fetch_all_participating(&self) -> Result<BTreeMap<String, GroupMetadata>> {
        self.unsupported("groupFetchAllParticipating")
    }

    async fn close(&self) {
        self.client.disconnect().await;
        if let Some(runner) = self.runner.lock().await.take() {
            runner.abort();
        }
        debug!(session_id = %self.session_id, "native connection closed");
    }
}
