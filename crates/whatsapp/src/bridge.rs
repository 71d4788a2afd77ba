//! WebSocket bridge to a protocol sidecar.
//!
//! Each session opens `{url}/sessions/{id}`. Frames are JSON text:
//! - requests: `{"id": n, "method": "...", "params": {...}}`
//! - responses: `{"id": n, "result": ...}` or `{"id": n, "error": {"code", "message"}}`
//! - events: `{"event": "connection.update", "data": {...}}`
//!
//! The first request on a socket is `connect` with the session's mode and
//! stored credentials.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    futures::{SinkExt, StreamExt, stream::SplitSink},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message},
    tracing::{debug, trace, warn},
};

use wagate_config::BridgeConfig;

use crate::{
    client::{
        Chat, ConnectRequest, Connection, GroupMetadata, GroupSetting, ParticipantAction,
        RegistrationStatus, WaClient, WaConnector, WaEvent, event_queue,
    },
    error::{Error, Result},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

const EVENT_BUFFER: usize = 256;

// ── Frames ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Decode an event frame. Unknown event names are skipped.
fn parse_event(name: &str, data: Value) -> Result<Option<WaEvent>> {
    let event = match name {
        "creds.update" => WaEvent::CredsUpdate(serde_json::from_value(data)?),
        "chats.set" => {
            let chats = match data {
                Value::Array(_) => data,
                mut other => other.get_mut("chats").map(Value::take).unwrap_or_default(),
            };
            let chats: Vec<Chat> = if chats.is_null() {
                Vec::new()
            } else {
                serde_json::from_value(chats)?
            };
            WaEvent::ChatsSet(chats)
        },
        "messages.upsert" => WaEvent::MessagesUpsert(data),
        "connection.update" => WaEvent::ConnectionUpdate(serde_json::from_value(data)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

// ── Connector ────────────────────────────────────────────────────────────────

/// Connects sessions through the sidecar at `BridgeConfig::url`.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    base_url: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }

    pub fn session_url(&self, id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, urlencoding::encode(id))
    }
}

#[async_trait]
impl WaConnector for BridgeConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Connection> {
        let url = self.session_url(&request.session_id);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;
        debug!(session_id = %request.session_id, %url, "bridge socket open");

        let (events_tx, events_rx) = event_queue(&request.session_id, EVENT_BUFFER);
        let client = BridgeClient::start(
            request.session_id.clone(),
            ws,
            events_tx,
            self.request_timeout,
        );

        let params = json!({
            "legacy": request.mode.is_legacy(),
            "auth": request.auth,
        });
        if let Err(e) = client.call("connect", params).await {
            client.close().await;
            return Err(e);
        }

        Ok(Connection {
            client,
            events: events_rx,
        })
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// One session's socket: request/response correlation plus event fan-in.
pub struct BridgeClient {
    session_id: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    fn start(
        session_id: String,
        ws: WsStream,
        events: mpsc::UnboundedSender<WaEvent>,
        timeout: Duration,
    ) -> Arc<Self> {
        let (sink, mut stream) = ws.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader_id = session_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(session_id = %reader_id, error = %e, "bridge socket error");
                        break;
                    },
                };
                trace!(session_id = %reader_id, raw = %text.as_str(), "bridge -> gateway");

                let frame: InboundFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session_id = %reader_id, error = %e, "malformed bridge frame");
                        continue;
                    },
                };

                if let Some(name) = frame.event {
                    match parse_event(&name, frame.data) {
                        Ok(Some(event)) => {
                            // Never waits, so responses keep flowing during bursts.
                            if events.send(event).is_err() {
                                debug!(session_id = %reader_id, "event consumer gone");
                                break;
                            }
                        },
                        Ok(None) => trace!(session_id = %reader_id, event = %name, "ignoring event"),
                        Err(e) => {
                            warn!(session_id = %reader_id, event = %name, error = %e, "bad event payload");
                        },
                    }
                    continue;
                }

                if let Some(id) = frame.id {
                    let outcome = match frame.error {
                        Some(err) => Err(Error::Remote {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(frame.result.unwrap_or(Value::Null)),
                    };
                    match reader_pending.lock().await.remove(&id) {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        },
                        None => warn!(session_id = %reader_id, id, "response for unknown request id"),
                    }
                }
            }

            // Fail whatever is still waiting; dropping `events` ends the queue.
            for (_, tx) in reader_pending.lock().await.drain() {
                let _ = tx.send(Err(Error::Transport("bridge socket closed".into())));
            }
            debug!(session_id = %reader_id, "bridge reader stopped");
        });

        Arc::new(Self {
            session_id,
            sink: Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&RequestFrame { id, method, params })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(session_id = %self.session_id, method, id, "gateway -> bridge");
        if let Err(e) = self.sink.lock().await.send(Message::text(payload)).await {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(e.to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Transport("bridge reader dropped".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(method.to_string()))
            },
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        Ok(serde_json::from_value(self.call(method, params).await?)?)
    }
}

#[async_trait]
impl WaClient for BridgeClient {
    async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        self.call_as("groupMetadata", json!({ "jid": jid })).await
    }

    async fn send_message(&self, jid: &str, content: &Value) -> Result<Value> {
        self.call("sendMessage", json!({ "jid": jid, "content": content }))
            .await
    }

    async fn on_whatsapp(&self, jid: &str) -> Result<Vec<RegistrationStatus>> {
        self.call_as("onWhatsApp", json!({ "jid": jid })).await
    }

    async fn logout(&self) -> Result<()> {
        self.call("logout", Value::Null).await.map(drop)
    }

    async fn group_update_subject(&self, jid: &str, subject: &str) -> Result<()> {
        self.call(
            "groupUpdateSubject",
            json!({ "jid": jid, "subject": subject }),
        )
        .await
        .map(drop)
    }

    async fn group_update_description(&self, jid: &str, description: &str) -> Result<()> {
        self.call(
            "groupUpdateDescription",
            json!({ "jid": jid, "description": description }),
        )
        .await
        .map(drop)
    }

    async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<()> {
        self.call(
            "groupSettingUpdate",
            json!({ "jid": jid, "setting": setting }),
        )
        .await
        .map(drop)
    }

    async fn update_profile_picture(&self, jid: &str, image: Vec<u8>) -> Result<()> {
        self.call(
            "updateProfilePicture",
            json!({ "jid": jid, "image": STANDARD.encode(image) }),
        )
        .await
        .map(drop)
    }

    async fn group_invite_code(&self, jid: &str) -> Result<String> {
        self.call_as("groupInviteCode", json!({ "jid": jid })).await
    }

    async fn group_create(&self, subject: &str, participants: &[String]) -> Result<GroupMetadata> {
        self.call_as(
            "groupCreate",
            json!({ "subject": subject, "participants": participants }),
        )
        .await
    }

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<Value> {
        self.call(
            "groupParticipantsUpdate",
            json!({ "jid": jid, "participants": participants, "action": action }),
        )
        .await
    }

    async fn group_fetch_all_participating(&self) -> Result<BTreeMap<String, GroupMetadata>> {
        self.call_as("groupFetchAllParticipating", Value::Null)
            .await
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            trace!(session_id = %self.session_id, error = %e, "bridge close");
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use {tokio::net::TcpListener, tokio_tungstenite::accept_async};

    use {
        super::*,
        crate::{
            client::{AuthMode, ConnectionState},
            credentials::AuthState,
        },
    };

    fn request(id: &str) -> ConnectRequest {
        ConnectRequest {
            session_id: id.into(),
            mode: AuthMode::MultiFile,
            auth: AuthState::default(),
        }
    }

    /// Accept one socket, answer `connect`, push `burst` QR events, then
    /// answer every later request with an error.
    async fn sidecar(burst: usize) -> (String, JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut seen = Vec::new();

            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let req: Value = serde_json::from_str(text.as_str()).unwrap();
                seen.push(req.clone());
                if req["method"] == "connect" {
                    ws.send(Message::text(json!({"id": req["id"], "result": {}}).to_string()))
                        .await
                        .unwrap();
                    let event = json!({"event": "connection.update", "data": {"qr": "2@ref"}});
                    for _ in 0..burst {
                        ws.send(Message::text(event.to_string())).await.unwrap();
                    }
                } else {
                    let reply =
                        json!({"id": req["id"], "error": {"code": 404, "message": "item-not-found"}});
                    ws.send(Message::text(reply.to_string())).await.unwrap();
                }
            }
            seen
        });
        (format!("ws://{addr}"), handle)
    }

    #[test]
    fn session_url_is_encoded() {
        let connector = BridgeConnector::new(&BridgeConfig {
            url: "ws://127.0.0.1:3100/".into(),
            request_timeout_secs: 5,
        });
        assert_eq!(
            connector.session_url("a b"),
            "ws://127.0.0.1:3100/sessions/a%20b"
        );
    }

    #[test]
    fn event_frames_decode() {
        let event = parse_event("connection.update", json!({"connection": "close", "statusCode": 515}))
            .unwrap()
            .unwrap();
        let WaEvent::ConnectionUpdate(update) = event else {
            panic!("expected connection update");
        };
        assert_eq!(update.connection, Some(ConnectionState::Close));

        let event = parse_event("chats.set", json!({"chats": [{"id": "1@s.whatsapp.net"}]}))
            .unwrap()
            .unwrap();
        assert_eq!(event, WaEvent::ChatsSet(vec![Chat::new("1@s.whatsapp.net")]));

        assert!(parse_event("presence.update", json!({})).unwrap().is_none());
    }

    #[tokio::test]
    async fn connect_handshake_events_and_errors() {
        let (url, server) = sidecar(1).await;
        let connector = BridgeConnector::new(&BridgeConfig {
            url,
            request_timeout_secs: 5,
        });

        let Connection { client, mut events } = connector.connect(request("alice")).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            WaEvent::ConnectionUpdate(crate::client::ConnectionUpdate::qr("2@ref"))
        );

        let err = client.group_metadata("1-2@g.us").await.unwrap_err();
        assert!(matches!(err, Error::Remote { code: 404, .. }));

        client.close().await;
        let seen = server.await.unwrap();
        assert_eq!(seen[0]["method"], "connect");
        assert_eq!(seen[0]["params"]["legacy"], false);
        assert_eq!(seen[1]["method"], "groupMetadata");
        assert_eq!(seen[1]["params"]["jid"], "1-2@g.us");
    }

    #[tokio::test]
    async fn responses_arrive_while_events_pile_up() {
        let burst = EVENT_BUFFER * 2;
        let (url, server) = sidecar(burst).await;
        let connector = BridgeConnector::new(&BridgeConfig {
            url,
            request_timeout_secs: 2,
        });

        let Connection { client, mut events } = connector.connect(request("alice")).await.unwrap();

        // Nobody drains `events` yet.
        let err = client.group_metadata("1-2@g.us").await.unwrap_err();
        assert!(matches!(err, Error::Remote { code: 404, .. }));

        for _ in 0..burst {
            assert!(events.recv().await.is_some());
        }
        client.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_sidecar_is_a_transport_error() {
        let connector = BridgeConnector::new(&BridgeConfig {
            url: "ws://127.0.0.1:9".into(),
            request_timeout_secs: 1,
        });
        assert!(matches!(
            connector.connect(request("alice")).await,
            Err(Error::Transport(_))
        ));
    }
}
