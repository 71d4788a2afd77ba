use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::Router,
    tokio::signal,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
    wagate_config::WagateConfig,
    wagate_whatsapp::{SessionManager, WaConnector},
};

use crate::{routes, state::GatewayState};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Restore persisted sessions, then serve HTTP until Ctrl-C or SIGTERM.
///
/// A sessions root that cannot be read aborts startup.
pub async fn start_gateway(config: WagateConfig, connector: Arc<dyn WaConnector>) -> anyhow::Result<()> {
    let manager = Arc::new(SessionManager::from_config(&config, connector));
    let restored = manager
        .restore()
        .await
        .context("failed to restore persisted sessions")?;

    let state = GatewayState::new(
        Arc::clone(&manager),
        Duration::from_secs(config.sessions.qr_timeout_secs),
    );
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}, listening on {}", state.version, addr),
        format!(
            "sessions: {} restored from {}",
            restored,
            manager.options().sessions_dir.display()
        ),
        format!("bridge: {}", config.bridge.url),
        format!(
            "webhook: {}",
            config.webhook.target().unwrap_or("disabled")
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("http server stopped, flushing sessions");
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::{Value, json},
        wagate_whatsapp::{
            AuthMode, ConnectionUpdate, DisconnectReason, ManagerOptions, Phase, WaEvent,
            WebhookDispatcher, testing::FakeConnector,
        },
    };

    struct Harness {
        base: String,
        http: reqwest::Client,
        connector: Arc<FakeConnector>,
        manager: Arc<SessionManager>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let connector = Arc::new(FakeConnector::new());
            let mut options = ManagerOptions::new(dir.path());
            options.send_delay = Duration::ZERO;
            let manager = Arc::new(SessionManager::new(
                Arc::clone(&connector) as Arc<dyn WaConnector>,
                WebhookDispatcher::disabled(),
                options,
            ));
            let state = GatewayState::new(Arc::clone(&manager), Duration::from_secs(5));

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, build_gateway_app(state)).await.unwrap();
            });

            Self {
                base: format!("http://{addr}"),
                http: reqwest::Client::new(),
                connector,
                manager,
                _dir: dir,
            }
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self.http.get(format!("{}{path}", self.base)).send().await.unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap())
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .http
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap())
        }

        async fn delete(&self, path: &str) -> (u16, Value) {
            let resp = self.http.delete(format!("{}{path}", self.base)).send().await.unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap())
        }

        /// Open `id` directly and mark its connection open.
        async fn connected(&self, id: &str) {
            self.manager
                .open_session(id, AuthMode::MultiFile, None)
                .await
                .unwrap();
            assert!(
                self.connector
                    .emit(id, WaEvent::ConnectionUpdate(ConnectionUpdate::open()))
                    .await
            );
            for _ in 0..100 {
                if self.manager.get(id).unwrap().phase().await == Phase::Open {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("session {id} never opened");
        }

        /// Wait until the add request's connection exists, then push `event`.
        async fn emit_when_connected(connector: Arc<FakeConnector>, id: String, event: WaEvent) {
            for _ in 0..200 {
                if connector.connect_count(&id) > 0 {
                    connector.emit(&id, event).await;
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let h = Harness::start().await;
        h.connected("alpha").await;

        let (status, body) = h.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
    }

    #[tokio::test]
    async fn add_returns_qr_code() {
        let h = Harness::start().await;
        tokio::spawn(Harness::emit_when_connected(
            Arc::clone(&h.connector),
            "alpha".into(),
            WaEvent::ConnectionUpdate(ConnectionUpdate::qr("pairing-payload")),
        ));

        let (status, body) = h
            .post("/sessions/add", json!({"id": "alpha", "isLegacy": "false"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "QR code received, please scan the QR code.");
        assert!(
            body["data"]["qr"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
        assert!(h.manager.exists("alpha"));
    }

    #[tokio::test]
    async fn add_reports_logged_out_failure() {
        let h = Harness::start().await;
        tokio::spawn(Harness::emit_when_connected(
            Arc::clone(&h.connector),
            "alpha".into(),
            WaEvent::ConnectionUpdate(ConnectionUpdate::closed(DisconnectReason::LoggedOut)),
        ));

        let (status, body) = h
            .post("/sessions/add", json!({"id": "alpha", "isLegacy": true}))
            .await;
        assert_eq!(status, 500);
        assert_eq!(body["message"], "Unable to create session.");
        assert!(!h.manager.exists("alpha"));
    }

    #[tokio::test]
    async fn add_validates_and_rejects_duplicates() {
        let h = Harness::start().await;

        let (status, body) = h.post("/sessions/add", json!({"id": "alpha"})).await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], "Please fill out all required input.");

        h.connected("alpha").await;
        let (status, body) = h
            .post("/sessions/add", json!({"id": "alpha", "isLegacy": "false"}))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], "Session already exists, please use another id.");
    }

    #[tokio::test]
    async fn find_status_and_delete() {
        let h = Harness::start().await;
        h.connected("alpha").await;

        let (status, body) = h.get("/sessions/find/alpha").await;
        assert_eq!((status, body["message"].as_str()), (200, Some("Session found.")));

        let (status, body) = h.get("/sessions/status/alpha").await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["status"], "open");

        let (status, body) = h.get("/sessions").await;
        assert_eq!(status, 200);
        assert_eq!(body["data"][0]["id"], "alpha");

        let client = h.connector.client("alpha").unwrap();
        let (status, _) = h.delete("/sessions/delete/alpha").await;
        assert_eq!(status, 200);
        assert!(client.was_called("logout"));
        assert!(!h.manager.exists("alpha"));

        let (status, body) = h.delete("/sessions/delete/alpha").await;
        assert_eq!(status, 404);
        assert_eq!(body["message"], "Session not found.");
        let (status, _) = h.get("/sessions/find/alpha").await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn delete_proceeds_when_logout_fails() {
        let h = Harness::start().await;
        h.connected("alpha").await;
        let client = h.connector.client("alpha").unwrap();
        client.fail_calls(true);

        let (status, body) = h.delete("/sessions/delete/alpha").await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "The session has been successfully deleted.");
        assert!(client.was_called("logout"));
        assert!(!h.manager.exists("alpha"));
    }

    #[tokio::test]
    async fn send_checks_the_receiver() {
        let h = Harness::start().await;
        h.connector.with_registered("6281234567@s.whatsapp.net");
        h.connected("alpha").await;

        let (status, body) = h
            .post(
                "/chats/send?id=alpha",
                json!({"receiver": "+62 8123-4567", "message": {"text": "hi"}}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "The message has been successfully sent.");
        let sent = h.connector.client("alpha").unwrap().sent();
        assert_eq!(sent, vec![("6281234567@s.whatsapp.net".to_string(), json!({"text": "hi"}))]);

        let (status, body) = h
            .post("/chats/send?id=alpha", json!({"receiver": "999", "message": {"text": "hi"}}))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], "The receiver number is not exists.");
    }

    #[tokio::test]
    async fn validation_precedes_session_lookup() {
        let h = Harness::start().await;

        let (status, _) = h.post("/chats/send?id=ghost", json!({"receiver": "1"})).await;
        assert_eq!(status, 400);

        let (status, _) = h.post("/chats/send", json!({"receiver": "1", "message": "x"})).await;
        assert_eq!(status, 400);

        let (status, body) = h
            .post("/chats/send?id=ghost", json!({"receiver": "1", "message": "x"}))
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["message"], "Session not found.");
    }

    #[tokio::test]
    async fn send_bulk_collects_failed_indices() {
        let h = Harness::start().await;
        h.connector.with_registered("111@s.whatsapp.net");
        h.connector.with_registered("333@s.whatsapp.net");
        h.connected("alpha").await;

        let (status, body) = h
            .post(
                "/chats/send-bulk?id=alpha",
                json!([
                    {"receiver": "111", "message": {"text": "a"}, "delay": 0},
                    {"receiver": "222", "message": {"text": "b"}, "delay": 0},
                    {"receiver": "333", "message": {"text": "c"}, "delay": 0},
                ]),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "Some messages has been successfully sent.");
        assert_eq!(body["data"]["errors"], json!([1]));
        assert_eq!(h.connector.client("alpha").unwrap().sent().len(), 2);
    }

    #[tokio::test]
    async fn group_operations_check_existence() {
        let h = Harness::start().await;
        h.connector.with_group("120363-111@g.us", "Team");
        h.connected("alpha").await;

        let (status, body) = h
            .post(
                "/groups/updatesubject?id=alpha",
                json!({"jid": "120363-111", "subject": "Renamed"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "The subject has been successfully updated.");
        let client = h.connector.client("alpha").unwrap();
        assert_eq!(
            client.group("120363-111@g.us").unwrap().subject.as_deref(),
            Some("Renamed")
        );

        let (status, body) = h
            .post("/groups/invitecode?id=alpha", json!({"jid": "120363-111"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "https://chat.whatsapp.com/INVITE-120363-111@g.us");

        let (status, body) = h
            .post("/groups/invitecode?id=alpha", json!({"jid": "999-999"}))
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], "The group is not exists.");

        let (status, body) = h.get("/groups/meta/120363-111?id=alpha").await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["id"], "120363-111@g.us");
    }

    #[tokio::test]
    async fn group_meta_separates_missing_groups_from_backend_failures() {
        let h = Harness::start().await;
        h.connected("alpha").await;
        let client = h.connector.client("alpha").unwrap();
        client.add_group_without_id("120363-222@g.us");

        let (status, body) = h.get("/groups/meta/120363-222@g.us?id=alpha").await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], "The group is not exists.");

        client.fail_calls(true);
        let (status, body) = h.get("/groups/meta/120363-222@g.us?id=alpha").await;
        assert_eq!(status, 500);
        assert_eq!(body["message"], "Failed to get group metadata.");
        assert_eq!(client.call_count("group_metadata"), 2);
    }

    #[tokio::test]
    async fn group_setting_rejects_unknown_action() {
        let h = Harness::start().await;
        h.connector.with_group("120363-111@g.us", "Team");
        h.connected("alpha").await;

        let (status, _) = h
            .post(
                "/groups/updatesetting?id=alpha",
                json!({"jid": "120363-111", "action": "shuffle"}),
            )
            .await;
        assert_eq!(status, 400);

        let (status, body) = h
            .post(
                "/groups/updatesetting?id=alpha",
                json!({"jid": "120363-111", "action": "locked"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "The setting has been successfully updated.");
    }

    #[tokio::test]
    async fn create_group_and_update_participants() {
        let h = Harness::start().await;
        h.connected("alpha").await;

        let (status, body) = h
            .post(
                "/groups/creategroup?id=alpha",
                json!({"name": "New", "users": ["111", "222"]}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["subject"], "New");
        let client = h.connector.client("alpha").unwrap();
        assert_eq!(
            client.last_participants(),
            vec!["111@s.whatsapp.net", "222@s.whatsapp.net"]
        );

        let (status, body) = h
            .post(
                "/groups/participantsupdate?id=alpha",
                json!({"jid": "1-1", "users": ["333"], "action": "promote"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "The participants has been successfully updated.");

        client.fail_calls(true);
        let (status, body) = h.get("/groups/participating?id=alpha").await;
        assert_eq!(status, 500);
        assert_eq!(body["message"], "Failed to get all participants.");
    }

    #[tokio::test]
    async fn on_whatsapp_requires_a_number() {
        let h = Harness::start().await;
        h.connector.with_registered("111@s.whatsapp.net");
        h.connected("alpha").await;

        let (status, _) = h.get("/misc/onwhatsapp?id=alpha").await;
        assert_eq!(status, 400);

        let (status, body) = h
            .get("/misc/onwhatsapp?id=alpha&number=111@s.whatsapp.net")
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"][0]["exists"], true);
    }
}
