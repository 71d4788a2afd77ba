//! Session lifecycle routes: add, find, status, list, delete.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, State},
        routing::{delete, get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{debug, info, warn},
    wagate_whatsapp::{AuthMode, Error, OpenOutcome, QrWaiter, machine::UNABLE_TO_CREATE_SESSION},
};

use crate::{
    extract::{Required, Valid, filled, filled_value},
    response::{ApiResult, Reply, SESSION_NOT_FOUND},
    state::GatewayState,
};

pub const SESSION_EXISTS: &str = "Session already exists, please use another id.";
pub const QR_RECEIVED: &str = "QR code received, please scan the QR code.";

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list))
        .route("/find/{id}", get(find))
        .route("/status/{id}", get(status))
        .route("/add", post(add))
        .route("/delete/{id}", delete(remove))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSession {
    #[serde(default)]
    id: String,
    #[serde(default)]
    is_legacy: Value,
}

impl AddSession {
    /// Accepts `true` and `"true"`; anything else means multi-file.
    fn legacy(&self) -> bool {
        match &self.is_legacy {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true",
            _ => false,
        }
    }
}

impl Required for AddSession {
    fn is_complete(&self) -> bool {
        filled(&self.id) && filled_value(&self.is_legacy)
    }
}

async fn list(State(state): State<Arc<GatewayState>>) -> ApiResult {
    Ok(Reply::data(state.manager.list_info().await))
}

async fn find(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> ApiResult {
    if state.manager.exists(&id) {
        Ok(Reply::ok("Session found."))
    } else {
        Err(Reply::not_found(SESSION_NOT_FOUND))
    }
}

async fn status(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> ApiResult {
    let session = state.session(&id)?;
    let info = session.info().await;
    Ok(Reply::data(json!({
        "status": info.phase,
        "legacy": info.legacy,
    })))
}

/// Open a session and hold the request until the first QR code, a
/// connection, or a failure. Gives up after the configured QR wait.
async fn add(State(state): State<Arc<GatewayState>>, Valid(body): Valid<AddSession>) -> ApiResult {
    if state.manager.exists(&body.id) {
        return Err(Reply::bad_request(SESSION_EXISTS));
    }

    let (waiter, rx) = QrWaiter::new();
    let mode = AuthMode::from_legacy_flag(body.legacy());
    match state.manager.open_session(&body.id, mode, Some(waiter)).await {
        Ok(_) => {},
        Err(Error::SessionExists(_)) => return Err(Reply::bad_request(SESSION_EXISTS)),
        Err(Error::InvalidSessionId(_)) => return Err(Reply::invalid_input()),
        Err(e) => {
            warn!(session_id = %body.id, error = %e, "failed to open session");
            return Err(Reply::failed(UNABLE_TO_CREATE_SESSION));
        },
    }

    match tokio::time::timeout(state.qr_timeout, rx).await {
        Ok(Ok(OpenOutcome::Qr(qr))) => Ok(Reply::ok(QR_RECEIVED).with_data(json!({ "qr": qr }))),
        Ok(Ok(OpenOutcome::Connected)) => Ok(Reply::ok("Session connected.")),
        Ok(Ok(OpenOutcome::Failed(message))) => Err(Reply::failed(message)),
        Ok(Err(_)) => Err(Reply::failed(UNABLE_TO_CREATE_SESSION)),
        Err(_) => {
            warn!(session_id = %body.id, "no QR code before timeout");
            Err(Reply::failed(UNABLE_TO_CREATE_SESSION))
        },
    }
}

async fn remove(State(state): State<Arc<GatewayState>>, Path(id): Path<String>) -> ApiResult {
    let session = state.session(&id)?;
    // The device may already be gone; deletion proceeds regardless.
    if let Err(e) = session.logout().await {
        debug!(session_id = %id, error = %e, "logout before delete failed");
    }

    match state.manager.delete_session(&id).await {
        Ok(_) => {
            info!(session_id = %id, "session deleted");
            Ok(Reply::ok("The session has been successfully deleted."))
        },
        Err(e) => {
            warn!(session_id = %id, error = %e, "failed to delete session");
            Err(Reply::failed("Failed to delete the session."))
        },
    }
}
