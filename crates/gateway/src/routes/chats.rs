//! Individual chat routes: list, send, send-bulk.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::State,
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    wagate_whatsapp::jid,
};

use crate::{
    extract::{Required, SessionId, Valid, filled, filled_value},
    response::{ApiResult, RECEIVER_NOT_FOUND, Reply},
    state::GatewayState,
};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list))
        .route("/send", post(send))
        .route("/send-bulk", post(send_bulk))
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    #[serde(default)]
    receiver: String,
    #[serde(default)]
    message: Value,
    /// Per-item delay in milliseconds (bulk only).
    #[serde(default)]
    delay: Option<u64>,
}

impl Required for SendMessage {
    fn is_complete(&self) -> bool {
        filled(&self.receiver) && filled_value(&self.message)
    }
}

async fn list(State(state): State<Arc<GatewayState>>, SessionId(id): SessionId) -> ApiResult {
    state.session(&id)?;
    let chats = state
        .manager
        .list_chats(&id, false)
        .await
        .map_err(|_| Reply::failed("Failed to get the chat list."))?;
    Ok(Reply::data(chats))
}

async fn send(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<SendMessage>,
) -> ApiResult {
    let session = state.session(&id)?;
    let receiver = jid::format_phone(&body.receiver);

    if !session.is_exists(&receiver, false).await {
        return Err(Reply::bad_request(RECEIVER_NOT_FOUND));
    }

    session
        .send_message(&receiver, &body.message, state.manager.send_delay())
        .await
        .map_err(|_| Reply::failed("Failed to send the message."))?;
    Ok(Reply::ok("The message has been successfully sent."))
}

/// Send each item in order. Items whose receiver is unknown or whose send
/// fails are reported by index.
async fn send_bulk(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(items): Valid<Vec<SendMessage>>,
) -> ApiResult {
    let session = state.session(&id)?;
    let mut errors = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let receiver = jid::format_phone(&item.receiver);
        if !session.is_exists(&receiver, false).await {
            errors.push(index);
            continue;
        }
        let delay = item
            .delay
            .map(Duration::from_millis)
            .unwrap_or_else(|| state.manager.send_delay());
        if session.send_message(&receiver, &item.message, delay).await.is_err() {
            errors.push(index);
        }
    }

    if errors.is_empty() {
        return Ok(Reply::ok("All messages has been successfully sent."));
    }
    if errors.len() == items.len() {
        return Err(Reply::failed("Failed to send all messages.").with_data(json!({ "errors": errors })));
    }
    Ok(Reply::ok("Some messages has been successfully sent.").with_data(json!({ "errors": errors })))
}
