use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Query, State},
        routing::get,
    },
    serde::Deserialize,
};

use crate::{
    extract::{SessionId, filled},
    response::{ApiResult, Reply},
    state::GatewayState,
};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new().route("/onwhatsapp", get(on_whatsapp))
}

#[derive(Debug, Deserialize)]
pub struct NumberQuery {
    #[serde(default)]
    number: String,
}

async fn on_whatsapp(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Query(query): Query<NumberQuery>,
) -> ApiResult {
    if !filled(&query.number) {
        return Err(Reply::invalid_input());
    }
    let session = state.session(&id)?;
    let status = session
        .on_whatsapp(&query.number)
        .await
        .map_err(|_| Reply::failed("Failed to check the number."))?;
    Ok(Reply::data(status))
}
