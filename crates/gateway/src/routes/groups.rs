//! Group routes. Operations on an existing group first check that the
//! group exists and answer 400 when it does not. Metadata lookups skip the
//! check: the lookup itself tells a missing group from a failing backend.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, State},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::Value,
    wagate_whatsapp::{Error, GroupSetting, ParticipantAction, Session, jid},
};

use crate::{
    extract::{Required, SessionId, Valid, filled, filled_value},
    response::{ApiResult, GROUP_NOT_FOUND, Reply},
    state::GatewayState,
};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list))
        .route("/meta/{jid}", get(meta))
        .route("/participating", get(participating))
        .route("/send", post(send))
        .route("/updatesubject", post(update_subject))
        .route("/updatedescription", post(update_description))
        .route("/updatesetting", post(update_setting))
        .route("/updatepicture", post(update_picture))
        .route("/invitecode", post(invite_code))
        .route("/creategroup", post(create_group))
        .route("/participantsupdate", post(participants_update))
}

// ── Request bodies ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SendToGroup {
    #[serde(default)]
    receiver: String,
    #[serde(default)]
    message: Value,
}

impl Required for SendToGroup {
    fn is_complete(&self) -> bool {
        filled(&self.receiver) && filled_value(&self.message)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubject {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    subject: String,
}

impl Required for UpdateSubject {
    fn is_complete(&self) -> bool {
        filled(&self.jid) && filled(&self.subject)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateDescription {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    description: String,
}

impl Required for UpdateDescription {
    fn is_complete(&self) -> bool {
        filled(&self.jid) && filled(&self.description)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSetting {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    action: Option<GroupSetting>,
}

impl Required for UpdateSetting {
    fn is_complete(&self) -> bool {
        filled(&self.jid) && self.action.is_some()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePicture {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    url: String,
}

impl Required for UpdatePicture {
    fn is_complete(&self) -> bool {
        filled(&self.jid) && filled(&self.url)
    }
}

#[derive(Debug, Deserialize)]
pub struct InviteCode {
    #[serde(default)]
    jid: String,
}

impl Required for InviteCode {
    fn is_complete(&self) -> bool {
        filled(&self.jid)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGroup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

impl Required for CreateGroup {
    fn is_complete(&self) -> bool {
        filled(&self.name) && !self.users.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsUpdate {
    #[serde(default)]
    jid: String,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    action: Option<ParticipantAction>,
}

impl Required for ParticipantsUpdate {
    fn is_complete(&self) -> bool {
        filled(&self.jid) && !self.users.is_empty() && self.action.is_some()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Resolve the session and normalize `raw` into a group JID that exists.
async fn existing_group(
    state: &GatewayState,
    id: &str,
    raw: &str,
) -> Result<(Arc<Session>, String), Reply> {
    let session = state.session(id)?;
    let group = jid::format_group(raw);
    if !session.is_exists(&group, true).await {
        return Err(Reply::bad_request(GROUP_NOT_FOUND));
    }
    Ok((session, group))
}

async fn list(State(state): State<Arc<GatewayState>>, SessionId(id): SessionId) -> ApiResult {
    state.session(&id)?;
    let groups = state
        .manager
        .list_chats(&id, true)
        .await
        .map_err(|_| Reply::failed("Failed to get the group list."))?;
    Ok(Reply::data(groups))
}

async fn meta(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Path(raw): Path<String>,
) -> ApiResult {
    let session = state.session(&id)?;
    match session.group_metadata(&jid::format_group(&raw)).await {
        Ok(metadata) => Ok(Reply::data(metadata)),
        Err(Error::TargetNotFound) => Err(Reply::bad_request(GROUP_NOT_FOUND)),
        Err(_) => Err(Reply::failed("Failed to get group metadata.")),
    }
}

async fn participating(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
) -> ApiResult {
    let session = state.session(&id)?;
    let groups = session
        .group_fetch_all_participating()
        .await
        .map_err(|_| Reply::failed("Failed to get all participants."))?;
    Ok(Reply::data(groups))
}

async fn send(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<SendToGroup>,
) -> ApiResult {
    let (session, group) = existing_group(&state, &id, &body.receiver).await?;
    session
        .send_message(&group, &body.message, state.manager.send_delay())
        .await
        .map_err(|_| Reply::failed("Failed to send the message."))?;
    Ok(Reply::ok("The message has been successfully sent."))
}

async fn update_subject(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<UpdateSubject>,
) -> ApiResult {
    let (session, group) = existing_group(&state, &id, &body.jid).await?;
    session
        .group_update_subject(&group, &body.subject)
        .await
        .map_err(|_| Reply::failed("Failed to update the subject."))?;
    Ok(Reply::ok("The subject has been successfully updated."))
}

async fn update_description(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<UpdateDescription>,
) -> ApiResult {
    let (session, group) = existing_group(&state, &id, &body.jid).await?;
    session
        .group_update_description(&group, &body.description)
        .await
        .map_err(|_| Reply::failed("Failed to update the description."))?;
    Ok(Reply::ok("The description has been successfully updated."))
}

async fn update_setting(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<UpdateSetting>,
) -> ApiResult {
    let Some(setting) = body.action else {
        return Err(Reply::invalid_input());
    };
    let (session, group) = existing_group(&state, &id, &body.jid).await?;
    session
        .group_setting_update(&group, setting)
        .await
        .map_err(|_| Reply::failed("Failed to update the setting."))?;
    Ok(Reply::ok("The setting has been successfully updated."))
}

async fn update_picture(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<UpdatePicture>,
) -> ApiResult {
    let (session, group) = existing_group(&state, &id, &body.jid).await?;
    session
        .update_profile_picture(&state.http, &group, &body.url)
        .await
        .map_err(|_| Reply::failed("Failed to update the profile picture."))?;
    Ok(Reply::ok("The profile picture has been successfully updated."))
}

/// The invite link is returned as the message.
async fn invite_code(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<InviteCode>,
) -> ApiResult {
    let (session, group) = existing_group(&state, &id, &body.jid).await?;
    let link = session
        .group_invite_link(&group)
        .await
        .map_err(|_| Reply::failed("Failed to get invite group."))?;
    Ok(Reply::ok(link))
}

async fn create_group(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<CreateGroup>,
) -> ApiResult {
    let session = state.session(&id)?;
    let metadata = session
        .group_create(&body.name, &body.users)
        .await
        .map_err(|_| Reply::failed("Failed to create a new group."))?;
    Ok(Reply::data(metadata))
}

async fn participants_update(
    State(state): State<Arc<GatewayState>>,
    SessionId(id): SessionId,
    Valid(body): Valid<ParticipantsUpdate>,
) -> ApiResult {
    let Some(action) = body.action else {
        return Err(Reply::invalid_input());
    };
    let session = state.session(&id)?;
    session
        .group_participants_update(&jid::format_group(&body.jid), &body.users, action)
        .await
        .map_err(|_| Reply::failed("Failed to participants update."))?;
    Ok(Reply::ok("The participants has been successfully updated."))
}
