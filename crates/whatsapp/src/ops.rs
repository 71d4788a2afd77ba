//! Remote protocol operations on a live session.
//!
//! Every failure is reported as [`Error::OperationFailed`]; the underlying
//! cause is only logged. Nothing here retries or touches the lifecycle.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {serde_json::Value, tracing::debug};

use crate::{
    client::{GroupMetadata, GroupSetting, ParticipantAction, RegistrationStatus, WaClient},
    error::{Error, Result},
    jid,
    session::Session,
};

/// Invite links are the invite code under this prefix.
pub const INVITE_LINK_PREFIX: &str = "https://chat.whatsapp.com/";

fn opaque<T>(session_id: &str, op: &'static str, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        debug!(session_id, op, error = %e, "remote call failed");
        Error::OperationFailed
    })
}

impl Session {
    async fn connected_client(&self, op: &'static str) -> Result<Arc<dyn WaClient>> {
        self.client().await.ok_or_else(|| {
            debug!(session_id = %self.id(), op, "no live connection");
            Error::OperationFailed
        })
    }

    /// Wait `delay`, then send. `content` is the backend message object.
    pub async fn send_message(&self, jid: &str, content: &Value, delay: Duration) -> Result<Value> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let client = self.connected_client("send_message").await?;
        opaque(self.id(), "send_message", client.send_message(jid, content).await)
    }

    /// Log the device out. Does not touch the registry; pair with
    /// [`SessionManager::delete_session`](crate::SessionManager::delete_session).
    pub async fn logout(&self) -> Result<()> {
        let client = self.connected_client("logout").await?;
        opaque(self.id(), "logout", client.logout().await)
    }

    /// Whether a user is registered or a group exists. Any failure counts
    /// as "does not exist".
    pub async fn is_exists(&self, jid: &str, is_group: bool) -> bool {
        let Some(client) = self.client().await else {
            return false;
        };
        if is_group {
            return client
                .group_metadata(jid)
                .await
                .is_ok_and(|meta| !meta.id.is_empty());
        }
        match client.on_whatsapp(jid).await {
            Ok(results) => results.first().is_some_and(|r| r.exists),
            Err(e) => {
                debug!(session_id = %self.id(), jid, error = %e, "registration check failed");
                false
            },
        }
    }

    /// Group metadata, or [`Error::TargetNotFound`] when the group is unknown.
    pub async fn group_metadata(&self, jid: &str) -> Result<GroupMetadata> {
        let client = self.connected_client("group_metadata").await?;
        let meta = opaque(self.id(), "group_metadata", client.group_metadata(jid).await)?;
        if meta.id.is_empty() {
            return Err(Error::TargetNotFound);
        }
        Ok(meta)
    }

    /// Registration check for a number. Group ids always exist.
    pub async fn on_whatsapp(&self, number: &str) -> Result<Vec<RegistrationStatus>> {
        if number.contains(jid::GROUP_SUFFIX) {
            return Ok(vec![RegistrationStatus {
                exists: true,
                jid: None,
            }]);
        }
        let client = self.connected_client("on_whatsapp").await?;
        opaque(self.id(), "on_whatsapp", client.on_whatsapp(number).await)
    }

    pub async fn group_update_subject(&self, jid: &str, subject: &str) -> Result<()> {
        let client = self.connected_client("group_update_subject").await?;
        opaque(
            self.id(),
            "group_update_subject",
            client.group_update_subject(jid, subject).await,
        )
    }

    pub async fn group_update_description(&self, jid: &str, description: &str) -> Result<()> {
        let client = self.connected_client("group_update_description").await?;
        opaque(
            self.id(),
            "group_update_description",
            client.group_update_description(jid, description).await,
        )
    }

    pub async fn group_setting_update(&self, jid: &str, setting: GroupSetting) -> Result<()> {
        let client = self.connected_client("group_setting_update").await?;
        opaque(
            self.id(),
            "group_setting_update",
            client.group_setting_update(jid, setting).await,
        )
    }

    /// Download the image at `url` and set it as the profile picture of `jid`.
    pub async fn update_profile_picture(
        &self,
        http: &reqwest::Client,
        jid: &str,
        url: &str,
    ) -> Result<()> {
        let image = opaque(self.id(), "fetch_picture", fetch_bytes(http, url).await)?;
        let client = self.connected_client("update_profile_picture").await?;
        opaque(
            self.id(),
            "update_profile_picture",
            client.update_profile_picture(jid, image).await,
        )
    }

    /// Shareable invite link of a group.
    pub async fn group_invite_link(&self, jid: &str) -> Result<String> {
        let client = self.connected_client("group_invite_code").await?;
        let code = opaque(
            self.id(),
            "group_invite_code",
            client.group_invite_code(jid).await,
        )?;
        Ok(format!("{INVITE_LINK_PREFIX}{code}"))
    }

    pub async fn group_create<S: AsRef<str>>(&self, subject: &str, users: &[S]) -> Result<GroupMetadata> {
        let participants = jid::parse_participants(users);
        let client = self.connected_client("group_create").await?;
        opaque(
            self.id(),
            "group_create",
            client.group_create(subject, &participants).await,
        )
    }

    pub async fn group_participants_update<S: AsRef<str>>(
        &self,
        jid: &str,
        users: &[S],
        action: ParticipantAction,
    ) -> Result<Value> {
        let participants = jid::parse_participants(users);
        let client = self.connected_client("group_participants_update").await?;
        opaque(
            self.id(),
            "group_participants_update",
            client
                .group_participants_update(jid, &participants, action)
                .await,
        )
    }

    pub async fn group_fetch_all_participating(&self) -> Result<BTreeMap<String, GroupMetadata>> {
        let client = self.connected_client("group_fetch_all_participating").await?;
        opaque(
            self.id(),
            "group_fetch_all_participating",
            client.group_fetch_all_participating().await,
        )
    }
}

async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let resp = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Transport(e.to_string()))?;
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use {
        super::*,
        crate::{client::AuthMode, store::ChatStore, testing::FakeClient},
    };

    async fn session_with(client: Arc<FakeClient>) -> Session {
        let session = Session::new("alice", AuthMode::MultiFile, 1, Arc::new(ChatStore::new()));
        session.set_client(Some(client as Arc<dyn WaClient>)).await;
        session
    }

    #[tokio::test(start_paused = true)]
    async fn send_waits_for_the_delay() {
        let client = Arc::new(FakeClient::new());
        let session = session_with(Arc::clone(&client)).await;

        let started = tokio::time::Instant::now();
        let task = tokio::spawn(async move {
            session
                .send_message("1@s.whatsapp.net", &json!({"text": "hi"}), Duration::from_secs(1))
                .await
        });
        tokio::task::yield_now().await;
        assert!(!client.was_called("send_message"));

        task.await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(client.was_called("send_message"));
    }

    #[tokio::test]
    async fn remote_failure_is_opaque_and_not_retried() {
        let client = Arc::new(FakeClient::new());
        client.fail_calls(true);
        let session = session_with(Arc::clone(&client)).await;

        let err = session
            .send_message("1@s.whatsapp.net", &json!({"text": "hi"}), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed));
        assert_eq!(client.call_count("send_message"), 1);
    }

    #[tokio::test]
    async fn disconnected_session_fails_operations() {
        let session = Session::new("alice", AuthMode::Legacy, 1, Arc::new(ChatStore::new()));
        assert!(matches!(
            session.group_invite_link("1-2@g.us").await,
            Err(Error::OperationFailed)
        ));
        assert!(!session.is_exists("1@s.whatsapp.net", false).await);
    }

    #[tokio::test]
    async fn existence_checks() {
        let client = Arc::new(FakeClient::new());
        client.add_group("1-2@g.us", "team");
        client.register("628@s.whatsapp.net");
        let session = session_with(Arc::clone(&client)).await;

        assert!(session.is_exists("1-2@g.us", true).await);
        assert!(!session.is_exists("9-9@g.us", true).await);
        assert!(session.is_exists("628@s.whatsapp.net", false).await);
        assert!(!session.is_exists("629@s.whatsapp.net", false).await);

        assert!(matches!(
            session.group_metadata("9-9@g.us").await,
            Err(Error::OperationFailed)
        ));
        assert_eq!(session.group_metadata("1-2@g.us").await.unwrap().id, "1-2@g.us");
    }

    #[tokio::test]
    async fn on_whatsapp_short_circuits_groups() {
        let client = Arc::new(FakeClient::new());
        let session = session_with(Arc::clone(&client)).await;
        let result = session.on_whatsapp("1-2@g.us").await.unwrap();
        assert!(result[0].exists);
        assert!(!client.was_called("on_whatsapp"));
    }

    #[tokio::test]
    async fn invite_link_and_participants() {
        let client = Arc::new(FakeClient::new());
        client.add_group("1-2@g.us", "team");
        let session = session_with(Arc::clone(&client)).await;

        assert_eq!(
            session.group_invite_link("1-2@g.us").await.unwrap(),
            "https://chat.whatsapp.com/INVITE-1-2@g.us"
        );

        session
            .group_participants_update("1-2@g.us", &["628", "629-1"], ParticipantAction::Add)
            .await
            .unwrap();
        assert_eq!(
            client.last_participants(),
            vec!["628@s.whatsapp.net".to_string(), "629-1@g.us".to_string()]
        );
    }

    #[tokio::test]
    async fn profile_picture_is_downloaded_first() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pic.png")
            .with_status(200)
            .with_body(b"\x89PNG-bytes".as_slice())
            .create_async()
            .await;

        let client = Arc::new(FakeClient::new());
        let session = session_with(Arc::clone(&client)).await;
        session
            .update_profile_picture(
                &reqwest::Client::new(),
                "1-2@g.us",
                &format!("{}/pic.png", server.url()),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(client.was_called("update_profile_picture"));

        let missing = session
            .update_profile_picture(&reqwest::Client::new(), "1-2@g.us", "http://127.0.0.1:9/x")
            .await;
        assert!(matches!(missing, Err(Error::OperationFailed)));
    }
}
