//! Durable per-session credentials.
//!
//! Layout under the sessions root:
//! - `legacy_{id}.json`: legacy mode, one JSON document `{creds, keys}`
//! - `md_{id}/creds.json` + `md_{id}/key-{name}.json`: multi-file mode, with
//!   `name` percent-encoded so every key name maps to exactly one file
//!
//! Every write goes to a `*.tmp` sibling first and is renamed into place.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::{debug, trace, warn},
};

use crate::{
    client::{AuthMode, CredentialUpdate},
    error::{Error, Result},
};

const CREDS_FILE: &str = "creds.json";
const KEY_PREFIX: &str = "key-";
const TMP_SUFFIX: &str = ".tmp";
/// Suffix of chat mirror snapshots; these share the root but are not credentials.
pub const MIRROR_SUFFIX: &str = "_store.json";

/// Key material of one session. Opaque to the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default)]
    pub creds: Map<String, Value>,
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

impl AuthState {
    /// Whether the backend has issued credentials yet (i.e. the device was linked).
    pub fn is_initialized(&self) -> bool {
        !self.creds.is_empty()
    }

    /// Merge a rotation into this state.
    pub fn apply(&mut self, update: &CredentialUpdate) {
        if let Some(creds) = &update.creds {
            for (k, v) in creds {
                self.creds.insert(k.clone(), v.clone());
            }
        }
        for (name, value) in &update.keys {
            match value {
                Some(v) => {
                    self.keys.insert(name.clone(), v.clone());
                },
                None => {
                    self.keys.remove(name);
                },
            }
        }
    }
}

/// A credential artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub id: String,
    pub mode: AuthMode,
    pub path: PathBuf,
}

/// Reject ids that could escape the sessions root or collide with its naming.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && !id.ends_with(TMP_SUFFIX)
        && !id.ends_with("_store")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSessionId(id.to_string()))
    }
}

/// File-based credential storage rooted at the sessions directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the credential artifact for `(id, mode)`.
    pub fn artifact_path(&self, id: &str, mode: AuthMode) -> PathBuf {
        match mode {
            AuthMode::Legacy => self.root.join(format!("{}{id}.json", mode.prefix())),
            AuthMode::MultiFile => self.root.join(format!("{}{id}", mode.prefix())),
        }
    }

    /// Path of the chat mirror snapshot for `id`.
    pub fn mirror_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}{MIRROR_SUFFIX}"))
    }

    /// Load credentials, or an empty state when none were persisted yet.
    pub async fn load(&self, id: &str, mode: AuthMode) -> Result<AuthState> {
        let path = self.artifact_path(id, mode);
        let state = match mode {
            AuthMode::Legacy => match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == ErrorKind::NotFound => AuthState::default(),
                Err(e) => return Err(e.into()),
            },
            AuthMode::MultiFile => load_dir(&path).await?,
        };
        debug!(
            session_id = %id,
            ?mode,
            initialized = state.is_initialized(),
            keys = state.keys.len(),
            "loaded credentials"
        );
        Ok(state)
    }

    /// Persist a credential rotation. Returns once the data is on disk.
    pub async fn apply(&self, id: &str, mode: AuthMode, update: &CredentialUpdate) -> Result<()> {
        let path = self.artifact_path(id, mode);
        tokio::fs::create_dir_all(&self.root).await?;

        match mode {
            AuthMode::Legacy => {
                let mut state = self.load(id, mode).await?;
                state.apply(update);
                write_atomic(&path, &serde_json::to_vec(&state)?).await?;
            },
            AuthMode::MultiFile => {
                tokio::fs::create_dir_all(&path).await?;
                if let Some(creds) = &update.creds {
                    let creds_path = path.join(CREDS_FILE);
                    let mut current = match tokio::fs::read(&creds_path).await {
                        Ok(bytes) => serde_json::from_slice::<Map<String, Value>>(&bytes)?,
                        Err(e) if e.kind() == ErrorKind::NotFound => Map::new(),
                        Err(e) => return Err(e.into()),
                    };
                    for (k, v) in creds {
                        current.insert(k.clone(), v.clone());
                    }
                    write_atomic(&creds_path, &serde_json::to_vec(&current)?).await?;
                }
                for (name, value) in &update.keys {
                    let key_path = path.join(key_file_name(name));
                    match value {
                        Some(v) => write_atomic(&key_path, &serde_json::to_vec(v)?).await?,
                        None => remove_if_exists(&key_path).await?,
                    }
                }
            },
        }
        trace!(session_id = %id, ?mode, keys = update.keys.len(), "persisted credential update");
        Ok(())
    }

    /// Erase the credential artifact for `(id, mode)`. Missing artifacts are fine.
    pub async fn remove(&self, id: &str, mode: AuthMode) -> Result<()> {
        let path = self.artifact_path(id, mode);
        match mode {
            AuthMode::Legacy => remove_if_exists(&path).await?,
            AuthMode::MultiFile => match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            },
        }
        remove_if_exists(&tmp_path(&path)).await?;
        Ok(())
    }

    /// Erase the chat mirror snapshot for `id`, with any half-written copy.
    pub async fn remove_mirror(&self, id: &str) -> Result<()> {
        let path = self.mirror_path(id);
        remove_if_exists(&path).await?;
        remove_if_exists(&tmp_path(&path)).await
    }

    /// List every credential artifact under the root, sorted by id.
    ///
    /// Creates the root when missing. Read errors are returned: an
    /// unreadable root means the storage is broken.
    pub async fn scan(&self) -> Result<Vec<PersistedSession>> {
        tokio::fs::create_dir_all(&self.root).await?;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((id, mode)) = parse_artifact_name(&name) {
                found.push(PersistedSession {
                    id,
                    mode,
                    path: entry.path(),
                });
            }
        }

        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

/// Map a directory entry name to `(id, mode)`, skipping mirrors and temp files.
pub fn parse_artifact_name(name: &str) -> Option<(String, AuthMode)> {
    if name.ends_with(TMP_SUFFIX) || name.ends_with(MIRROR_SUFFIX) || name.ends_with("_store") {
        return None;
    }
    let (id, mode) = if let Some(rest) = name.strip_prefix(AuthMode::MultiFile.prefix()) {
        (rest, AuthMode::MultiFile)
    } else if let Some(rest) = name.strip_prefix(AuthMode::Legacy.prefix()) {
        (rest.strip_suffix(".json").unwrap_or(rest), AuthMode::Legacy)
    } else {
        return None;
    };
    if id.is_empty() {
        return None;
    }
    Some((id.to_string(), mode))
}

fn key_file_name(name: &str) -> String {
    format!("{KEY_PREFIX}{}.json", urlencoding::encode(name))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

async fn load_dir(dir: &Path) -> Result<AuthState> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AuthState::default()),
        Err(e) => return Err(e.into()),
    };

    let mut state = AuthState::default();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(TMP_SUFFIX) {
            continue;
        }
        if name == CREDS_FILE {
            state.creds = serde_json::from_slice(&tokio::fs::read(&path).await?)?;
            continue;
        }
        let Some(encoded) = name
            .strip_prefix(KEY_PREFIX)
            .and_then(|n| n.strip_suffix(".json"))
        else {
            continue;
        };
        let key = match urlencoding::decode(encoded) {
            Ok(key) => key.into_owned(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping undecodable key file");
                continue;
            },
        };
        let bytes = tokio::fs::read(&path).await?;
        state.keys.insert(key, serde_json::from_slice(&bytes)?);
    }
    Ok(state)
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rotation(creds: Value, keys: &[(&str, Option<Value>)]) -> CredentialUpdate {
        CredentialUpdate {
            creds: creds.as_object().cloned(),
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn missing_credentials_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        for mode in [AuthMode::Legacy, AuthMode::MultiFile] {
            let state = store.load("alice", mode).await.unwrap();
            assert!(!state.is_initialized());
        }
    }

    #[tokio::test]
    async fn legacy_rotation_merges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        store
            .apply("alice", AuthMode::Legacy, &rotation(json!({"me": "628"}), &[]))
            .await
            .unwrap();
        store
            .apply(
                "alice",
                AuthMode::Legacy,
                &rotation(json!({"token": "t1"}), &[("pre-key-1", Some(json!("k")))]),
            )
            .await
            .unwrap();

        assert!(dir.path().join("legacy_alice.json").is_file());
        let state = store.load("alice", AuthMode::Legacy).await.unwrap();
        assert_eq!(state.creds["me"], "628");
        assert_eq!(state.creds["token"], "t1");
        assert_eq!(state.keys["pre-key-1"], "k");
    }

    #[tokio::test]
    async fn multi_file_keys_written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        store
            .apply(
                "bob",
                AuthMode::MultiFile,
                &rotation(json!({"me": "629"}), &[
                    ("pre-key-1", Some(json!({"k": 1}))),
                    ("session:628.0", Some(json!({"s": 2}))),
                ]),
            )
            .await
            .unwrap();

        let root = dir.path().join("md_bob");
        assert!(root.join("creds.json").is_file());
        assert!(root.join("key-session%3A628.0.json").is_file());

        store
            .apply("bob", AuthMode::MultiFile, &rotation(json!(null), &[("pre-key-1", None)]))
            .await
            .unwrap();

        let state = store.load("bob", AuthMode::MultiFile).await.unwrap();
        assert_eq!(state.creds["me"], "629");
        assert!(!state.keys.contains_key("pre-key-1"));
        assert_eq!(state.keys["session:628.0"], json!({"s": 2}));
    }

    #[tokio::test]
    async fn key_names_survive_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let update = rotation(json!({"me": "1"}), &[
            ("session:628.0", Some(json!({"s": 1}))),
            ("session-628.0", Some(json!({"s": 2}))),
            ("app/state", Some(json!({"a": 3}))),
            ("creds", Some(json!({"x": 1}))),
        ]);

        store.apply("m", AuthMode::MultiFile, &update).await.unwrap();
        store.apply("l", AuthMode::Legacy, &update).await.unwrap();

        let multi = store.load("m", AuthMode::MultiFile).await.unwrap();
        let legacy = store.load("l", AuthMode::Legacy).await.unwrap();
        assert_eq!(multi.keys, legacy.keys);
        assert_eq!(multi.keys.len(), 4);
        assert_eq!(multi.keys["app/state"], json!({"a": 3}));
        assert_eq!(multi.creds, legacy.creds);
        assert_eq!(multi.creds["me"], "1");
        assert!(!multi.creds.contains_key("x"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        store
            .apply("bob", AuthMode::MultiFile, &rotation(json!({"me": 1}), &[]))
            .await
            .unwrap();
        tokio::fs::write(store.mirror_path("bob"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("bob_store.json.tmp"), b"{").await.unwrap();

        store.remove("bob", AuthMode::MultiFile).await.unwrap();
        store.remove_mirror("bob").await.unwrap();
        assert!(!dir.path().join("md_bob").exists());
        assert!(!dir.path().join("bob_store.json").exists());
        assert!(!dir.path().join("bob_store.json.tmp").exists());

        store.remove("bob", AuthMode::MultiFile).await.unwrap();
        store.remove_mirror("bob").await.unwrap();
    }

    #[tokio::test]
    async fn scan_skips_mirrors_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sessions");
        let store = CredentialStore::new(&root);

        // Creates the root on first scan.
        assert!(store.scan().await.unwrap().is_empty());

        std::fs::create_dir_all(root.join("md_A")).unwrap();
        std::fs::write(root.join("legacy_B.json"), "{}").unwrap();
        std::fs::write(root.join("A_store.json"), "{}").unwrap();
        std::fs::write(root.join("md_store.json"), "{}").unwrap();
        std::fs::write(root.join("legacy_C.json.tmp"), "{}").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();

        let found = store.scan().await.unwrap();
        let ids: Vec<_> = found.iter().map(|s| (s.id.as_str(), s.mode)).collect();
        assert_eq!(ids, vec![("A", AuthMode::MultiFile), ("B", AuthMode::Legacy)]);
    }

    #[test]
    fn artifact_names() {
        assert_eq!(
            parse_artifact_name("md_tenant_1"),
            Some(("tenant_1".into(), AuthMode::MultiFile))
        );
        assert_eq!(
            parse_artifact_name("legacy_x.json"),
            Some(("x".into(), AuthMode::Legacy))
        );
        assert_eq!(parse_artifact_name("md_"), None);
        assert_eq!(parse_artifact_name("x_store.json"), None);
    }

    #[test]
    fn session_id_validation() {
        assert!(validate_session_id("tenant-1_a.b@c").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "x.tmp", "a b", "x_store"] {
            assert!(validate_session_id(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
