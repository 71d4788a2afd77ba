use {
    anyhow::{Context, Result},
    clap::Subcommand,
    wagate_config::WagateConfig,
    wagate_whatsapp::{AuthMode, CredentialStore, PersistedSession},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List sessions with persisted credentials (reads the sessions
    /// directory; does not need a running gateway).
    List,
}

pub async fn handle_sessions(action: SessionAction, config: &WagateConfig) -> Result<()> {
    match action {
        SessionAction::List => list(config).await,
    }
}

async fn list(config: &WagateConfig) -> Result<()> {
    let store = CredentialStore::new(config.sessions.resolved_dir());
    let sessions = store
        .scan()
        .await
        .with_context(|| format!("failed to read {}", store.root().display()))?;

    if sessions.is_empty() {
        println!("No persisted sessions in {}", store.root().display());
        return Ok(());
    }
    print!("{}", render(&sessions));
    Ok(())
}

fn render(sessions: &[PersistedSession]) -> String {
    let width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(0).max(2);
    let mut out = format!("{:<width$}  MODE\n", "ID");
    for session in sessions {
        let mode = match session.mode {
            AuthMode::Legacy => "legacy",
            AuthMode::MultiFile => "multi-file",
        };
        out.push_str(&format!("{:<width$}  {mode}\n", session.id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_credentials_but_not_mirrors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("md_alpha")).unwrap();
        std::fs::write(dir.path().join("legacy_beta.json"), "{}").unwrap();
        std::fs::write(dir.path().join("alpha_store.json"), "{}").unwrap();

        let sessions = CredentialStore::new(dir.path()).scan().await.unwrap();
        let table = render(&sessions);
        assert_eq!(table, "ID     MODE\nalpha  multi-file\nbeta   legacy\n");
    }
}
