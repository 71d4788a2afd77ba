use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::WagateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Load config from the given path (any supported format), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<WagateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `explicit` (from `--config`), which must exist
/// 2. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 3. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults plus environment overrides when nothing is found.
pub fn discover_and_load(explicit: Option<&Path>) -> anyhow::Result<WagateConfig> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return load_config(path);
    }

    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return Ok(cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }

    let mut config = WagateConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns `~/.config/wagate/` on all platforms.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".config").join("wagate"))
}

/// Returns the data directory: `~/.wagate/` on all platforms.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".wagate"))
        .unwrap_or_else(|| PathBuf::from(".wagate"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Apply the deployment environment variables on top of file config.
///
/// These are the knobs operators usually set in `.env`, so they win over
/// whatever the config file says.
pub fn apply_env_overrides(config: &mut WagateConfig, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = var("HOST") {
        config.server.bind = v;
    }
    if let Some(v) = var("PORT") {
        match v.trim().parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %v, "ignoring invalid PORT"),
        }
    }
    if let Some(v) = var("MAX_RETRIES") {
        match v.trim().parse() {
            Ok(n) => config.sessions.max_retries = n,
            Err(_) => warn!(value = %v, "ignoring invalid MAX_RETRIES"),
        }
    }
    if let Some(v) = var("RECONNECT_INTERVAL") {
        match v.trim().parse() {
            Ok(ms) => config.sessions.reconnect_interval_ms = ms,
            Err(_) => warn!(value = %v, "ignoring invalid RECONNECT_INTERVAL"),
        }
    }
    if let Some(v) = lookup("WEBHOOK_ENABLED") {
        config.webhook.enabled = parse_flag(&v);
    }
    if let Some(v) = var("WEBHOOK_URL") {
        config.webhook.url = Some(v);
    }
    if let Some(v) = var("WAGATE_SESSIONS_DIR") {
        config.sessions.dir = Some(PathBuf::from(v));
    }
    if let Some(v) = var("WAGATE_BRIDGE_URL") {
        config.bridge.url = v;
    }
    if let Some(v) = lookup("WAGATE_NATIVE") {
        config.native.enabled = parse_flag(&v);
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn env_overrides_reconnect_and_webhook() {
        let mut cfg = WagateConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("MAX_RETRIES", "3"),
                ("RECONNECT_INTERVAL", "250"),
                ("WEBHOOK_ENABLED", "true"),
                ("WEBHOOK_URL", "http://sink.local/hook"),
                ("PORT", "9001"),
            ]),
        );
        assert_eq!(cfg.sessions.max_retries, 3);
        assert_eq!(cfg.sessions.reconnect_interval_ms, 250);
        assert!(cfg.webhook.enabled);
        assert_eq!(cfg.webhook.target(), Some("http://sink.local/hook"));
        assert_eq!(cfg.server.port, 9001);
    }

    #[test]
    fn invalid_numbers_are_ignored() {
        let mut cfg = WagateConfig::default();
        apply_env_overrides(&mut cfg, env(&[("MAX_RETRIES", "many"), ("PORT", "-1")]));
        assert_eq!(cfg.sessions.max_retries, 5);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn webhook_flag_parsing() {
        for (raw, expected) in [("1", true), ("yes", true), ("false", false), ("", false)] {
            let mut cfg = WagateConfig::default();
            apply_env_overrides(&mut cfg, env(&[("WEBHOOK_ENABLED", raw)]));
            assert_eq!(cfg.webhook.enabled, expected, "WEBHOOK_ENABLED={raw:?}");
        }
    }

    #[test]
    fn native_backend_toggle() {
        let mut cfg = WagateConfig::default();
        apply_env_overrides(&mut cfg, env(&[("WAGATE_NATIVE", "on")]));
        assert!(cfg.native.enabled);
        apply_env_overrides(&mut cfg, env(&[("WAGATE_NATIVE", "0")]));
        assert!(!cfg.native.enabled);
    }

    fn parse_file(path: &Path, contents: &str) -> WagateConfig {
        std::fs::write(path, contents).unwrap();
        parse_config(&std::fs::read_to_string(path).unwrap(), path).unwrap()
    }

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = parse_file(&dir.path().join("wagate.toml"), "[server]\nport = 8100\n");
        assert_eq!(cfg.server.port, 8100);

        let cfg = parse_file(&dir.path().join("wagate.yaml"), "server:\n  port: 8200\n");
        assert_eq!(cfg.server.port, 8200);

        let cfg = parse_file(&dir.path().join("wagate.json"), r#"{"server":{"port":8300}}"#);
        assert_eq!(cfg.server.port, 8300);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let path = Path::new("wagate.ini");
        assert!(parse_config("", path).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(discover_and_load(Some(&missing)).is_err());
    }
}
