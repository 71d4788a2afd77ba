//! Configuration loading for the gateway.
//!
//! Config files (`wagate.toml` / `.yaml` / `.json`) support `${VAR}`
//! placeholders; deployment env vars (`MAX_RETRIES`, `WEBHOOK_URL`, ...)
//! are applied last.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{
        BridgeConfig, NativeConfig, ServerConfig, SessionsConfig, WagateConfig, WebhookConfig,
    },
};
