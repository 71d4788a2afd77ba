//! WhatsApp session lifecycle for the gateway.
//!
//! [`SessionManager`] creates, tracks, reconnects and tears down one
//! protocol connection per tenant. The wire protocol lives behind
//! [`WaConnector`]/[`WaClient`]. [`BridgeConnector`] talks to a protocol
//! sidecar over WebSocket; with the `native` feature, multi-file sessions
//! can be served in-process instead, dispatched by [`ModeRouter`].

pub mod bridge;
pub mod client;
pub mod credentials;
pub mod error;
pub mod jid;
pub mod machine;
pub mod manager;
pub mod native;
pub mod ops;
pub mod pending;
pub mod qr;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod webhook;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use {
    bridge::BridgeConnector,
    client::{
        AuthMode, Chat, ConnectRequest, Connection, ConnectionUpdate, DisconnectReason,
        GroupMetadata, GroupSetting, ParticipantAction, RegistrationStatus, WaClient, WaConnector,
        WaEvent,
    },
    credentials::{CredentialStore, PersistedSession, validate_session_id},
    error::{Error, Result},
    machine::Phase,
    manager::{ManagerOptions, SessionManager},
    pending::{OpenOutcome, QrWaiter},
    router::ModeRouter,
    session::{Session, SessionInfo},
    webhook::WebhookDispatcher,
};

#[cfg(feature = "native")]
pub use native::NativeConnector;
