//! Per-session lifecycle state machine.
//!
//! [`step`] is pure: it maps the current phase and one connection event to
//! the next phase plus a list of [`Effect`]s. The manager's driver task
//! executes the effects in order.

use std::time::Duration;

use serde::Serialize;

use crate::{
    client::{
        Chat, ConnectionState, ConnectionUpdate, CredentialUpdate, DisconnectReason, WaEvent,
    },
    reconnect::{GiveUpCause, ReconnectPolicy, RetryDecision},
};

pub const UNABLE_TO_CREATE_SESSION: &str = "Unable to create session.";
pub const UNABLE_TO_CREATE_QR: &str = "Unable to create QR code.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    Open,
    Disconnected,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownCause {
    LoggedOut,
    RetriesExhausted,
    /// A QR challenge arrived with nobody left to show it to.
    UnattendedQr,
    /// The QR challenge could not be rendered.
    QrFailed,
}

impl From<GiveUpCause> for TeardownCause {
    fn from(cause: GiveUpCause) -> Self {
        match cause {
            GiveUpCause::LoggedOut => Self::LoggedOut,
            GiveUpCause::RetriesExhausted => Self::RetriesExhausted,
        }
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Persist a rotation; must complete before the next event is handled.
    PersistCredentials(CredentialUpdate),
    MirrorChats(Vec<Chat>),
    MirrorMessages(serde_json::Value),
    ForwardWebhook {
        event_type: &'static str,
        payload: serde_json::Value,
    },
    ClearRetries,
    BumpRetries,
    ScheduleReconnect(Duration),
    RespondConnected,
    /// Render the raw challenge and hand it to the waiter. On render failure
    /// the driver answers the waiter with a failure and tears down.
    DeliverQr(String),
    RespondFailed(&'static str),
    Logout,
    Teardown(TeardownCause),
}

/// Facts about the session outside the phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepContext {
    /// A caller is still waiting for the outcome of this open.
    pub waiter_pending: bool,
    /// Retries already granted since the last successful open.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub phase: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(phase: Phase) -> Self {
        Self {
            phase,
            effects: Vec::new(),
        }
    }

    /// Whether the session ends with this transition.
    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Whether the driver should stop consuming this connection's events.
    pub fn ends_connection(&self) -> bool {
        self.is_terminal()
            || self
                .effects
                .iter()
                .any(|e| matches!(e, Effect::ScheduleReconnect(_)))
    }
}

/// Advance one session by one event.
pub fn step(
    phase: Phase,
    event: &WaEvent,
    ctx: StepContext,
    policy: &ReconnectPolicy,
) -> Transition {
    if phase == Phase::Closed {
        return Transition::stay(phase);
    }

    match event {
        WaEvent::CredsUpdate(update) => Transition {
            phase,
            effects: vec![Effect::PersistCredentials(update.clone())],
        },
        WaEvent::ChatsSet(chats) => Transition {
            phase,
            effects: vec![Effect::MirrorChats(chats.clone())],
        },
        WaEvent::MessagesUpsert(payload) => Transition {
            phase,
            effects: vec![
                Effect::MirrorMessages(payload.clone()),
                Effect::ForwardWebhook {
                    event_type: event.kind(),
                    payload: payload.clone(),
                },
            ],
        },
        WaEvent::ConnectionUpdate(update) => {
            let mut phase = phase;
            let mut effects = Vec::new();

            match update.connection {
                Some(ConnectionState::Open) => {
                    phase = Phase::Open;
                    effects.push(Effect::ClearRetries);
                    if ctx.waiter_pending {
                        effects.push(Effect::RespondConnected);
                    }
                },
                Some(ConnectionState::Close) => {
                    match policy.decide(update.reason(), ctx.attempts) {
                        RetryDecision::GiveUp(cause) => {
                            if ctx.waiter_pending {
                                effects.push(Effect::RespondFailed(UNABLE_TO_CREATE_SESSION));
                            }
                            effects.push(Effect::Teardown(cause.into()));
                            return Transition {
                                phase: Phase::Closed,
                                effects,
                            };
                        },
                        RetryDecision::Retry { delay } => {
                            phase = Phase::Disconnected;
                            effects.push(Effect::BumpRetries);
                            effects.push(Effect::ScheduleReconnect(delay));
                        },
                    }
                },
                Some(ConnectionState::Connecting) | None => {},
            }

            if let Some(qr) = update.qr.as_deref().filter(|q| !q.is_empty()) {
                if ctx.waiter_pending {
                    effects.push(Effect::DeliverQr(qr.to_string()));
                } else {
                    effects.push(Effect::Logout);
                    effects.push(Effect::Teardown(TeardownCause::UnattendedQr));
                    phase = Phase::Closed;
                }
            }

            Transition { phase, effects }
        },
    }
}

/// The close event synthesized when connecting fails or the event queue
/// ends without a close.
pub fn connection_lost() -> WaEvent {
    WaEvent::ConnectionUpdate(ConnectionUpdate::closed(DisconnectReason::ConnectionLost))
}
