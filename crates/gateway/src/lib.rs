//! Gateway: the HTTP surface over the WhatsApp session manager.
//!
//! Lifecycle:
//! 1. Load config, build the session manager
//! 2. Restore persisted sessions (fatal if the sessions root is unreadable)
//! 3. Serve the REST routes until Ctrl-C / SIGTERM
//! 4. Flush chat mirrors and close connections

pub mod extract;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;
