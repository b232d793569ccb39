//! In-process STUN/TURN relay bootstrap
//!
//! Lets a session double as its own connectivity infrastructure on
//! closed networks: a binding responder for reflexive-address discovery
//! and a long-term-credential TURN relay.

pub mod auth;
pub mod stun;
pub mod turn;

pub use auth::{CredentialStore, SECRET_LEN};
pub use stun::{run_stun_server, StunServer};
pub use turn::{run_turn_server, TurnServer};

/// SOFTWARE attribute advertised by the relay servers
pub const SOFTWARE: &str = "conductor-relay";
