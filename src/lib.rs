//! Two-peer video meeting client: signaling, offer/answer negotiation,
//! track switching and chat.

pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::{Error, MediaError, Result};
pub use session::{EndReason, SessionCoordinator, SessionDeps, SessionHandle, SessionNotice, SessionSnapshot};
