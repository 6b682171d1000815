//! WebSocket support for real-time sync.
//!
//! Clients connect via WebSocket to trigger passes, resolve conflicts and
//! receive every status board change as it happens.

mod manager;
mod protocol;

pub use manager::{forward_status, ConnectionManager, MessageSender};
pub use protocol::*;
