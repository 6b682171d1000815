//! Request handlers shared by the HTTP routes and the WebSocket channel.

mod sync;
mod websocket;

pub use sync::*;
pub use websocket::*;
