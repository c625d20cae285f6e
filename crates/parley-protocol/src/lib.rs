//! Wire protocol for the Parley chat WebSocket.
//!
//! One JSON object per text frame, discriminated by a dotted `type` tag.
//! `ClientFrame` is what the browser sends, `ServerFrame` is what the
//! actor broadcasts back. The split mirrors the direction of travel, not
//! ownership: `conversation.title.update` exists on both sides.

mod commands;
mod messages;

pub use commands::ClientFrame;
pub use messages::ServerFrame;
