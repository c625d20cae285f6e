//! Parley backend library.
//!
//! One stateful actor process: SQLite-backed conversation storage, a
//! WebSocket hub multiplexing cancellable generation streams, and a
//! speech path that re-chunks synthesized audio for incremental playback.

pub mod api;
pub mod audio;
pub mod config;
pub mod genai;
pub mod session;
pub mod store;
pub mod ws;
