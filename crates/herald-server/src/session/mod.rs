//! Session management: per-connection state, owned timers, session table.

pub mod handle;
pub mod manager;
pub mod timers;

pub use handle::{PeerInfo, Session};
pub use manager::SessionManager;
