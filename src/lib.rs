pub mod chat;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod lobby;
pub mod logger;
pub mod peer;
pub mod relay;
pub mod router;
pub mod session;
pub mod signaling;
pub mod supervisor;
pub mod utils;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{AnswerPolicy, LobbyConfig};
pub use coordinator::{SessionCoordinator, SessionOptions};
pub use error::{Error, Result};
pub use events::LobbyEvent;
pub use lobby::{Lobby, LobbyDeps, LobbyHandle};
pub use relay::{MemoryRelay, RelayState, WebSocketRelay};
pub use session::CallState;
pub use signaling::Peer;
