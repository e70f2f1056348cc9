// StepSync Core: client-side sync engine for collaborative step-sequencer sessions
//
// The application owns session state and applies actions through its own
// reducer. This crate keeps that state converged with the server: it ships
// local edits, applies remote ones, tracks what was confirmed, and detects
// and repairs divergence.

pub mod action;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod runtime;
pub mod sync;

pub use action::{Action, Dispatcher, MutationKind, PresenceEvent, StateSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use connection::{
    CloseInfo, ConnectionManager, ConnectionState, ConnectionStatus, Scheduler, SubscriptionId,
    Timer, Transport, TransportError,
};
pub use error::{Result, SyncError};
pub use model::{CursorPosition, ParameterLock, PlaybackMode, PlayerInfo, SessionState, Track};
pub use protocol::{ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};
pub use runtime::{SyncHandle, SyncRuntime};
pub use sync::classify::{classify, SyncClass};
pub use sync::{hash_state, StateDigest};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
