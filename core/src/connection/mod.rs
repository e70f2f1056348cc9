//! Session connection: state machine, collaborator seams and status
//!
//! [`ConnectionManager`] is sans-IO. It drives a [`Transport`] and a
//! [`Scheduler`] and is told about their events through its `handle_*`
//! entry points; the tokio runtime in [`crate::runtime`] provides the real
//! implementations.

pub mod backoff;
pub mod manager;

pub use backoff::backoff_duration;
pub use manager::ConnectionManager;

use crate::sync::{SyncHealthMetrics, TrackerStats};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    Disconnected,
    /// Opening the channel, or waiting to retry
    Connecting,
    /// Channel open
    Connected,
    /// Gave up reconnecting; editing continues single-user
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Snapshot of the connection handed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    pub player_id: Option<String>,
    pub queued_messages: usize,
    pub rtt_ms: f64,
    pub clock_offset_ms: i64,
    pub mutations: TrackerStats,
    pub health: SyncHealthMetrics,
}

/// Timers the manager schedules; at most one of each is live at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    Reconnect,
    ClockSync,
    HashCheck,
    MutationPrune,
}

impl Timer {
    pub const ALL: [Timer; 4] = [
        Timer::Reconnect,
        Timer::ClockSync,
        Timer::HashCheck,
        Timer::MutationPrune,
    ];
}

/// Why a channel closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel not open")]
    NotOpen,
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// A duplex text channel to the session server.
///
/// `open` starts connecting in the background; the owner reports the
/// outcome back through `handle_open` / `handle_frame` / `handle_close`
/// tagged with the same `generation`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    fn open(&mut self, session_id: &str, generation: u64);

    fn send(&mut self, frame: String) -> Result<(), TransportError>;

    fn close(&mut self);
}

/// Cancelable timers. Firings are reported back through `handle_timer`.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send {
    fn schedule_once(&mut self, timer: Timer, generation: u64, delay: Duration);

    fn schedule_repeating(&mut self, timer: Timer, generation: u64, period: Duration);

    fn cancel(&mut self, timer: Timer);
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type StatusListener = Box<dyn Fn(&ConnectionStatus) + Send>;
