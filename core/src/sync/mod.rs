//! Client-side synchronization components
//!
//! Each component here is a plain owned value with no I/O; the connection
//! manager wires them together.

pub mod classify;
pub mod clock;
pub mod confirmed;
pub mod hash;
pub mod health;
pub mod mutations;
pub mod outbox;
pub mod recovery;
pub mod subject;

pub use classify::{classify, SyncClass};
pub use clock::{ClockEstimate, ClockSync};
pub use confirmed::{ConfirmedState, Regression};
pub use hash::{canonicalize, hash, hash_state, CanonicalState, StateDigest};
pub use health::{RecoveryAction, RecoveryNeed, SequenceCheck, SyncHealth, SyncHealthMetrics};
pub use mutations::{Mutation, MutationState, MutationTracker, SnapshotCheck, TrackerStats};
pub use outbox::{EnqueueOutcome, MessageQueue, Priority, QueuedMessage};
pub use recovery::RecoveryManager;
pub use subject::{IntendedValue, Subject, TrackField};
