//! Listen Together - Core Library
//!
//! Keeps one host's playback mirrored on every participant of a session:
//! a shared playback state anchored to the host's clock, a clock-offset
//! estimator, and a coordinator that turns local intents and remote events
//! into player commands. The player and the network link are supplied by
//! the embedding app.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod ffi;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use clock::{Clock, ClockSync, SystemClock};
pub use config::SyncConfig;
pub use coordinator::{CoordinatorHandle, Notification, SessionCoordinator};
pub use engine::{EngineState, PlaybackEngine};
pub use sync::{SessionState, SyncEvent};
pub use transport::{SessionCode, Transport, TransportEvent};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
