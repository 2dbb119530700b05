//! Session Coordinator
//!
//! The single authority over a device's [`SessionState`]. Local intents,
//! transport events, timers and scheduled tasks are funneled into one task
//! that owns the state, drives the [`PlaybackEngine`](crate::engine::PlaybackEngine)
//! and publishes every transition to observers.

mod actor;
mod handlers;
mod intents;
mod reconcile;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::clock::ClockStats;
use crate::sync::{SessionState, TrackMetadata};

pub use actor::SessionCoordinator;

/// Errors returned by a [`CoordinatorHandle`]
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Session coordinator has stopped")]
    Stopped,
}

/// A playback change made by someone else
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAction {
    Play { media_id: String, position_ms: i64 },
    Pause { position_ms: i64 },
    Seek { position_ms: i64 },
}

/// Things worth telling the user about
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PeerJoined {
        peer_id: String,
        name: Option<String>,
    },
    PeerLeft {
        peer_id: String,
        name: Option<String>,
    },
    /// "Who did what"
    RemoteAction {
        peer_id: String,
        requester: Option<String>,
        action: RemoteAction,
    },
    SessionEnded {
        reason: String,
    },
    Error {
        message: String,
    },
}

/// Requests sent to the coordinator task
#[derive(Debug)]
pub(crate) enum Command {
    StartSession,
    JoinSession { code: String },
    StopSession,
    Resume,
    Pause,
    SeekTo { position_ms: i64 },
    TrackChanged { media_id: String, metadata: TrackMetadata },
    SetHostOnlyMode(bool),
    Shutdown,
}

/// Handle to communicate with a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    stats_rx: watch::Receiver<ClockStats>,
    notify_tx: broadcast::Sender<Notification>,
    /// Raised while a snapshot is being applied to the player
    applying: Arc<AtomicBool>,
    /// Raised while a local seek is being applied to the player
    seeking: Arc<AtomicBool>,
}

impl CoordinatorHandle {
    fn send(&self, command: Command) -> Result<(), CoordinatorError> {
        self.command_tx
            .send(command)
            .map_err(|_| CoordinatorError::Stopped)
    }

    /// Create a session and become its host
    pub fn start_session(&self) -> Result<(), CoordinatorError> {
        self.send(Command::StartSession)
    }

    pub fn join_session(&self, code: impl Into<String>) -> Result<(), CoordinatorError> {
        self.send(Command::JoinSession { code: code.into() })
    }

    pub fn stop_session(&self) -> Result<(), CoordinatorError> {
        self.send(Command::StopSession)
    }

    /// Ignored while session state is being applied to the player
    pub fn resume(&self) -> Result<(), CoordinatorError> {
        if self.is_applying() {
            debug!("Ignoring resume while applying session state");
            return Ok(());
        }
        self.send(Command::Resume)
    }

    /// Ignored while session state is being applied to the player
    pub fn pause(&self) -> Result<(), CoordinatorError> {
        if self.is_applying() {
            debug!("Ignoring pause while applying session state");
            return Ok(());
        }
        self.send(Command::Pause)
    }

    /// Seeks the player reports while it is carrying out one of ours, or
    /// while session state is being applied, are ignored
    pub fn seek_to(&self, position_ms: i64) -> Result<(), CoordinatorError> {
        if self.seeking.load(Ordering::SeqCst) || self.is_applying() {
            debug!("Ignoring nested seek to {}ms", position_ms);
            return Ok(());
        }
        self.send(Command::SeekTo { position_ms })
    }

    /// The player switched media. Switches caused by applying remote state
    /// are not broadcast.
    pub fn track_changed(
        &self,
        media_id: impl Into<String>,
        metadata: TrackMetadata,
    ) -> Result<(), CoordinatorError> {
        let media_id = media_id.into();
        if self.is_applying() {
            debug!("Ignoring track change to {} while applying session state", media_id);
            return Ok(());
        }
        self.send(Command::TrackChanged { media_id, metadata })
    }

    pub fn set_host_only_mode(&self, enabled: bool) -> Result<(), CoordinatorError> {
        self.send(Command::SetHostOnlyMode(enabled))
    }

    /// Leave any session and stop the coordinator task
    pub fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.send(Command::Shutdown)
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    pub fn clock_stats(&self) -> ClockStats {
        *self.stats_rx.borrow()
    }

    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::SeqCst)
    }
}
