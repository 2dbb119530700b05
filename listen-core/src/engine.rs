//! Playback engine contract
//!
//! The media player is an external collaborator. The coordinator drives it
//! through [`PlaybackEngine`] and watches its state through a `watch` channel.

use thiserror::Error;
use tokio::sync::watch;

/// Lifecycle of the underlying player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineLifecycle {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
    Released,
}

/// What the player reports about itself
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub media_id: Option<String>,
    pub is_playing: bool,
    pub position_ms: i64,
    pub buffered_ms: i64,
    pub speed: f64,
    pub lifecycle: EngineLifecycle,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            media_id: None,
            is_playing: false,
            position_ms: 0,
            buffered_ms: 0,
            speed: 1.0,
            lifecycle: EngineLifecycle::Idle,
        }
    }
}

/// Errors a player may report for a command
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Player rejected media {media_id}: {reason}")]
    Rejected { media_id: String, reason: String },

    #[error("Player has been released")]
    Released,

    #[error("Player error: {0}")]
    Other(String),
}

/// Commands are immediate and may be issued from any thread; the
/// implementation marshals them onto its own context.
pub trait PlaybackEngine: Send + Sync {
    fn prepare(&self) -> Result<(), EngineError>;

    fn load_track(
        &self,
        media_id: &str,
        seek_position_ms: i64,
        auto_play: bool,
    ) -> Result<(), EngineError>;

    fn play(&self) -> Result<(), EngineError>;

    fn pause(&self) -> Result<(), EngineError>;

    fn seek_to(&self, position_ms: i64) -> Result<(), EngineError>;

    fn set_volume(&self, volume: f32) -> Result<(), EngineError>;

    fn set_playback_speed(&self, speed: f64) -> Result<(), EngineError>;

    fn release(&self) -> Result<(), EngineError>;

    /// Observe state changes
    fn subscribe(&self) -> watch::Receiver<EngineState>;

    /// Current state
    fn state(&self) -> EngineState {
        self.subscribe().borrow().clone()
    }
}
