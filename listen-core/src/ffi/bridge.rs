//! Adapters from native callbacks to the coordinator's collaborator traits

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tracing::debug;

use super::types::{PlaybackCallback, TransportCallback};
use crate::engine::{EngineError, EngineLifecycle, EngineState, PlaybackEngine};
use crate::transport::{Transport, TransportError};

/// Native player behind the [`PlaybackEngine`] contract.
///
/// Commands update the observed state optimistically; the native side
/// corrects it with its own reports.
pub(crate) struct CallbackEngine {
    callback: Box<dyn PlaybackCallback>,
    state_tx: watch::Sender<EngineState>,
}

impl CallbackEngine {
    pub(crate) fn new(callback: Box<dyn PlaybackCallback>) -> Self {
        let (state_tx, _) = watch::channel(EngineState::default());
        Self { callback, state_tx }
    }

    /// State reported by the native player
    pub(crate) fn report(&self, state: EngineState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

impl PlaybackEngine for CallbackEngine {
    fn prepare(&self) -> Result<(), EngineError> {
        self.callback.prepare();
        Ok(())
    }

    fn load_track(
        &self,
        media_id: &str,
        seek_position_ms: i64,
        auto_play: bool,
    ) -> Result<(), EngineError> {
        let state = self.state_tx.borrow().lifecycle;
        if state == EngineLifecycle::Released {
            return Err(EngineError::Released);
        }
        if !self
            .callback
            .load_track(media_id.to_string(), seek_position_ms, auto_play)
        {
            return Err(EngineError::Rejected {
                media_id: media_id.to_string(),
                reason: "player refused the item".to_string(),
            });
        }
        self.state_tx.send_modify(|s| {
            s.media_id = Some(media_id.to_string());
            s.position_ms = seek_position_ms;
            s.is_playing = auto_play;
            s.lifecycle = EngineLifecycle::Buffering;
        });
        Ok(())
    }

    fn play(&self) -> Result<(), EngineError> {
        self.callback.play();
        self.state_tx.send_modify(|s| s.is_playing = true);
        Ok(())
    }

    fn pause(&self) -> Result<(), EngineError> {
        self.callback.pause();
        self.state_tx.send_modify(|s| s.is_playing = false);
        Ok(())
    }

    fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        self.callback.seek_to(position_ms);
        self.state_tx.send_modify(|s| s.position_ms = position_ms);
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.callback.set_volume(volume.clamp(0.0, 1.0));
        Ok(())
    }

    fn set_playback_speed(&self, speed: f64) -> Result<(), EngineError> {
        if speed <= 0.0 {
            return Err(EngineError::Other(format!("invalid speed {}", speed)));
        }
        self.callback.set_playback_speed(speed);
        self.state_tx.send_modify(|s| s.speed = speed);
        Ok(())
    }

    fn release(&self) -> Result<(), EngineError> {
        debug!("Releasing native player");
        self.callback.release();
        self.state_tx
            .send_modify(|s| s.lifecycle = EngineLifecycle::Released);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }
}

/// Native transport behind the [`Transport`] contract. Session and peer
/// changes come back through the session's ingestion methods.
pub(crate) struct CallbackTransport {
    callback: Box<dyn TransportCallback>,
}

impl CallbackTransport {
    pub(crate) fn new(callback: Box<dyn TransportCallback>) -> Self {
        Self { callback }
    }
}

impl Transport for CallbackTransport {
    fn connect(&self, code: Option<String>) -> BoxFuture<'_, Result<(), TransportError>> {
        self.callback.connect(code);
        future::ready(Ok(())).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.callback.disconnect();
        future::ready(Ok(())).boxed()
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.callback.send(payload);
        Ok(())
    }
}
