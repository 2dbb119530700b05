//! Test doubles for the coordinator's collaborators

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::engine::{EngineError, EngineLifecycle, EngineState, PlaybackEngine};
use crate::sync::SyncEvent;
use crate::transport::{Transport, TransportError};

/// A command the coordinator issued to the player
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Prepare,
    Load {
        media_id: String,
        position_ms: i64,
        auto_play: bool,
    },
    Play,
    Pause,
    Seek(i64),
    Speed(f64),
    Volume(f32),
    Release,
}

type Hook = Box<dyn Fn(&str, i64) + Send + Sync>;

/// Player that records commands and updates its state synchronously
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    state_tx: watch::Sender<EngineState>,
    reject_loads: AtomicBool,
    on_seek: Mutex<Option<Hook>>,
    on_load: Mutex<Option<Hook>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::with_state(EngineState::default())
    }

    pub fn with_track(media_id: &str, position_ms: i64, is_playing: bool) -> Self {
        Self::with_state(EngineState {
            media_id: Some(media_id.to_string()),
            is_playing,
            position_ms,
            lifecycle: EngineLifecycle::Ready,
            ..EngineState::default()
        })
    }

    fn with_state(state: EngineState) -> Self {
        let (state_tx, _) = watch::channel(state);
        Self {
            calls: Mutex::new(Vec::new()),
            state_tx,
            reject_loads: AtomicBool::new(false),
            on_seek: Mutex::new(None),
            on_load: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn loads(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::Load { .. }))
            .collect()
    }

    pub fn reject_loads(&self, reject: bool) {
        self.reject_loads.store(reject, Ordering::SeqCst);
    }

    /// Run `hook(media_id, position)` from inside `seek_to`, like a player
    /// that reports seeks synchronously
    pub fn on_seek(&self, hook: impl Fn(&str, i64) + Send + Sync + 'static) {
        *self.on_seek.lock() = Some(Box::new(hook));
    }

    /// Run `hook(media_id, position)` from inside `load_track`
    pub fn on_load(&self, hook: impl Fn(&str, i64) + Send + Sync + 'static) {
        *self.on_load.lock() = Some(Box::new(hook));
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

impl PlaybackEngine for RecordingEngine {
    fn prepare(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Prepare);
        Ok(())
    }

    fn load_track(
        &self,
        media_id: &str,
        seek_position_ms: i64,
        auto_play: bool,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::Load {
            media_id: media_id.to_string(),
            position_ms: seek_position_ms,
            auto_play,
        });
        if self.reject_loads.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected {
                media_id: media_id.to_string(),
                reason: "unavailable".to_string(),
            });
        }
        self.state_tx.send_modify(|s| {
            s.media_id = Some(media_id.to_string());
            s.position_ms = seek_position_ms;
            s.is_playing = auto_play;
            s.lifecycle = EngineLifecycle::Ready;
        });
        if let Some(hook) = self.on_load.lock().as_ref() {
            hook(media_id, seek_position_ms);
        }
        Ok(())
    }

    fn play(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Play);
        self.state_tx.send_modify(|s| s.is_playing = true);
        Ok(())
    }

    fn pause(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Pause);
        self.state_tx.send_modify(|s| s.is_playing = false);
        Ok(())
    }

    fn seek_to(&self, position_ms: i64) -> Result<(), EngineError> {
        self.record(EngineCall::Seek(position_ms));
        self.state_tx.send_modify(|s| s.position_ms = position_ms);
        let media_id = self.state_tx.borrow().media_id.clone().unwrap_or_default();
        if let Some(hook) = self.on_seek.lock().as_ref() {
            hook(&media_id, position_ms);
        }
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.record(EngineCall::Volume(volume));
        Ok(())
    }

    fn set_playback_speed(&self, speed: f64) -> Result<(), EngineError> {
        self.record(EngineCall::Speed(speed));
        self.state_tx.send_modify(|s| s.speed = speed);
        Ok(())
    }

    fn release(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Release);
        self.state_tx.send_modify(|s| s.lifecycle = EngineLifecycle::Released);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }
}

/// Transport that records what was sent; tests inject events themselves
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    connects: Mutex<Vec<Option<String>>>,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Decode and clear everything sent so far
    pub fn take_sent(&self) -> Vec<SyncEvent> {
        self.sent
            .lock()
            .drain(..)
            .map(|payload| SyncEvent::decode(&payload).expect("coordinator sent an undecodable event"))
            .collect()
    }

    /// Kinds of everything sent so far, without clearing
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .iter()
            .filter_map(|payload| SyncEvent::decode(payload).ok())
            .map(|event| event.kind())
            .collect()
    }

    pub fn connects(&self) -> Vec<Option<String>> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, code: Option<String>) -> BoxFuture<'_, Result<(), TransportError>> {
        self.connects.lock().push(code);
        let result = if self.fail_connect.load(Ordering::SeqCst) {
            Err(TransportError::Connection("unreachable".to_string()))
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        future::ready(Ok(())).boxed()
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().push(payload);
        Ok(())
    }
}
