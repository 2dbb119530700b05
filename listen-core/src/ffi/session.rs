//! Session implementation for FFI

use std::collections::BTreeSet;
use std::sync::{Arc, Once};

use tokio::runtime::Runtime;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::SyncConfig;
use crate::coordinator::{CoordinatorHandle, SessionCoordinator};
use crate::engine::PlaybackEngine;
use crate::sync::TrackMetadata;
use crate::transport::{SessionCode, TransportEvent};

use super::bridge::{CallbackEngine, CallbackTransport};
use super::types::*;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("listen_core=debug"));
        // Another subscriber may already be installed by the host app
        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    handle: CoordinatorHandle,
    engine: Arc<CallbackEngine>,
    /// Feeds native transport reports into the coordinator
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
}

#[uniffi::export]
impl Session {
    /// Create a session with default timings
    #[uniffi::constructor]
    pub fn new(
        display_name: String,
        playback: Box<dyn PlaybackCallback>,
        transport: Box<dyn TransportCallback>,
        callback: Box<dyn SessionCallback>,
    ) -> Self {
        let config = SyncConfig::default().with_name(display_name);
        Self::build(config, playback, transport, callback)
    }

    /// Create a session from a JSON configuration document
    #[uniffi::constructor]
    pub fn with_config(
        config_json: String,
        playback: Box<dyn PlaybackCallback>,
        transport: Box<dyn TransportCallback>,
        callback: Box<dyn SessionCallback>,
    ) -> Result<Self, CoreError> {
        let config = SyncConfig::from_json(&config_json)
            .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        Ok(Self::build(config, playback, transport, callback))
    }

    // === Intents ===

    /// Create a new session and become its host
    pub fn start_session(&self) -> Result<(), CoreError> {
        Ok(self.handle.start_session()?)
    }

    /// Join a session by code; case, spaces and dashes are ignored
    pub fn join_session(&self, code: String) -> Result<(), CoreError> {
        let parsed =
            SessionCode::parse(&code).ok_or_else(|| CoreError::InvalidSessionCode(code.clone()))?;
        info!("Joining session {}", parsed);
        Ok(self.handle.join_session(parsed.as_str())?)
    }

    pub fn stop_session(&self) -> Result<(), CoreError> {
        Ok(self.handle.stop_session()?)
    }

    pub fn resume(&self) -> Result<(), CoreError> {
        Ok(self.handle.resume()?)
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        Ok(self.handle.pause()?)
    }

    pub fn seek_to(&self, position_ms: i64) -> Result<(), CoreError> {
        Ok(self.handle.seek_to(position_ms)?)
    }

    /// The player switched to a new media item
    pub fn track_changed(
        &self,
        media_id: String,
        title: Option<String>,
        artist: Option<String>,
        thumbnail: Option<String>,
    ) -> Result<(), CoreError> {
        let metadata = TrackMetadata {
            title,
            artist,
            thumbnail,
        };
        Ok(self.handle.track_changed(media_id, metadata)?)
    }

    pub fn set_host_only_mode(&self, enabled: bool) -> Result<(), CoreError> {
        Ok(self.handle.set_host_only_mode(enabled)?)
    }

    /// Local volume; not shared with the session
    pub fn set_volume(&self, volume: f32) {
        if let Err(e) = self.engine.set_volume(volume) {
            warn!("Failed to set volume: {}", e);
        }
    }

    /// Stop the session and let the player free its resources
    pub fn release_player(&self) {
        let _ = self.handle.stop_session();
        if let Err(e) = self.engine.release() {
            warn!("Failed to release player: {}", e);
        }
    }

    // === Observation ===

    pub fn state(&self) -> SessionSnapshot {
        SessionSnapshot::from(&self.handle.state())
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.handle.clock_stats().into()
    }

    // === Native reports ===

    pub fn on_transport_message(&self, from: String, payload: Vec<u8>) {
        self.push_transport(TransportEvent::Message { from, payload });
    }

    pub fn on_session_changed(&self, session_id: Option<String>) {
        debug!("Transport session: {:?}", session_id);
        self.push_transport(TransportEvent::SessionChanged(session_id));
    }

    pub fn on_peers_changed(&self, peers: Vec<String>) {
        let peers: BTreeSet<String> = peers.into_iter().collect();
        self.push_transport(TransportEvent::PeersChanged(peers));
    }

    pub fn on_engine_state(&self, state: EngineSnapshot) {
        self.engine.report(state.into());
    }
}

impl Session {
    fn build(
        config: SyncConfig,
        playback: Box<dyn PlaybackCallback>,
        transport: Box<dyn TransportCallback>,
        callback: Box<dyn SessionCallback>,
    ) -> Self {
        init_tracing();
        info!("Initializing listen-core session for {}", config.profile.name);

        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let engine = Arc::new(CallbackEngine::new(playback));
        let transport = Arc::new(CallbackTransport::new(transport));
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let handle = {
            let _guard = runtime.enter();
            SessionCoordinator::spawn(
                config,
                engine.clone(),
                transport,
                transport_rx,
                Arc::new(SystemClock),
            )
        };
        Self::forward_to_callback(&runtime, &handle, Arc::from(callback));

        Self {
            runtime,
            handle,
            engine,
            transport_tx,
        }
    }

    /// Relay state changes and notifications to the native callback
    fn forward_to_callback(
        runtime: &Runtime,
        handle: &CoordinatorHandle,
        callback: Arc<dyn SessionCallback>,
    ) {
        let mut state_rx = handle.subscribe_state();
        let state_callback = callback.clone();
        runtime.spawn(async move {
            while state_rx.changed().await.is_ok() {
                let snapshot = SessionSnapshot::from(&*state_rx.borrow_and_update());
                state_callback.on_state_changed(snapshot);
            }
        });

        let mut notifications = handle.notifications();
        runtime.spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => callback.on_notification(notification.into()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Dropped {} notifications", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn push_transport(&self, event: TransportEvent) {
        if self.transport_tx.send(event).is_err() {
            warn!("Session has shut down, dropping transport event");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.handle.shutdown();
        debug!("Session dropped");
        // Give the coordinator a moment to leave the session cleanly
        self.runtime
            .block_on(tokio::time::sleep(std::time::Duration::from_millis(50)));
    }
}

/// Format a session code for display (`XXXX-XXXX`), or `None` if it is not valid
#[uniffi::export]
pub fn format_session_code(code: String) -> Option<String> {
    SessionCode::parse(&code).map(|c| c.to_string())
}
