//! Coordinator task
//!
//! Owns the session state and serializes every input: commands from
//! handles, transport events, the heartbeat, and completions of scheduled
//! work (connects, lead-time waits, grace delays).

use std::ops::ControlFlow;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::intents::Debouncer;
use super::{Command, CoordinatorHandle, Notification};
use crate::clock::{probe_id, Clock, ClockStats, ClockSync};
use crate::config::SyncConfig;
use crate::engine::{EngineState, PlaybackEngine};
use crate::sync::{PlaybackStatus, SessionState, SyncEvent, SyncStatus, TrackMetadata};
use crate::transport::{Transport, TransportError, TransportEvent, TransportEvents};

/// Capacity of the notification channel; slow subscribers lose the oldest
const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Idle,
    /// Waiting for the transport to report a session id
    Handshaking,
    Active,
}

/// Completions of work the coordinator scheduled for itself
#[derive(Debug)]
pub(super) enum Internal {
    ConnectFailed(TransportError),
    ScheduledStart { generation: u64 },
    GraceElapsed { peer_id: String },
}

/// The coordinator task's state. Create one with [`SessionCoordinator::spawn`].
pub struct SessionCoordinator {
    pub(super) config: SyncConfig,
    pub(super) state: SessionState,
    pub(super) phase: Phase,
    pub(super) engine: Arc<dyn PlaybackEngine>,
    pub(super) engine_rx: watch::Receiver<EngineState>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) clock: ClockSync,
    pub(super) debouncer: Debouncer,
    pub(super) applying: Arc<AtomicBool>,
    pub(super) seeking: Arc<AtomicBool>,
    /// Media id we last loaded on behalf of remote state, with local load time
    pub(super) last_synced_media: Option<(String, i64)>,
    /// Bumped to invalidate pending scheduled starts
    pub(super) start_generation: u64,
    pub(super) scheduled: Vec<JoinHandle<()>>,
    heartbeat: Option<Interval>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    transport_rx: TransportEvents,
    transport_open: bool,
    pub(super) internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state_tx: watch::Sender<SessionState>,
    stats_tx: watch::Sender<ClockStats>,
    notify_tx: broadcast::Sender<Notification>,
}

impl SessionCoordinator {
    /// Start the coordinator on the current tokio runtime
    pub fn spawn(
        config: SyncConfig,
        engine: Arc<dyn PlaybackEngine>,
        transport: Arc<dyn Transport>,
        transport_events: TransportEvents,
        clock: Arc<dyn Clock>,
    ) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (stats_tx, stats_rx) = watch::channel(ClockStats::default());
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let applying = Arc::new(AtomicBool::new(false));
        let seeking = Arc::new(AtomicBool::new(false));

        let coordinator = SessionCoordinator {
            clock: ClockSync::new(clock, &config),
            debouncer: Debouncer::new(config.debounce_ms),
            config,
            state: SessionState::default(),
            phase: Phase::Idle,
            engine_rx: engine.subscribe(),
            engine,
            transport,
            applying: applying.clone(),
            seeking: seeking.clone(),
            last_synced_media: None,
            start_generation: 0,
            scheduled: Vec::new(),
            heartbeat: None,
            command_rx,
            transport_rx: transport_events,
            transport_open: true,
            internal_tx,
            internal_rx,
            state_tx,
            stats_tx,
            notify_tx: notify_tx.clone(),
        };
        tokio::spawn(coordinator.run());

        CoordinatorHandle {
            command_tx,
            state_rx,
            stats_rx,
            notify_tx,
            applying,
            seeking,
        }
    }

    async fn run(mut self) {
        debug!("Session coordinator started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All coordinator handles dropped");
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                event = self.transport_rx.recv(), if self.transport_open => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            warn!("Transport event channel closed");
                            self.transport_open = false;
                        }
                    }
                }
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal);
                }
                _ = next_heartbeat(&mut self.heartbeat) => {
                    self.on_heartbeat();
                }
            }
        }

        if self.phase != Phase::Idle {
            self.stop_session("Session closed");
        }
        info!("Session coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::StartSession => self.start_session(None),
            Command::JoinSession { code } => self.start_session(Some(code)),
            Command::StopSession => self.stop_session("Session stopped"),
            Command::Resume => self.resume(),
            Command::Pause => self.pause(),
            Command::SeekTo { position_ms } => self.seek_to(position_ms),
            Command::TrackChanged { media_id, metadata } => self.track_changed(media_id, metadata),
            Command::SetHostOnlyMode(enabled) => self.set_host_only_mode(enabled),
            Command::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    // === Session lifecycle ===

    /// `None` hosts a new session, `Some(code)` joins one
    fn start_session(&mut self, code: Option<String>) {
        if self.phase != Phase::Idle {
            warn!("Already in a session, ignoring start");
            return;
        }
        let is_host = code.is_none();

        if let Err(e) = self.engine.prepare() {
            warn!("Failed to prepare player: {}", e);
        }

        let mut state = SessionState {
            is_host,
            ..SessionState::default()
        };
        if is_host {
            let engine = self.engine_rx.borrow().clone();
            if let Some(media_id) = &engine.media_id {
                state.set_media(media_id, TrackMetadata::default());
            }
            let status = if engine.is_playing {
                PlaybackStatus::Playing
            } else {
                PlaybackStatus::Paused
            };
            state.anchor(status, engine.position_ms, self.clock.local_now());
            state.playback_speed = engine.speed;
            info!(
                "Starting session as host ({:?} at {}ms)",
                engine.media_id, engine.position_ms
            );
        } else {
            info!("Joining session {:?}", code);
        }

        self.state = state;
        self.phase = Phase::Handshaking;
        self.clock.reset();
        self.debouncer.reset();
        self.last_synced_media = None;
        self.start_heartbeat();
        self.publish();

        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.connect(code).await {
                let _ = internal_tx.send(Internal::ConnectFailed(e));
            }
        });
    }

    pub(super) fn stop_session(&mut self, reason: &str) {
        if self.phase == Phase::Idle {
            debug!("Not in a session, nothing to stop");
            return;
        }
        info!("Leaving session: {}", reason);

        self.cancel_tasks();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.disconnect().await {
                debug!("Disconnect failed: {}", e);
            }
        });

        self.reset_to_idle();
        self.publish();
        self.notify(Notification::SessionEnded {
            reason: reason.to_string(),
        });
    }

    fn start_heartbeat(&mut self) {
        let period = self.config.heartbeat_interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    fn cancel_tasks(&mut self) {
        self.heartbeat = None;
        self.start_generation += 1;
        for task in self.scheduled.drain(..) {
            task.abort();
        }
    }

    fn reset_to_idle(&mut self) {
        self.state = SessionState::default();
        self.phase = Phase::Idle;
        self.clock.reset();
        self.debouncer.reset();
        self.last_synced_media = None;
    }

    // === Transport ===

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SessionChanged(Some(session_id)) => {
                self.on_session_established(session_id);
            }
            TransportEvent::SessionChanged(None) => self.on_session_lost(),
            TransportEvent::PeersChanged(peers) => {
                if self.phase == Phase::Idle {
                    return;
                }
                let (joined, left) = self.state.mirror_peers(peers);
                for peer_id in left {
                    let name = self.state.forget_peer(&peer_id);
                    info!("Peer left: {} ({:?})", peer_id, name);
                    self.notify(Notification::PeerLeft { peer_id, name });
                }
                if self.state.is_host {
                    for peer_id in joined {
                        info!("Peer connected: {}", peer_id);
                        self.state.record_peer(&peer_id, None, None, None);
                        self.schedule_grace(peer_id);
                    }
                }
                self.publish();
            }
            TransportEvent::Message { from, payload } => match SyncEvent::decode(&payload) {
                Ok(event) => self.process_event(from, event),
                Err(e) => warn!("Dropping message from {}: {}", from, e),
            },
        }
    }

    fn on_session_established(&mut self, session_id: String) {
        if self.phase == Phase::Idle {
            debug!("Ignoring session {} while idle", session_id);
            return;
        }
        let first = self.phase == Phase::Handshaking && self.state.session_id.is_none();
        self.state.session_id = Some(session_id.clone());
        self.phase = Phase::Active;

        if self.state.is_host {
            info!("Hosting session {}", session_id);
            self.state.sync_status = SyncStatus::Ready;
        } else if first {
            info!("Connected to session {}", session_id);
            // Probe first so the offset is known by the time the snapshot arrives
            self.send_ping();
            let profile = self.config.profile.clone();
            let now = self.global_now();
            self.broadcast(&SyncEvent::Join {
                timestamp: now,
                name: profile.name.clone(),
                avatar: profile.avatar.clone(),
                uid: profile.uid.clone(),
            });
            self.broadcast(&SyncEvent::RequestState {
                timestamp: now,
                sender_name: Some(profile.name),
                sender_avatar: profile.avatar,
                sender_uid: profile.uid,
            });
            self.state.sync_status = self.clock.status();
        }
        self.publish();
    }

    fn on_session_lost(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }

        if self.state.is_host {
            warn!("Transport lost the session while hosting");
            self.state.session_id = None;
            self.state.sync_status = SyncStatus::Error;
            self.phase = Phase::Handshaking;
            self.publish();
            self.notify(Notification::Error {
                message: "Connection to the session was lost".to_string(),
            });
            return;
        }

        info!("Host disconnected, stopping local playback");
        if let Err(e) = self.engine.pause() {
            warn!("Failed to pause player: {}", e);
        }
        if let Err(e) = self.engine.seek_to(0) {
            warn!("Failed to rewind player: {}", e);
        }

        self.cancel_tasks();
        self.reset_to_idle();
        self.state.sync_status = SyncStatus::Error;
        self.publish();
        self.notify(Notification::SessionEnded {
            reason: "Host disconnected".to_string(),
        });
    }

    // === Scheduled work ===

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ConnectFailed(e) => {
                if self.phase != Phase::Handshaking {
                    return;
                }
                warn!("Failed to connect: {}", e);
                self.cancel_tasks();
                self.reset_to_idle();
                self.state.sync_status = SyncStatus::Error;
                self.publish();
                self.notify(Notification::Error {
                    message: e.to_string(),
                });
            }
            Internal::ScheduledStart { generation } => {
                if generation != self.start_generation {
                    debug!("Discarding stale scheduled start");
                    return;
                }
                if self.phase == Phase::Idle || !self.state.is_playing() {
                    return;
                }
                debug!("Scheduled start reached");
                if let Err(e) = self.engine.play() {
                    warn!("Failed to start player: {}", e);
                }
            }
            Internal::GraceElapsed { peer_id } => {
                if self.phase != Phase::Active || !self.state.is_host {
                    return;
                }
                if !self.state.connected_peers.contains(&peer_id) {
                    return;
                }
                debug!("Sending state to new peer {}", peer_id);
                self.send_state_sync();
            }
        }
    }

    /// Start the player when the lead time has passed, unless superseded
    pub(super) fn schedule_start(&mut self, delay_ms: i64) {
        self.start_generation += 1;
        let generation = self.start_generation;
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let internal_tx = self.internal_tx.clone();
        self.spawn_scheduled(async move {
            time::sleep(delay).await;
            let _ = internal_tx.send(Internal::ScheduledStart { generation });
        });
    }

    fn schedule_grace(&mut self, peer_id: String) {
        let delay = self.config.peer_grace();
        let internal_tx = self.internal_tx.clone();
        self.spawn_scheduled(async move {
            time::sleep(delay).await;
            let _ = internal_tx.send(Internal::GraceElapsed { peer_id });
        });
    }

    fn spawn_scheduled<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.scheduled.retain(|t| !t.is_finished());
        self.scheduled.push(tokio::spawn(task));
    }

    // === Heartbeat / clock ===

    fn on_heartbeat(&mut self) {
        if self.phase != Phase::Active {
            return;
        }

        if self.state.is_host {
            // Keep-alive only; the host's clock is the reference
            let now = self.global_now();
            self.broadcast(&SyncEvent::Ping {
                timestamp: now,
                id: probe_id(),
                client_timestamp: now,
            });
            return;
        }

        self.clock.expire_pending();
        self.send_ping();
        self.refresh_sync_status();
    }

    fn send_ping(&mut self) {
        let (id, client_timestamp) = self.clock.create_ping();
        let now = self.global_now();
        self.broadcast(&SyncEvent::Ping {
            timestamp: now,
            id,
            client_timestamp,
        });
    }

    pub(super) fn refresh_sync_status(&mut self) {
        let status = self.clock.status();
        if status != self.state.sync_status {
            if status == SyncStatus::Error {
                self.notify(Notification::Error {
                    message: "Host is not answering clock probes".to_string(),
                });
            }
            self.state.sync_status = status;
        }
        self.publish();
    }

    // === Outputs ===

    pub(super) fn global_now(&self) -> i64 {
        self.clock.global_now(self.state.is_host)
    }

    pub(super) fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
        self.stats_tx.send_replace(self.clock.stats());
    }

    pub(super) fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notify_tx.send(notification);
    }

    /// Fire-and-forget send to every other peer
    pub(super) fn broadcast(&self, event: &SyncEvent) {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {}: {}", event.kind(), e);
                return;
            }
        };
        if let Err(e) = self.transport.send(payload) {
            debug!("Broadcast of {} failed: {}", event.kind(), e);
        }
    }

    /// Broadcast as the host, bumping the state version
    pub(super) fn broadcast_authoritative(&mut self, event: &SyncEvent) {
        self.state.state_version += 1;
        self.publish();
        self.broadcast(event);
    }

    /// Send the full state to everyone
    pub(super) fn send_state_sync(&mut self) {
        self.state.state_version += 1;
        self.publish();
        let event = SyncEvent::StateSync {
            timestamp: self.global_now(),
            state: self.state.clone(),
        };
        self.broadcast(&event);
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
