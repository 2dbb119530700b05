//! Local intents
//!
//! resume / pause / seek / track change as issued by the user on this
//! device, after debounce and host-only gating.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::actor::{Phase, SessionCoordinator};
use crate::sync::{PlaybackStatus, SyncEvent, TrackMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum IntentKind {
    Resume,
    Pause,
    Seek,
    TrackChange,
}

/// Enforces a minimum spacing between invocations of the same intent
#[derive(Debug)]
pub(super) struct Debouncer {
    interval_ms: i64,
    last_accepted: HashMap<IntentKind, i64>,
}

impl Debouncer {
    pub(super) fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms as i64,
            last_accepted: HashMap::new(),
        }
    }

    /// Record and accept the intent unless one of the same kind was accepted too recently
    pub(super) fn admit(&mut self, kind: IntentKind, now_ms: i64) -> bool {
        match self.last_accepted.get(&kind) {
            Some(&last) if now_ms - last < self.interval_ms => false,
            _ => {
                self.last_accepted.insert(kind, now_ms);
                true
            }
        }
    }

    pub(super) fn reset(&mut self) {
        self.last_accepted.clear();
    }
}

/// Raises a shared flag for as long as it lives
pub(super) struct ScopedFlag(Arc<AtomicBool>);

impl ScopedFlag {
    pub(super) fn raise(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for ScopedFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionCoordinator {
    fn admit_intent(&mut self, kind: IntentKind) -> bool {
        if self.phase == Phase::Idle {
            debug!("Ignoring {:?} outside a session", kind);
            return false;
        }
        if !self.state.is_host && self.state.host_only_mode {
            info!("Host-only mode: ignoring local {:?}", kind);
            return false;
        }
        if !self.debouncer.admit(kind, self.clock.local_now()) {
            debug!("Debounced {:?}", kind);
            return false;
        }
        true
    }

    fn requester_name(&self) -> Option<String> {
        Some(self.config.profile.name.clone())
    }

    /// Where the track is right now: the player's own position if it holds
    /// the session's media, the extrapolated anchor otherwise
    fn current_position(&self, global_now: i64) -> i64 {
        let engine = self.engine_rx.borrow();
        if engine.media_id.is_some() && engine.media_id == self.state.current_media_id {
            engine.position_ms
        } else {
            self.state.position_at(global_now)
        }
    }

    fn play_event(&self, timestamp: i64, media_id: String, start_pos: i64) -> SyncEvent {
        let metadata = self.state.metadata();
        SyncEvent::Play {
            timestamp,
            media_id,
            start_pos,
            speed: self.state.playback_speed,
            title: metadata.title,
            artist: metadata.artist,
            thumbnail: metadata.thumbnail,
            requester_name: self.requester_name(),
        }
    }

    pub(super) fn resume(&mut self) {
        if !self.admit_intent(IntentKind::Resume) {
            return;
        }

        let engine_media = self.engine_rx.borrow().media_id.clone();
        let Some(media_id) = self.state.current_media_id.clone().or(engine_media) else {
            debug!("Nothing to resume");
            return;
        };
        let now = self.global_now();
        let position = self.current_position(now);

        if !self.state.is_host {
            info!("Requesting play of {} at {}ms", media_id, position);
            let event = self.play_event(now, media_id, position);
            self.broadcast(&event);
            return;
        }

        // Start slightly in the future so the broadcast arrives first
        let lead_ms = self.config.resume_lead_ms as i64;
        let start_at = now + lead_ms;
        if self.state.current_media_id.is_none() {
            self.state.set_media(&media_id, TrackMetadata::default());
        }
        self.state.anchor(PlaybackStatus::Playing, position, start_at);
        info!("Resuming {} at {}ms in {}ms", media_id, position, lead_ms);

        let event = self.play_event(start_at, media_id, position);
        self.broadcast_authoritative(&event);
        self.schedule_start(lead_ms);
    }

    pub(super) fn pause(&mut self) {
        if !self.admit_intent(IntentKind::Pause) {
            return;
        }

        let now = self.global_now();
        if !self.state.is_host {
            let position = self.current_position(now);
            info!("Requesting pause at {}ms", position);
            let event = SyncEvent::Pause {
                timestamp: now,
                pos: position,
                requester_name: self.requester_name(),
            };
            self.broadcast(&event);
            return;
        }

        if let Err(e) = self.engine.pause() {
            warn!("Failed to pause player: {}", e);
        }
        let position = self.current_position(now);
        self.start_generation += 1;
        self.state.anchor(PlaybackStatus::Paused, position, now);
        info!("Paused at {}ms", position);

        let event = SyncEvent::Pause {
            timestamp: now,
            pos: position,
            requester_name: self.requester_name(),
        };
        self.broadcast_authoritative(&event);
    }

    pub(super) fn seek_to(&mut self, position_ms: i64) {
        if !self.admit_intent(IntentKind::Seek) {
            return;
        }

        let position_ms = position_ms.max(0);
        let now = self.global_now();
        if !self.state.is_host {
            info!("Requesting seek to {}ms", position_ms);
            let event = SyncEvent::Seek {
                timestamp: now,
                pos: position_ms,
                requester_name: self.requester_name(),
            };
            self.broadcast(&event);
            return;
        }

        let was_playing = self.state.is_playing();
        {
            let _seeking = ScopedFlag::raise(&self.seeking);
            let engine_playing = self.engine_rx.borrow().is_playing;
            if let Err(e) = self.engine.seek_to(position_ms) {
                warn!("Failed to seek player: {}", e);
            }
            if !engine_playing {
                if let Err(e) = self.engine.play() {
                    warn!("Failed to resume player after seek: {}", e);
                }
            }
        }

        self.start_generation += 1;
        self.state.anchor(PlaybackStatus::Playing, position_ms, now);
        info!("Seeked to {}ms", position_ms);

        let event = SyncEvent::Seek {
            timestamp: now,
            pos: position_ms,
            requester_name: self.requester_name(),
        };
        self.broadcast_authoritative(&event);

        if !was_playing {
            if let Some(media_id) = self.state.current_media_id.clone() {
                let event = self.play_event(now, media_id, position_ms);
                self.broadcast(&event);
            }
        }
    }

    pub(super) fn track_changed(&mut self, media_id: String, metadata: TrackMetadata) {
        if let Some((synced, at)) = &self.last_synced_media {
            let age = self.clock.local_now() - at;
            if *synced == media_id && age < self.config.echo_window_ms as i64 {
                debug!("Suppressing echo of synced track {} ({}ms old)", media_id, age);
                return;
            }
        }
        if !self.admit_intent(IntentKind::TrackChange) {
            return;
        }

        let now = self.global_now();
        if !self.state.is_host {
            info!("Requesting track change to {}", media_id);
            let event = SyncEvent::Play {
                timestamp: now,
                media_id,
                start_pos: 0,
                speed: self.state.playback_speed,
                title: metadata.title,
                artist: metadata.artist,
                thumbnail: metadata.thumbnail,
                requester_name: self.requester_name(),
            };
            self.broadcast(&event);
            return;
        }

        let engine = self.engine_rx.borrow().clone();
        let position = if engine.media_id.as_deref() == Some(media_id.as_str()) {
            engine.position_ms
        } else {
            0
        };
        let status = if engine.is_playing {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Paused
        };

        self.start_generation += 1;
        self.state.set_media(&media_id, metadata);
        self.state.anchor(status, position, now);
        info!("Track changed to {} ({:?})", media_id, status);

        if engine.is_playing {
            let event = self.play_event(now, media_id, position);
            self.broadcast_authoritative(&event);
        } else {
            self.send_state_sync();
        }
    }

    pub(super) fn set_host_only_mode(&mut self, enabled: bool) {
        if self.phase == Phase::Idle || !self.state.is_host {
            warn!("Only the host of a session can change host-only mode");
            return;
        }
        info!("Host-only mode {}", if enabled { "enabled" } else { "disabled" });
        self.state.host_only_mode = enabled;
        self.send_state_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debouncer_is_per_kind() {
        let mut debouncer = Debouncer::new(500);
        assert!(debouncer.admit(IntentKind::Resume, 1_000));
        assert!(!debouncer.admit(IntentKind::Resume, 1_100));
        assert!(debouncer.admit(IntentKind::Pause, 1_100));
        assert!(debouncer.admit(IntentKind::Resume, 1_500));
    }

    #[test]
    fn test_dropped_calls_do_not_extend_window() {
        let mut debouncer = Debouncer::new(500);
        assert!(debouncer.admit(IntentKind::Seek, 0));
        assert!(!debouncer.admit(IntentKind::Seek, 400));
        assert!(debouncer.admit(IntentKind::Seek, 500));
    }

    #[test]
    fn test_scoped_flag_clears_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        {
            let _guard = ScopedFlag::raise(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
