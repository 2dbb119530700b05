//! Authoritative snapshot application
//!
//! The only path by which remote (or host-reflected) state reaches the
//! player. Steps:
//! 1. raise the `applying` flag so player callbacks are not re-broadcast
//! 2. swap in the snapshot, keeping local-only fields
//! 3. extrapolate the target position on the global clock
//! 4. seek/play/pause the loaded item, or load the new one
//! 5. drop the flag, even when the player refused

use tracing::{debug, info, warn};

use super::actor::SessionCoordinator;
use super::intents::ScopedFlag;
use super::Notification;
use crate::engine::EngineError;
use crate::sync::{is_valid_speed, SessionState};

/// Speeds closer than this are treated as equal
const SPEED_EPSILON: f64 = 0.001;

impl SessionCoordinator {
    pub(super) fn apply_snapshot(&mut self, incoming: SessionState) {
        let _applying = ScopedFlag::raise(&self.applying);

        let mut next = incoming;
        next.keep_local_fields(&self.state);
        if next.host_peer_id.is_none() {
            next.host_peer_id = self.state.host_peer_id.clone();
        }
        if !is_valid_speed(next.playback_speed) {
            warn!(
                "Ignoring invalid playback speed {} in session state",
                next.playback_speed
            );
            next.playback_speed = self.state.playback_speed;
        }
        self.state = next;
        // Whatever was scheduled belonged to the previous state
        self.start_generation += 1;

        let now = self.global_now();
        let target = self.state.position_at(now);
        let starts_later = self.state.is_playing() && self.state.track_start_global_time > now;
        let autoplay = self.state.is_playing() && !starts_later;

        if let Err(e) = self.reconcile_engine(target, autoplay) {
            warn!("Failed to apply session state: {}", e);
            self.notify(Notification::Error {
                message: e.to_string(),
            });
        }

        if starts_later {
            let delay = self.state.track_start_global_time.saturating_sub(now);
            debug!("Start scheduled in {}ms", delay);
            self.schedule_start(delay);
        }
        self.publish();
    }

    fn reconcile_engine(&mut self, target_ms: i64, autoplay: bool) -> Result<(), EngineError> {
        let engine = self.engine_rx.borrow().clone();

        let speed = self.state.playback_speed;
        if (engine.speed - speed).abs() > SPEED_EPSILON {
            if let Err(e) = self.engine.set_playback_speed(speed) {
                warn!("Failed to set playback speed {}: {}", speed, e);
            }
        }

        let Some(media_id) = self.state.current_media_id.clone() else {
            debug!("Session has no media, pausing");
            return self.engine.pause();
        };

        if engine.media_id.as_deref() == Some(media_id.as_str()) {
            debug!(
                "Reconciling {} at {}ms (playing={})",
                media_id, target_ms, autoplay
            );
            self.engine.seek_to(target_ms)?;
            if autoplay {
                self.engine.play()
            } else {
                self.engine.pause()
            }
        } else {
            info!(
                "Loading {} at {}ms (autoplay={})",
                media_id, target_ms, autoplay
            );
            if let Err(e) = self.engine.pause() {
                debug!("Pause before load failed: {}", e);
            }
            self.last_synced_media = Some((media_id.clone(), self.clock.local_now()));
            self.engine.load_track(&media_id, target_ms, autoplay)
        }
    }
}
