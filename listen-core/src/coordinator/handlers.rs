//! Remote event handling

use tracing::{debug, info, warn};

use super::actor::{Phase, SessionCoordinator};
use super::{Notification, RemoteAction};
use crate::sync::{is_valid_speed, PlaybackStatus, SessionState, SyncEvent, TrackMetadata};

impl SessionCoordinator {
    /// Handle a decoded event from another peer
    pub(super) fn process_event(&mut self, from: String, event: SyncEvent) {
        if self.phase == Phase::Idle {
            debug!("Ignoring {} from {} outside a session", event.kind(), from);
            return;
        }
        // Taken before any processing so the host's receipt time is tight
        let received_at = self.global_now();

        if self.state.host_only_mode && event.is_control() && !self.accepts_control_from(&from) {
            debug!("Host-only mode: dropping {} from {}", event.kind(), from);
            return;
        }

        match event {
            SyncEvent::RequestState {
                sender_name,
                sender_avatar,
                sender_uid,
                ..
            } => {
                if !self.state.is_host {
                    return;
                }
                info!(
                    "State requested by {} ({})",
                    from,
                    sender_name.as_deref().unwrap_or("?")
                );
                self.state
                    .record_peer(&from, sender_name, sender_avatar, sender_uid);
                self.send_state_sync();
            }

            SyncEvent::Join {
                name, avatar, uid, ..
            } => {
                info!("{} joined as {}", from, name);
                self.state
                    .record_peer(&from, Some(name.clone()), avatar, uid);
                self.publish();
                self.notify(Notification::PeerJoined {
                    peer_id: from,
                    name: Some(name),
                });
            }

            SyncEvent::StateSync { state, .. } => {
                if self.state.is_host {
                    warn!("Ignoring state sync from {}: we are the host", from);
                    return;
                }
                if state.state_version < self.state.state_version {
                    // Applied anyway: the latest received snapshot wins
                    debug!(
                        "State sync v{} is older than v{}",
                        state.state_version, self.state.state_version
                    );
                }
                let mut state = state;
                if state.host_peer_id.is_none() {
                    state.host_peer_id = Some(from);
                }
                self.apply_snapshot(state);
            }

            SyncEvent::Play { .. } | SyncEvent::Pause { .. } | SyncEvent::Seek { .. } => {
                self.handle_playback_event(from, event);
            }

            SyncEvent::Ping {
                id,
                client_timestamp,
                ..
            } => {
                if !self.state.is_host {
                    return;
                }
                let now = self.global_now();
                self.broadcast(&SyncEvent::Pong {
                    timestamp: now,
                    id,
                    client_timestamp,
                    server_timestamp: received_at,
                    server_reply_timestamp: now,
                });
            }

            SyncEvent::Pong {
                id,
                client_timestamp,
                server_timestamp,
                server_reply_timestamp,
                ..
            } => {
                if self.state.is_host {
                    return;
                }
                let sample = self.clock.handle_pong(
                    &id,
                    client_timestamp,
                    server_timestamp,
                    server_reply_timestamp,
                );
                if sample.is_some() {
                    self.refresh_sync_status();
                }
            }
        }
    }

    /// Under host-only mode the host takes no control events at all, and
    /// participants only take them from the host once they know who it is
    fn accepts_control_from(&self, from: &str) -> bool {
        if self.state.is_host {
            return false;
        }
        match &self.state.host_peer_id {
            Some(host) => host == from,
            None => true,
        }
    }

    fn handle_playback_event(&mut self, from: String, event: SyncEvent) {
        let Some((next, action)) = self.state_for_event(&event) else {
            return;
        };
        let requester = event.requester_name().map(str::to_string);
        info!(
            "{} from {} ({})",
            event.kind(),
            from,
            requester.as_deref().unwrap_or("?")
        );

        self.notify(Notification::RemoteAction {
            peer_id: from,
            requester,
            action,
        });
        self.apply_snapshot(next);

        if self.state.is_host {
            // The request becomes the authoritative event
            self.broadcast_authoritative(&event);
            self.send_state_sync();
        }
    }

    /// The state a playback event describes, based on what we hold now
    fn state_for_event(&self, event: &SyncEvent) -> Option<(SessionState, RemoteAction)> {
        let mut next = self.state.clone();
        let action = match event {
            SyncEvent::Play {
                timestamp,
                media_id,
                start_pos,
                speed,
                title,
                artist,
                thumbnail,
                ..
            } => {
                next.set_media(
                    media_id,
                    TrackMetadata {
                        title: title.clone(),
                        artist: artist.clone(),
                        thumbnail: thumbnail.clone(),
                    },
                );
                next.anchor(PlaybackStatus::Playing, *start_pos, *timestamp);
                if is_valid_speed(*speed) {
                    next.playback_speed = *speed;
                }
                RemoteAction::Play {
                    media_id: media_id.clone(),
                    position_ms: *start_pos,
                }
            }
            SyncEvent::Pause { timestamp, pos, .. } => {
                next.anchor(PlaybackStatus::Paused, *pos, *timestamp);
                RemoteAction::Pause { position_ms: *pos }
            }
            SyncEvent::Seek { timestamp, pos, .. } => {
                next.anchor(next.playback_status, *pos, *timestamp);
                RemoteAction::Seek { position_ms: *pos }
            }
            _ => return None,
        };
        Some((next, action))
    }
}
