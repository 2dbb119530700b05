//! FFI types exposed via uniffi

use crate::clock::ClockStats;
use crate::coordinator::{
    CoordinatorError, Notification as InternalNotification, RemoteAction as InternalRemoteAction,
};
use crate::engine::{EngineLifecycle as InternalLifecycle, EngineState};
use crate::sync::{
    PlaybackStatus as InternalPlaybackStatus, SessionState, SyncStatus as InternalSyncStatus,
};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session has shut down")]
    CoordinatorStopped,
}

impl From<CoordinatorError> for CoreError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Stopped => CoreError::CoordinatorStopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PlaybackStatus {
    Playing,
    Paused,
}

impl From<InternalPlaybackStatus> for PlaybackStatus {
    fn from(s: InternalPlaybackStatus) -> Self {
        match s {
            InternalPlaybackStatus::Playing => PlaybackStatus::Playing,
            InternalPlaybackStatus::Paused => PlaybackStatus::Paused,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SyncStatus {
    Waiting,
    Syncing,
    Ready,
    Error,
}

impl From<InternalSyncStatus> for SyncStatus {
    fn from(s: InternalSyncStatus) -> Self {
        match s {
            InternalSyncStatus::Waiting => SyncStatus::Waiting,
            InternalSyncStatus::Syncing => SyncStatus::Syncing,
            InternalSyncStatus::Ready => SyncStatus::Ready,
            InternalSyncStatus::Error => SyncStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum EngineLifecycle {
    Idle,
    Buffering,
    Ready,
    Ended,
    Released,
}

impl From<EngineLifecycle> for InternalLifecycle {
    fn from(l: EngineLifecycle) -> Self {
        match l {
            EngineLifecycle::Idle => InternalLifecycle::Idle,
            EngineLifecycle::Buffering => InternalLifecycle::Buffering,
            EngineLifecycle::Ready => InternalLifecycle::Ready,
            EngineLifecycle::Ended => InternalLifecycle::Ended,
            EngineLifecycle::Released => InternalLifecycle::Released,
        }
    }
}

/// Player state as reported by the native player
#[derive(Debug, Clone, uniffi::Record)]
pub struct EngineSnapshot {
    pub media_id: Option<String>,
    pub is_playing: bool,
    pub position_ms: i64,
    pub buffered_ms: i64,
    pub speed: f64,
    pub lifecycle: EngineLifecycle,
}

impl From<EngineSnapshot> for EngineState {
    fn from(s: EngineSnapshot) -> Self {
        Self {
            media_id: s.media_id,
            is_playing: s.is_playing,
            position_ms: s.position_ms,
            buffered_ms: s.buffered_ms,
            speed: s.speed,
            lifecycle: s.lifecycle.into(),
        }
    }
}

/// A connected peer and what it told us about itself
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct PeerInfo {
    pub peer_id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub uid: Option<String>,
}

/// Session state exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub is_host: bool,
    pub host_peer_id: Option<String>,
    pub peers: Vec<PeerInfo>,
    pub media_id: Option<String>,
    pub playback_status: PlaybackStatus,
    /// Track position at `anchor_global_time_ms`
    pub anchor_position_ms: i64,
    pub anchor_global_time_ms: i64,
    pub playback_speed: f64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    pub host_only_mode: bool,
    pub state_version: u64,
    pub sync_status: SyncStatus,
}

impl From<&SessionState> for SessionSnapshot {
    fn from(s: &SessionState) -> Self {
        let lookup = |map: &std::collections::BTreeMap<String, Option<String>>, peer: &str| {
            map.get(peer).cloned().flatten()
        };
        let peers = s
            .connected_peers
            .iter()
            .map(|peer_id| PeerInfo {
                peer_id: peer_id.clone(),
                name: lookup(&s.connected_peer_names, peer_id),
                avatar: lookup(&s.connected_peer_avatars, peer_id),
                uid: lookup(&s.connected_peer_uids, peer_id),
            })
            .collect();

        Self {
            session_id: s.session_id.clone(),
            is_host: s.is_host,
            host_peer_id: s.host_peer_id.clone(),
            peers,
            media_id: s.current_media_id.clone(),
            playback_status: s.playback_status.into(),
            anchor_position_ms: s.position_at_anchor,
            anchor_global_time_ms: s.track_start_global_time,
            playback_speed: s.playback_speed,
            title: s.title.clone(),
            artist: s.artist.clone(),
            thumbnail: s.thumbnail.clone(),
            host_only_mode: s.host_only_mode,
            state_version: s.state_version,
            sync_status: s.sync_status.into(),
        }
    }
}

/// Clock sync diagnostics (participants only)
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncStats {
    /// Host clock minus local clock
    pub offset_ms: i64,
    pub avg_rtt_ms: Option<i64>,
    pub samples: u32,
    pub consecutive_misses: u32,
    pub status: SyncStatus,
}

impl From<ClockStats> for SyncStats {
    fn from(s: ClockStats) -> Self {
        Self {
            offset_ms: s.offset_ms,
            avg_rtt_ms: s.avg_rtt_ms,
            samples: s.samples,
            consecutive_misses: s.consecutive_misses,
            status: s.status.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum RemoteAction {
    Play { media_id: String, position_ms: i64 },
    Pause { position_ms: i64 },
    Seek { position_ms: i64 },
}

impl From<InternalRemoteAction> for RemoteAction {
    fn from(a: InternalRemoteAction) -> Self {
        match a {
            InternalRemoteAction::Play {
                media_id,
                position_ms,
            } => RemoteAction::Play {
                media_id,
                position_ms,
            },
            InternalRemoteAction::Pause { position_ms } => RemoteAction::Pause { position_ms },
            InternalRemoteAction::Seek { position_ms } => RemoteAction::Seek { position_ms },
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum Notification {
    PeerJoined {
        peer_id: String,
        name: Option<String>,
    },
    PeerLeft {
        peer_id: String,
        name: Option<String>,
    },
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

impl From<InternalNotification> for Notification {
    fn from(n: InternalNotification) -> Self {
        match n {
            InternalNotification::PeerJoined { peer_id, name } => {
                Notification::PeerJoined { peer_id, name }
            }
            InternalNotification::PeerLeft { peer_id, name } => {
                Notification::PeerLeft { peer_id, name }
            }
            InternalNotification::RemoteAction {
                peer_id,
                requester,
                action,
            } => Notification::RemoteAction {
                peer_id,
                requester,
                action: action.into(),
            },
            InternalNotification::SessionEnded { reason } => Notification::SessionEnded { reason },
            InternalNotification::Error { message } => Notification::Error { message },
        }
    }
}

/// Native player, driven by the session
#[uniffi::export(callback_interface)]
pub trait PlaybackCallback: Send + Sync {
    fn prepare(&self);
    /// Returns false if the player cannot load the item
    fn load_track(&self, media_id: String, seek_position_ms: i64, auto_play: bool) -> bool;
    fn play(&self);
    fn pause(&self);
    fn seek_to(&self, position_ms: i64);
    fn set_volume(&self, volume: f32);
    fn set_playback_speed(&self, speed: f64);
    fn release(&self);
}

/// Native transport; report back through `Session::on_*`
#[uniffi::export(callback_interface)]
pub trait TransportCallback: Send + Sync {
    /// `None` creates a session, `Some(code)` joins one
    fn connect(&self, session_code: Option<String>);
    fn disconnect(&self);
    fn send(&self, payload: Vec<u8>);
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_state_changed(&self, state: SessionSnapshot);
    fn on_notification(&self, notification: Notification);
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    #[test]
    fn test_snapshot_lists_peers_with_metadata() {
        let state = SessionState {
            connected_peers: BTreeSet::from(["a".to_string(), "b".to_string()]),
            connected_peer_names: BTreeMap::from([("a".to_string(), Some("Ada".to_string()))]),
            ..SessionState::default()
        };
        let snapshot = SessionSnapshot::from(&state);
        assert_eq!(
            snapshot.peers,
            vec![
                PeerInfo {
                    peer_id: "a".to_string(),
                    name: Some("Ada".to_string()),
                    avatar: None,
                    uid: None,
                },
                PeerInfo {
                    peer_id: "b".to_string(),
                    name: None,
                    avatar: None,
                    uid: None,
                },
            ]
        );
        assert_eq!(snapshot.sync_status, SyncStatus::Waiting);
        assert_eq!(snapshot.playback_status, PlaybackStatus::Paused);
    }
}
