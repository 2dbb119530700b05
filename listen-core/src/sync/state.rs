//! Session State
//!
//! The single snapshot of "the truth" for a listening session. A new value
//! replaces the old one on every transition; nothing outside the coordinator
//! mutates it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Whether the session is currently playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Playing,
    #[default]
    Paused,
}

/// User-facing sync progress, derived from connection and clock-sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No clock exchange attempted yet
    #[default]
    Waiting,
    /// Probes sent, none answered yet
    Syncing,
    /// At least one clock exchange completed
    Ready,
    /// Transport lost or the host stopped answering probes
    Error,
}

/// Display metadata for a track. Never used for control decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
}

/// Authoritative session snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    /// Set once a transport session exists
    pub session_id: Option<String>,
    pub is_host: bool,
    pub host_peer_id: Option<String>,
    /// Mirrored from the transport, never decided here
    pub connected_peers: BTreeSet<String>,
    pub current_media_id: Option<String>,
    pub playback_status: PlaybackStatus,
    /// Global time (ms) at which `position_at_anchor` was valid
    pub track_start_global_time: i64,
    /// Track position (ms) at `track_start_global_time`
    pub position_at_anchor: i64,
    pub playback_speed: f64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub thumbnail: Option<String>,
    /// Only the host's intents change state while set
    pub host_only_mode: bool,
    pub connected_peer_names: BTreeMap<String, Option<String>>,
    pub connected_peer_avatars: BTreeMap<String, Option<String>>,
    pub connected_peer_uids: BTreeMap<String, Option<String>>,
    /// Bumped by the host on every authoritative broadcast
    pub state_version: u64,
    pub sync_status: SyncStatus,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            is_host: false,
            host_peer_id: None,
            connected_peers: BTreeSet::new(),
            current_media_id: None,
            playback_status: PlaybackStatus::Paused,
            track_start_global_time: 0,
            position_at_anchor: 0,
            playback_speed: 1.0,
            title: None,
            artist: None,
            thumbnail: None,
            host_only_mode: false,
            connected_peer_names: BTreeMap::new(),
            connected_peer_avatars: BTreeMap::new(),
            connected_peer_uids: BTreeMap::new(),
            state_version: 0,
            sync_status: SyncStatus::Waiting,
        }
    }
}

/// Speeds a session accepts: finite and above zero
pub fn is_valid_speed(speed: f64) -> bool {
    speed.is_finite() && speed > 0.0
}

impl SessionState {
    pub fn is_playing(&self) -> bool {
        self.playback_status == PlaybackStatus::Playing
    }

    /// Extrapolate the authoritative position at a global time.
    ///
    /// While playing, the position advances from the anchor at
    /// `playback_speed`. Times before the anchor (a start scheduled in the
    /// future) resolve to the anchor position itself.
    pub fn position_at(&self, global_now: i64) -> i64 {
        if !self.is_playing() {
            return self.position_at_anchor.max(0);
        }
        let elapsed = global_now.saturating_sub(self.track_start_global_time).max(0);
        let advanced = (elapsed as f64 * self.playback_speed).round() as i64;
        self.position_at_anchor.saturating_add(advanced).max(0)
    }

    /// Move the anchor pair: `position_ms` is valid at `global_time`.
    pub fn anchor(&mut self, status: PlaybackStatus, position_ms: i64, global_time: i64) {
        self.playback_status = status;
        self.position_at_anchor = position_ms.max(0);
        self.track_start_global_time = global_time;
    }

    /// Switch to another media item, dropping metadata that belonged to the old one.
    pub fn set_media(&mut self, media_id: &str, metadata: TrackMetadata) {
        if self.current_media_id.as_deref() != Some(media_id) {
            self.title = None;
            self.artist = None;
            self.thumbnail = None;
            self.current_media_id = Some(media_id.to_string());
        }
        if metadata.title.is_some() {
            self.title = metadata.title;
        }
        if metadata.artist.is_some() {
            self.artist = metadata.artist;
        }
        if metadata.thumbnail.is_some() {
            self.thumbnail = metadata.thumbnail;
        }
    }

    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: self.title.clone(),
            artist: self.artist.clone(),
            thumbnail: self.thumbnail.clone(),
        }
    }

    /// Carry over the fields a remote snapshot must never overwrite.
    pub fn keep_local_fields(&mut self, local: &SessionState) {
        self.is_host = local.is_host;
        self.session_id = local.session_id.clone();
        self.connected_peers = local.connected_peers.clone();
        self.sync_status = local.sync_status;
    }

    /// Record what a peer told us about itself. Absent values keep what we had.
    pub fn record_peer(
        &mut self,
        peer_id: &str,
        name: Option<String>,
        avatar: Option<String>,
        uid: Option<String>,
    ) {
        for (map, value) in [
            (&mut self.connected_peer_names, name),
            (&mut self.connected_peer_avatars, avatar),
            (&mut self.connected_peer_uids, uid),
        ] {
            let slot = map.entry(peer_id.to_string()).or_insert(None);
            if value.is_some() {
                *slot = value;
            }
        }
    }

    /// Drop everything known about a peer, returning its display name.
    pub fn forget_peer(&mut self, peer_id: &str) -> Option<String> {
        self.connected_peer_avatars.remove(peer_id);
        self.connected_peer_uids.remove(peer_id);
        self.connected_peer_names.remove(peer_id).flatten()
    }

    pub fn peer_name(&self, peer_id: &str) -> Option<String> {
        self.connected_peer_names.get(peer_id).cloned().flatten()
    }

    /// Mirror the transport's peer set. Returns `(joined, left)`.
    pub fn mirror_peers(&mut self, peers: BTreeSet<String>) -> (Vec<String>, Vec<String>) {
        let joined = peers.difference(&self.connected_peers).cloned().collect();
        let left = self.connected_peers.difference(&peers).cloned().collect();
        self.connected_peers = peers;
        (joined, left)
    }
}
