//! In-process transport
//!
//! A hub that routes payloads between endpoints living in the same process.
//! Sessions are named by [`SessionCode`]s; the creator is the host and the
//! session closes for everyone when the host leaves.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{SessionCode, Transport, TransportError, TransportEvent, TransportEvents};

struct HubSession {
    host: String,
    members: BTreeSet<String>,
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<String, HubSession>,
    endpoints: HashMap<String, mpsc::UnboundedSender<TransportEvent>>,
    /// Which session each peer is in
    membership: HashMap<String, String>,
}

impl HubInner {
    fn notify(&self, peer_id: &str, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(peer_id) {
            // A dropped receiver just means that endpoint is gone
            let _ = tx.send(event);
        }
    }

    /// Tell every member who else is in the session
    fn broadcast_peers(&self, code: &str) {
        let Some(session) = self.sessions.get(code) else {
            return;
        };
        for member in &session.members {
            let others = session
                .members
                .iter()
                .filter(|p| *p != member)
                .cloned()
                .collect();
            self.notify(member, TransportEvent::PeersChanged(others));
        }
    }

    fn create(&mut self, peer_id: &str) -> Result<String, TransportError> {
        if self.membership.contains_key(peer_id) {
            return Err(TransportError::AlreadyConnected);
        }

        let mut code = SessionCode::random();
        while self.sessions.contains_key(code.as_str()) {
            code = SessionCode::random();
        }
        let code = code.as_str().to_string();

        self.sessions.insert(
            code.clone(),
            HubSession {
                host: peer_id.to_string(),
                members: BTreeSet::from([peer_id.to_string()]),
            },
        );
        self.membership.insert(peer_id.to_string(), code.clone());
        info!("Memory hub: {} created session {}", peer_id, code);

        self.notify(peer_id, TransportEvent::SessionChanged(Some(code.clone())));
        self.notify(peer_id, TransportEvent::PeersChanged(BTreeSet::new()));
        Ok(code)
    }

    fn join(&mut self, peer_id: &str, input: &str) -> Result<String, TransportError> {
        if self.membership.contains_key(peer_id) {
            return Err(TransportError::AlreadyConnected);
        }

        let code = SessionCode::parse(input)
            .map(|c| c.as_str().to_string())
            .filter(|c| self.sessions.contains_key(c))
            .ok_or_else(|| TransportError::SessionNotFound(input.to_string()))?;

        if let Some(session) = self.sessions.get_mut(&code) {
            session.members.insert(peer_id.to_string());
        }
        self.membership.insert(peer_id.to_string(), code.clone());
        info!("Memory hub: {} joined session {}", peer_id, code);

        self.notify(peer_id, TransportEvent::SessionChanged(Some(code.clone())));
        self.broadcast_peers(&code);
        Ok(code)
    }

    fn leave(&mut self, peer_id: &str) -> Result<(), TransportError> {
        let code = self
            .membership
            .remove(peer_id)
            .ok_or(TransportError::NotConnected)?;
        let Some(session) = self.sessions.get_mut(&code) else {
            return Ok(());
        };
        session.members.remove(peer_id);

        if session.host == peer_id {
            info!("Memory hub: host {} left, closing session {}", peer_id, code);
            let members = std::mem::take(&mut session.members);
            self.sessions.remove(&code);
            for member in members {
                self.membership.remove(&member);
                self.notify(&member, TransportEvent::SessionChanged(None));
                self.notify(&member, TransportEvent::PeersChanged(BTreeSet::new()));
            }
        } else {
            debug!("Memory hub: {} left session {}", peer_id, code);
            self.broadcast_peers(&code);
        }
        Ok(())
    }

    fn deliver(&self, from: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let code = self
            .membership
            .get(from)
            .ok_or(TransportError::NotConnected)?;
        let session = self.sessions.get(code).ok_or(TransportError::Closed)?;

        for member in session.members.iter().filter(|p| *p != from) {
            self.notify(
                member,
                TransportEvent::Message {
                    from: from.to_string(),
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }
}

/// Shared router for [`MemoryTransport`] endpoints
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Events for it arrive on the returned receiver.
    pub fn endpoint(&self, peer_id: impl Into<String>) -> (MemoryTransport, TransportEvents) {
        let peer_id = peer_id.into();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.inner.lock().endpoints.insert(peer_id.clone(), event_tx);

        let transport = MemoryTransport {
            peer_id,
            hub: self.clone(),
        };
        (transport, event_rx)
    }

    /// Members of a session, if it exists
    pub fn members(&self, code: &str) -> Option<BTreeSet<String>> {
        self.inner
            .lock()
            .sessions
            .get(code)
            .map(|s| s.members.clone())
    }
}

/// One peer's view of a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    peer_id: String,
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, code: Option<String>) -> BoxFuture<'_, Result<(), TransportError>> {
        let mut inner = self.hub.inner.lock();
        let result = match code {
            None => inner.create(&self.peer_id),
            Some(code) => inner.join(&self.peer_id, &code),
        };
        future::ready(result.map(|_| ())).boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        let result = self.hub.inner.lock().leave(&self.peer_id);
        future::ready(result).boxed()
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.hub.inner.lock().deliver(&self.peer_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut TransportEvents) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn session_code(events: &[TransportEvent]) -> String {
        events
            .iter()
            .find_map(|e| match e {
                TransportEvent::SessionChanged(Some(code)) => Some(code.clone()),
                _ => None,
            })
            .expect("no session id")
    }

    #[tokio::test]
    async fn test_create_join_and_deliver() {
        let hub = MemoryHub::new();
        let (host, mut host_rx) = hub.endpoint("host");
        let (guest, mut guest_rx) = hub.endpoint("guest");

        host.connect(None).await.unwrap();
        let code = session_code(&drain(&mut host_rx));

        // Codes are accepted in their display form too
        let display = SessionCode::parse(&code).unwrap().to_string();
        guest.connect(Some(display.to_lowercase())).await.unwrap();

        let guest_events = drain(&mut guest_rx);
        assert_eq!(session_code(&guest_events), code);
        assert!(guest_events.contains(&TransportEvent::PeersChanged(BTreeSet::from([
            "host".to_string()
        ]))));
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::PeersChanged(BTreeSet::from([
                "guest".to_string()
            ]))]
        );

        guest.send(b"hello".to_vec()).unwrap();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::Message {
                from: "guest".to_string(),
                payload: b"hello".to_vec(),
            }]
        );
        // Senders do not hear themselves
        assert!(drain(&mut guest_rx).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let hub = MemoryHub::new();
        let (guest, _rx) = hub.endpoint("guest");
        assert!(matches!(
            guest.connect(Some("3467-ABCD".to_string())).await,
            Err(TransportError::SessionNotFound(_))
        ));
        assert!(matches!(
            guest.send(Vec::new()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_host_leaving_closes_session() {
        let hub = MemoryHub::new();
        let (host, mut host_rx) = hub.endpoint("host");
        let (guest, mut guest_rx) = hub.endpoint("guest");

        host.connect(None).await.unwrap();
        let code = session_code(&drain(&mut host_rx));
        guest.connect(Some(code.clone())).await.unwrap();
        drain(&mut guest_rx);

        host.disconnect().await.unwrap();
        assert_eq!(
            drain(&mut guest_rx),
            vec![
                TransportEvent::SessionChanged(None),
                TransportEvent::PeersChanged(BTreeSet::new()),
            ]
        );
        assert!(hub.members(&code).is_none());
        assert!(matches!(
            guest.send(Vec::new()),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_guest_leaving_updates_peers() {
        let hub = MemoryHub::new();
        let (host, mut host_rx) = hub.endpoint("host");
        let (guest, _guest_rx) = hub.endpoint("guest");

        host.connect(None).await.unwrap();
        let code = session_code(&drain(&mut host_rx));
        guest.connect(Some(code.clone())).await.unwrap();
        drain(&mut host_rx);

        guest.disconnect().await.unwrap();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::PeersChanged(BTreeSet::new())]
        );
        assert_eq!(hub.members(&code), Some(BTreeSet::from(["host".to_string()])));
    }
}
