//! In-process message hub.
//!
//! Stands in for the federated job runtime when every participant runs in
//! the same process (the `fedpsi run` simulation and tests). Each
//! (session, participant) pair gets its own unbounded mailbox, so concurrent
//! sessions never see each other's frames.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::traits::{PsiTransport, TransportError, TransportResult};
use crate::types::{ParticipantId, SessionId};

type Inbox = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

struct Mailbox {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Inbox,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }
}

/// A frame observed by the hub, kept for inspection.
#[derive(Debug, Clone)]
pub struct DeliveredFrame {
    pub session: SessionId,
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct HubState {
    participants: HashSet<ParticipantId>,
    mailboxes: HashMap<(SessionId, ParticipantId), Mailbox>,
    delivered: Vec<DeliveredFrame>,
    recording: bool,
    duplicate_delivery: bool,
    offline: HashSet<ParticipantId>,
}

impl HubState {
    fn mailbox(&mut self, session: &SessionId, participant: &ParticipantId) -> &Mailbox {
        self.mailboxes
            .entry((session.clone(), participant.clone()))
            .or_insert_with(Mailbox::new)
    }
}

/// Shared in-memory router connecting [`InMemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a participant and return its endpoint.
    pub fn endpoint(&self, participant: impl Into<ParticipantId>) -> InMemoryTransport {
        let id = participant.into();
        self.state().participants.insert(id.clone());
        InMemoryTransport {
            hub: self.clone(),
            local: id,
        }
    }

    /// Keep a copy of every frame sent from now on, for [`Self::delivered`].
    pub fn set_recording(&self, enabled: bool) {
        self.state().recording = enabled;
    }

    /// Deliver every frame twice (simulates at-least-once delivery).
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.state().duplicate_delivery = enabled;
    }

    /// Silently drop frames addressed to `participant`.
    pub fn set_offline(&self, participant: &ParticipantId, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline.insert(participant.clone());
        } else {
            state.offline.remove(participant);
        }
    }

    /// Push raw bytes into a participant's mailbox.
    pub fn inject(&self, session: &SessionId, to: &ParticipantId, frame: Vec<u8>) {
        let mut state = self.state();
        let _ = state.mailbox(session, to).sender.send(frame);
    }

    /// Frames sent through the hub while recording was enabled.
    pub fn delivered(&self) -> Vec<DeliveredFrame> {
        self.state().delivered.clone()
    }
}

/// One participant's view of an [`InMemoryHub`].
#[derive(Clone)]
pub struct InMemoryTransport {
    hub: InMemoryHub,
    local: ParticipantId,
}

#[async_trait]
impl PsiTransport for InMemoryTransport {
    fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    async fn send(
        &self,
        session: &SessionId,
        to: &ParticipantId,
        frame: Vec<u8>,
    ) -> TransportResult<()> {
        let mut state = self.hub.state();
        if !state.participants.contains(to) {
            return Err(TransportError::UnknownPeer(to.clone()));
        }

        if state.recording {
            state.delivered.push(DeliveredFrame {
                session: session.clone(),
                from: self.local.clone(),
                to: to.clone(),
                bytes: frame.clone(),
            });
        }
        if state.offline.contains(to) {
            return Ok(());
        }

        let copies = if state.duplicate_delivery { 2 } else { 1 };
        let sender = state.mailbox(session, to).sender.clone();
        for _ in 0..copies {
            sender
                .send(frame.clone())
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn recv(&self, session: &SessionId) -> TransportResult<Vec<u8>> {
        let inbox = {
            let mut state = self.hub.state();
            state.mailbox(session, &self.local).receiver.clone()
        };

        let mut receiver = inbox.lock().await;
        receiver.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> SessionId {
        SessionId::from("job-1")
    }

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let hub = InMemoryHub::new();
        hub.set_recording(true);
        let a = hub.endpoint("site-1");
        let b = hub.endpoint("site-2");

        a.send(&session(), b.local_id(), vec![1, 2, 3]).await.unwrap();
        assert_eq!(b.recv(&session()).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(hub.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_frames_not_recorded_by_default() {
        let hub = InMemoryHub::new();
        let a = hub.endpoint("site-1");
        let b = hub.endpoint("site-2");

        a.send(&session(), b.local_id(), vec![1]).await.unwrap();
        assert!(hub.delivered().is_empty());

        hub.set_recording(true);
        a.send(&session(), b.local_id(), vec![2]).await.unwrap();
        hub.set_recording(false);
        a.send(&session(), b.local_id(), vec![3]).await.unwrap();

        let delivered = hub.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].bytes, vec![2]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let hub = InMemoryHub::new();
        let a = hub.endpoint("site-1");
        let b = hub.endpoint("site-2");
        let other = SessionId::from("job-2");

        a.send(&other, b.local_id(), vec![9]).await.unwrap();
        a.send(&session(), b.local_id(), vec![1]).await.unwrap();

        assert_eq!(b.recv(&session()).await.unwrap(), vec![1]);
        assert_eq!(b.recv(&other).await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_unknown_peer_rejected() {
        let hub = InMemoryHub::new();
        let a = hub.endpoint("site-1");

        let result = a.send(&session(), &ParticipantId::from("ghost"), vec![]).await;
        assert_eq!(
            result,
            Err(TransportError::UnknownPeer(ParticipantId::from("ghost")))
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery() {
        let hub = InMemoryHub::new();
        hub.set_duplicate_delivery(true);
        let a = hub.endpoint("site-1");
        let b = hub.endpoint("site-2");

        a.send(&session(), b.local_id(), vec![7]).await.unwrap();
        assert_eq!(b.recv(&session()).await.unwrap(), vec![7]);
        assert_eq!(b.recv(&session()).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_offline_peer_drops_frames() {
        let hub = InMemoryHub::new();
        let a = hub.endpoint("site-1");
        let b = hub.endpoint("site-2");
        hub.set_offline(b.local_id(), true);

        a.send(&session(), b.local_id(), vec![1]).await.unwrap();
        let received = tokio::time::timeout(Duration::from_millis(50), b.recv(&session())).await;
        assert!(received.is_err(), "offline peer must not receive frames");
    }
}
