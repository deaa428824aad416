//! Session coordinator: drives one PSI run for one participant.
//!
//! # Flow
//!
//! ```text
//! initialize   load items, build one algorithm instance per peer
//! exchange     propose → round 0 .. round n-1 → finalize_intersection
//! persist      ResultStore::save(overwrite = true) with bounded retry
//! finalize     release key material and buffers; result stays readable
//! ```
//!
//! Within one session, round `k + 1` frames are buffered until round `k` has
//! a message from every peer. Frames are deduplicated by (round, sender), and
//! frames from another session, another attempt or an unknown sender are
//! dropped. Each round has a deadline; missing it fails the session with a
//! retryable [`PsiError::PeerTimeout`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry::{retry_until_cancelled, RetryPolicy};
use super::state::SessionPhase;
use crate::algorithm::{new_algorithm, AlgorithmConfig, AlgorithmKind, PsiAlgorithm, PsiPayload};
use crate::error::{PsiError, PsiResult};
use crate::source::ItemSource;
use crate::store::{ResultStore, StoreError};
use crate::transport::{Envelope, FrameBody, PsiTransport};
use crate::types::{IntersectionResult, ParticipantId, PrivateSet, SessionId};

/// Default per-round deadline.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Static parameters of one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session: SessionId,
    pub peers: Vec<ParticipantId>,
    pub algorithm: AlgorithmConfig,
    pub round_timeout: Duration,

    /// Persistence retry policy.
    pub retry: RetryPolicy,

    /// Bumped by the job runtime when a session is re-initiated after a
    /// timeout; frames tagged with another attempt are ignored.
    pub attempt: u32,
}

impl SessionSettings {
    pub fn new(session: SessionId, peers: Vec<ParticipantId>) -> Self {
        Self {
            session,
            peers,
            algorithm: AlgorithmConfig::default(),
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            retry: RetryPolicy::default(),
            attempt: 0,
        }
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmConfig) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    fn validate(&self, local: &ParticipantId) -> PsiResult<()> {
        if self.round_timeout.is_zero() {
            return Err(PsiError::Config("round timeout must be positive".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if peer == local {
                return Err(PsiError::Config(format!(
                    "participant {} listed as its own peer",
                    peer
                )));
            }
            if !seen.insert(peer) {
                return Err(PsiError::Config(format!("duplicate peer {}", peer)));
            }
        }
        Ok(())
    }
}

/// Pairwise protocol state with one peer.
struct PeerExchange {
    algorithm: Box<dyn PsiAlgorithm>,

    /// Inbound payloads, indexed by round.
    inbound: Vec<PsiPayload>,
}

/// State of one PSI run, owned by its coordinator.
pub struct PsiSession {
    id: SessionId,
    local: ParticipantId,
    peers: Vec<ParticipantId>,
    algorithm: AlgorithmKind,
    attempt: u32,
    phase: SessionPhase,
    items: Option<PrivateSet>,
    exchanges: BTreeMap<ParticipantId, PeerExchange>,
    result: Option<IntersectionResult>,
    failure: Option<String>,
}

impl PsiSession {
    fn new(settings: &SessionSettings, local: ParticipantId) -> Self {
        let mut peers = settings.peers.clone();
        peers.sort();
        Self {
            id: settings.session.clone(),
            local,
            peers,
            algorithm: settings.algorithm.kind,
            attempt: settings.attempt,
            phase: SessionPhase::Created,
            items: None,
            exchanges: BTreeMap::new(),
            result: None,
            failure: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Peers in ascending order.
    pub fn peers(&self) -> &[ParticipantId] {
        &self.peers
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Diagnostic reason once the session has failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Number of local items, while they are still held.
    pub fn item_count(&self) -> Option<usize> {
        self.items.as_ref().map(PrivateSet::len)
    }

    /// Whether key material or buffered payloads are still held.
    pub fn holds_secrets(&self) -> bool {
        self.items.is_some() || !self.exchanges.is_empty()
    }

    fn release(&mut self) {
        for exchange in self.exchanges.values_mut() {
            exchange.algorithm.release();
        }
        self.exchanges.clear();
        self.items = None;
    }
}

impl fmt::Debug for PsiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsiSession")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("peers", &self.peers)
            .field("algorithm", &self.algorithm)
            .field("attempt", &self.attempt)
            .field("phase", &self.phase)
            .field("items", &self.item_count())
            .field("result", &self.result.as_ref().map(IntersectionResult::len))
            .field("failure", &self.failure)
            .finish()
    }
}

/// Cancels a running session from another task.
#[derive(Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl AbortHandle {
    fn new() -> (Self, watch::Receiver<Option<String>>) {
        let (sender, receiver) = watch::channel(None);
        (
            Self {
                sender: Arc::new(sender),
            },
            receiver,
        )
    }

    /// Request cancellation. The coordinator fails the session at its next
    /// suspension point.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_modify(|current| {
            if current.is_none() {
                *current = Some(reason);
            }
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

/// Resolves once an abort has been requested on `rx`.
async fn abort_requested(mut rx: watch::Receiver<Option<String>>) {
    loop {
        if rx.borrow_and_update().is_some() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped: no abort can arrive any more
            std::future::pending::<()>().await;
        }
    }
}

/// Drives one [`PsiSession`] through its phases.
pub struct SessionCoordinator {
    settings: SessionSettings,
    transport: Arc<dyn PsiTransport>,
    source: Arc<dyn ItemSource>,
    store: Arc<dyn ResultStore>,
    session: PsiSession,

    /// Frames that arrived ahead of the current round.
    pending: BTreeMap<u32, HashMap<ParticipantId, PsiPayload>>,

    abort_handle: AbortHandle,
    abort_rx: watch::Receiver<Option<String>>,
}

impl SessionCoordinator {
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn PsiTransport>,
        source: Arc<dyn ItemSource>,
        store: Arc<dyn ResultStore>,
    ) -> PsiResult<Self> {
        let local = transport.local_id().clone();
        settings.validate(&local)?;

        let session = PsiSession::new(&settings, local);
        let (abort_handle, abort_rx) = AbortHandle::new();
        Ok(Self {
            settings,
            transport,
            source,
            store,
            session,
            pending: BTreeMap::new(),
            abort_handle,
            abort_rx,
        })
    }

    pub fn session(&self) -> &PsiSession {
        &self.session
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// The intersection, once persisted. `None` before that and after a
    /// failure.
    pub fn get_intersection(&self) -> Option<&IntersectionResult> {
        if self.session.phase.has_result() {
            self.session.result.as_ref()
        } else {
            None
        }
    }

    /// `Created → ItemsLoaded`: load local items and key the per-peer
    /// algorithm instances.
    pub async fn initialize(&mut self) -> PsiResult<()> {
        self.check_transition(SessionPhase::ItemsLoaded)?;

        let loaded = match self.source.load_items().await {
            Ok(items) => items,
            Err(err) => return Err(self.fail(err.into()).await),
        };
        let items: PrivateSet = loaded.into_iter().collect();

        let peers = self.session.peers.clone();
        for peer in peers {
            let algorithm = match new_algorithm(&self.settings.algorithm) {
                Ok(algorithm) => algorithm,
                Err(err) => return Err(self.fail(err.into()).await),
            };
            self.session.exchanges.insert(
                peer,
                PeerExchange {
                    algorithm,
                    inbound: Vec::new(),
                },
            );
        }

        info!(
            session = %self.session.id,
            participant = %self.session.local,
            peers = self.session.peers.len(),
            items = items.len(),
            algorithm = %self.session.algorithm,
            "session initialized"
        );
        self.session.items = Some(items);
        self.transition(SessionPhase::ItemsLoaded)
    }

    /// `ItemsLoaded → Exchanging → Computed`: run every round with every peer
    /// and assemble the global intersection.
    pub async fn exchange(&mut self) -> PsiResult<&IntersectionResult> {
        self.check_transition(SessionPhase::Exchanging)?;

        if let Err(err) = self.run_rounds().await {
            return Err(self.fail(err).await);
        }
        match self.session.result.as_ref() {
            Some(result) => Ok(result),
            None => Err(PsiError::CryptoVerification(
                "exchange produced no result".to_string(),
            )),
        }
    }

    async fn run_rounds(&mut self) -> PsiResult<()> {
        self.transition(SessionPhase::Exchanging)?;

        let rounds = self
            .session
            .exchanges
            .values()
            .map(|e| e.algorithm.rounds())
            .max()
            .unwrap_or(0);

        let items = self
            .session
            .items
            .as_ref()
            .ok_or_else(|| PsiError::CryptoVerification("local items released".to_string()))?;
        let mut opening = Vec::with_capacity(self.session.exchanges.len());
        for (peer, exchange) in self.session.exchanges.iter_mut() {
            opening.push((peer.clone(), exchange.algorithm.propose(items)?));
        }
        for (peer, payload) in opening {
            self.send_payload(&peer, 0, payload).await?;
        }

        for round in 0..rounds {
            let mut inbound = self.collect_round(round, rounds).await?;
            debug!(session = %self.session.id, round, "round complete");

            let mut replies = Vec::new();
            for (peer, exchange) in self.session.exchanges.iter_mut() {
                let payload = inbound.remove(peer).ok_or_else(|| {
                    PsiError::CryptoVerification(format!("no round {} payload from {}", round, peer))
                })?;
                if let Some(reply) = exchange.algorithm.respond(round, &payload)? {
                    replies.push((peer.clone(), reply));
                }
                exchange.inbound.push(payload);
            }
            for (peer, reply) in replies {
                self.send_payload(&peer, round + 1, reply).await?;
            }
            if round + 1 < rounds {
                self.transition(SessionPhase::Exchanging)?;
            }
        }

        let items = self
            .session
            .items
            .as_ref()
            .ok_or_else(|| PsiError::CryptoVerification("local items released".to_string()))?;
        let mut global: Option<IntersectionResult> = None;
        for (peer, exchange) in self.session.exchanges.iter_mut() {
            let pairwise = exchange.algorithm.finalize_intersection(&exchange.inbound)?;
            debug!(
                session = %self.session.id,
                peer = %peer,
                matched = pairwise.len(),
                "pairwise intersection computed"
            );
            match global.as_mut() {
                Some(acc) => acc.retain_common(&pairwise),
                None => global = Some(pairwise),
            }
        }
        let result = global.unwrap_or_else(|| IntersectionResult::from(items));

        if !result.is_subset_of(items) {
            return Err(PsiError::CryptoVerification(
                "intersection contains foreign identifiers".to_string(),
            ));
        }

        info!(
            session = %self.session.id,
            participant = %self.session.local,
            matched = result.len(),
            "intersection computed"
        );
        self.session.result = Some(result);
        self.pending.clear();
        self.transition(SessionPhase::Computed)
    }

    /// Wait until every peer delivered its payload for `round`.
    ///
    /// Frames for later rounds below `rounds` are buffered; anything beyond
    /// the protocol's last round is dropped.
    async fn collect_round(
        &mut self,
        round: u32,
        rounds: u32,
    ) -> PsiResult<HashMap<ParticipantId, PsiPayload>> {
        let deadline = Instant::now() + self.settings.round_timeout;
        let mut received = self.pending.remove(&round).unwrap_or_default();
        let expected = self.session.peers.len();

        while received.len() < expected {
            let requested = self.abort_rx.borrow_and_update().clone();
            if let Some(reason) = requested {
                return Err(PsiError::Aborted(reason));
            }

            let frame = tokio::select! {
                _ = self.abort_rx.changed() => continue,
                outcome = tokio::time::timeout_at(deadline, self.transport.recv(&self.session.id)) => {
                    match outcome {
                        Ok(frame) => frame?,
                        Err(_) => {
                            let missing = self
                                .session
                                .peers
                                .iter()
                                .filter(|p| !received.contains_key(*p))
                                .cloned()
                                .collect();
                            return Err(PsiError::PeerTimeout { round, missing });
                        }
                    }
                }
            };

            let envelope = Envelope::decode(&frame)?;
            if envelope.session != self.session.id {
                debug!(session = %self.session.id, foreign = %envelope.session, "dropping frame for another session");
                continue;
            }
            if envelope.attempt != self.session.attempt {
                debug!(
                    session = %self.session.id,
                    attempt = envelope.attempt,
                    current = self.session.attempt,
                    "dropping frame from another attempt"
                );
                continue;
            }
            if !self.session.exchanges.contains_key(&envelope.sender) {
                warn!(session = %self.session.id, sender = %envelope.sender, "dropping frame from unknown sender");
                continue;
            }

            match envelope.body {
                FrameBody::Abort { reason } => {
                    return Err(PsiError::PeerAborted {
                        peer: envelope.sender,
                        reason,
                    });
                }
                FrameBody::Payload(payload) => {
                    if envelope.round < round {
                        debug!(session = %self.session.id, peer = %envelope.sender, round = envelope.round, "dropping late frame");
                    } else if envelope.round == round {
                        if received.contains_key(&envelope.sender) {
                            debug!(session = %self.session.id, peer = %envelope.sender, round, "dropping duplicate frame");
                        } else {
                            received.insert(envelope.sender, payload);
                        }
                    } else if envelope.round >= rounds {
                        warn!(
                            session = %self.session.id,
                            peer = %envelope.sender,
                            round = envelope.round,
                            rounds,
                            "dropping frame beyond last round"
                        );
                    } else {
                        self.pending
                            .entry(envelope.round)
                            .or_default()
                            .entry(envelope.sender)
                            .or_insert(payload);
                    }
                }
            }
        }

        Ok(received)
    }

    async fn send_payload(
        &self,
        peer: &ParticipantId,
        round: u32,
        payload: PsiPayload,
    ) -> PsiResult<()> {
        debug!(
            session = %self.session.id,
            peer = %peer,
            round,
            kind = payload.label(),
            values = payload.len(),
            "sending payload"
        );
        let frame = Envelope::payload(
            self.session.id.clone(),
            self.session.attempt,
            self.session.local.clone(),
            round,
            payload,
        )
        .encode()?;
        self.transport.send(&self.session.id, peer, frame).await?;
        Ok(())
    }

    /// `Computed → Persisted`: save with `overwrite = true`, retrying
    /// transient store errors.
    ///
    /// On failure the session stays `Computed` with its result in memory so
    /// that [`Self::retry_persist`] can try again.
    pub async fn persist(&mut self) -> PsiResult<()> {
        self.check_transition(SessionPhase::Persisted)?;
        let requested = self.abort_rx.borrow().clone();
        if let Some(reason) = requested {
            return Err(self.fail(PsiError::Aborted(reason)).await);
        }
        let result = self
            .session
            .result
            .as_ref()
            .ok_or_else(|| PsiError::CryptoVerification("no computed result".to_string()))?;

        let store = &self.store;
        let session = &self.session.id;
        let saved = retry_until_cancelled(
            || store.save(session, result, true),
            &self.settings.retry,
            StoreError::is_retryable,
            abort_requested(self.abort_rx.clone()),
        )
        .await;

        match saved {
            None => {
                let requested = self.abort_rx.borrow().clone();
                let reason = requested.unwrap_or_else(|| "aborted during persistence".to_string());
                Err(self.fail(PsiError::Aborted(reason)).await)
            }
            Some(Ok(())) => {
                info!(session = %self.session.id, items = result.len(), "intersection persisted");
                self.transition(SessionPhase::Persisted)
            }
            Some(Err(err)) => {
                warn!(
                    session = %self.session.id,
                    error = %err,
                    "persistence failed; result kept in memory"
                );
                Err(PsiError::Persistence(err))
            }
        }
    }

    /// Retry persistence alone after [`PsiError::Persistence`].
    pub async fn retry_persist(&mut self) -> PsiResult<()> {
        info!(session = %self.session.id, phase = %self.session.phase, "retrying persistence");
        self.persist().await
    }

    /// Drive the session from its current phase to `Persisted`.
    pub async fn run(&mut self) -> PsiResult<IntersectionResult> {
        if self.session.phase == SessionPhase::Created {
            self.initialize().await?;
        }
        if self.session.phase == SessionPhase::ItemsLoaded {
            self.exchange().await?;
        }
        if self.session.phase == SessionPhase::Computed {
            self.persist().await?;
        }
        match self.get_intersection() {
            Some(result) => Ok(result.clone()),
            None => Err(PsiError::InvalidTransition {
                from: self.session.phase,
                to: SessionPhase::Persisted,
            }),
        }
    }

    /// Fail the session immediately, discarding key material and any
    /// unpersisted result. No-op once terminal.
    pub async fn abort(&mut self, reason: impl Into<String>) {
        if self.session.phase.is_terminal() {
            return;
        }
        let reason = reason.into();
        self.abort_handle.abort(reason.clone());
        self.fail(PsiError::Aborted(reason)).await;
    }

    /// Release key material and buffered messages.
    ///
    /// `Persisted → Finalized`. Finalizing an incomplete session fails it.
    /// Safe to call more than once.
    pub async fn finalize(&mut self) -> PsiResult<()> {
        match self.session.phase {
            SessionPhase::Finalized | SessionPhase::Failed => {
                self.release();
                Ok(())
            }
            SessionPhase::Persisted => {
                self.release();
                self.transition(SessionPhase::Finalized)?;
                info!(session = %self.session.id, "session finalized");
                Ok(())
            }
            phase => {
                warn!(session = %self.session.id, phase = %phase, "finalizing incomplete session");
                self.fail(PsiError::Aborted(format!("finalized during {}", phase)))
                    .await;
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        self.session.release();
        self.pending.clear();
    }

    fn check_transition(&self, next: SessionPhase) -> PsiResult<()> {
        let from = self.session.phase;
        if from.can_transition_to(next) {
            Ok(())
        } else {
            Err(PsiError::InvalidTransition { from, to: next })
        }
    }

    fn transition(&mut self, next: SessionPhase) -> PsiResult<()> {
        self.check_transition(next)?;
        debug!(
            session = %self.session.id,
            from = %self.session.phase,
            to = %next,
            "phase transition"
        );
        self.session.phase = next;
        Ok(())
    }

    /// Move to `Failed`, drop secrets and any unpersisted result, and tell
    /// peers (best effort).
    async fn fail(&mut self, err: PsiError) -> PsiError {
        if self.session.phase.is_terminal() {
            return err;
        }
        let reason = err.to_string();
        warn!(
            session = %self.session.id,
            phase = %self.session.phase,
            retryable = err.is_retryable(),
            error = %reason,
            "session failed"
        );

        let round = self.pending.keys().next().copied().unwrap_or(0);
        self.session.phase = SessionPhase::Failed;
        self.session.failure = Some(reason.clone());
        self.session.result = None;
        self.release();

        let skip = match &err {
            PsiError::PeerAborted { peer, .. } => Some(peer.clone()),
            _ => None,
        };
        for peer in &self.session.peers {
            if Some(peer) == skip.as_ref() {
                continue;
            }
            let frame = Envelope::abort(
                self.session.id.clone(),
                self.session.attempt,
                self.session.local.clone(),
                round,
                reason.clone(),
            )
            .encode();
            let sent = match frame {
                Ok(frame) => self
                    .transport
                    .send(&self.session.id, peer, frame)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = sent {
                debug!(session = %self.session.id, peer = %peer, error = %e, "abort notice not delivered");
            }
        }
        err
    }
}
