//! fedpsi - Private Set Intersection for federated jobs
//!
//! Lets two or more participants, each holding a private list of
//! identifiers, learn only the identifiers they all share.
//!
//! Key principles:
//! - Cleartext identifiers never leave their owner; only masked group
//!   elements cross the wire
//! - Fresh key material per session and per peer, wiped at finalize
//! - Session phases only move forward; failure is terminal
//! - An empty intersection is a successful result, not an error
//!
//! Layering (leaf to root): [`crypto`] → [`algorithm`] → [`session`] →
//! [`store`] → [`lifecycle`].

pub mod algorithm;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod serialization;
pub mod session;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;

pub use algorithm::{AlgorithmConfig, AlgorithmKind, PsiAlgorithm, PsiPayload};
pub use error::{PsiError, PsiResult};
pub use lifecycle::{ComponentBindings, ComponentRegistry, PsiLifecycle};
pub use session::{SessionCoordinator, SessionPhase, SessionSettings};
pub use types::{Identifier, IntersectionResult, ParticipantId, PrivateSet, SessionId};
