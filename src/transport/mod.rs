//! Messaging collaborator seam.
//!
//! - [`PsiTransport`]: point-to-point frames keyed by session and participant
//! - [`Envelope`]: CBOR wire frame carrying round, sender and payload
//! - [`InMemoryHub`]: in-process router for simulations and tests

pub mod envelope;
pub mod memory;
pub mod traits;

pub use envelope::{Envelope, FrameBody, WIRE_VERSION};
pub use memory::{DeliveredFrame, InMemoryHub, InMemoryTransport};
pub use traits::{PsiTransport, TransportError, TransportResult};
