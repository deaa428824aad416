//! Wire frame wrapping every protocol message.

use serde::{Deserialize, Serialize};

use crate::algorithm::PsiPayload;
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use crate::types::{ParticipantId, SessionId};

/// Current wire format version.
pub const WIRE_VERSION: u16 = 1;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub session: SessionId,

    /// Attempt number; frames from other attempts are ignored.
    #[serde(default)]
    pub attempt: u32,

    pub sender: ParticipantId,
    pub round: u32,
    pub body: FrameBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameBody {
    Payload(PsiPayload),

    /// The sender gave up on the session.
    Abort { reason: String },
}

impl Envelope {
    pub fn payload(
        session: SessionId,
        attempt: u32,
        sender: ParticipantId,
        round: u32,
        payload: PsiPayload,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            session,
            attempt,
            sender,
            round,
            body: FrameBody::Payload(payload),
        }
    }

    pub fn abort(
        session: SessionId,
        attempt: u32,
        sender: ParticipantId,
        round: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            session,
            attempt,
            sender,
            round,
            body: FrameBody::Abort {
                reason: reason.into(),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        to_cbor(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SerializationError> {
        let envelope: Envelope = from_cbor(bytes)?;
        if envelope.version != WIRE_VERSION {
            return Err(SerializationError::Decode(format!(
                "unsupported wire version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
