//! Control frames: everything on the wire that is not a packet.
//!
//! Externally tagged JSON objects with a single key:
//!
//! ```json
//! {"signature": {"mode": "dorian", "key": "G", "attunement": "ψ", "role": "healer", "intent": "resonate"}}
//! {"decline": {"reason": "decode", "message": "..."}}
//! {"transmutation": {"action": "redirect", "message": "..."}}
//! {"admission": {"score": 0.21, "recommendations": ["..."]}}
//! ```
//!
//! Only `signature` is acted on. The other three are responses and are
//! never answered, so two nodes can't bounce declines off each other.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::security::Transmutation;
use crate::signature::IdentitySignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// Bytes that were neither a packet nor a control frame.
    Unrecognized,
    /// JSON claiming to be a packet that failed to decode.
    Decode,
    /// A signature frame with missing or malformed fields.
    Validation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFrame {
    /// Signature announcement. Left unparsed so validation can report
    /// every bad field at once.
    Signature(serde_json::Value),
    /// Soft decline: the connection stays open.
    Decline {
        reason: DeclineReason,
        message: String,
    },
    /// Security gate response to a blocked packet.
    Transmutation(Transmutation),
    /// Coherence too low; how to do better.
    Admission {
        score: f64,
        recommendations: Vec<String>,
    },
}

impl ControlFrame {
    pub fn signature(signature: &IdentitySignature) -> Result<Self, ProtocolError> {
        Ok(ControlFrame::Signature(serde_json::to_value(signature)?))
    }

    pub fn decline(reason: DeclineReason, message: impl Into<String>) -> Self {
        ControlFrame::Decline {
            reason,
            message: message.into(),
        }
    }

    /// Interpret an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Whether this frame is a response to something we sent.
    pub fn is_response(&self) -> bool {
        !matches!(self, ControlFrame::Signature(_))
    }
}
