use lumen_transport::ConnectionId;

use crate::presence::ConnectionState;
use crate::security::TransmutationAction;

/// Protocol-level errors for Lumen.
///
/// Every variant is scoped to one packet or one connection; none of them
/// is a reason to stop the runtime.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] lumen_transport::TransportError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid signature: missing or malformed {}", fields.join(", "))]
    Validation { fields: Vec<String> },

    #[error("admission rejected: coherence {score:.3} below threshold")]
    AdmissionRejected {
        score: f64,
        recommendations: Vec<String>,
    },

    #[error("security blocked ({action}): {message}")]
    SecurityBlocked {
        action: TransmutationAction,
        message: String,
    },

    #[error("invalid transition from {from} on {event}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },

    #[error("unknown or closed connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("runtime shut down")]
    RuntimeShutdown,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_validation_lists_fields() {
        let err = ProtocolError::Validation {
            fields: vec!["mode".into(), "key".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid signature: missing or malformed mode, key"
        );
    }

    #[test]
    fn display_admission_rejected() {
        let err = ProtocolError::AdmissionRejected {
            score: 0.1234,
            recommendations: vec![],
        };
        assert_eq!(
            err.to_string(),
            "admission rejected: coherence 0.123 below threshold"
        );
    }

    #[test]
    fn display_security_blocked() {
        let err = ProtocolError::SecurityBlocked {
            action: TransmutationAction::TransmuteWithLove,
            message: "held".into(),
        };
        assert_eq!(err.to_string(), "security blocked (transmute_with_love): held");
    }

    #[test]
    fn display_invalid_transition() {
        let err = ProtocolError::InvalidTransition {
            from: ConnectionState::Closed,
            event: "observe",
        };
        assert_eq!(err.to_string(), "invalid transition from closed on observe");
    }

    #[test]
    fn display_unknown_connection() {
        let err = ProtocolError::UnknownConnection(ConnectionId::new(9));
        assert_eq!(err.to_string(), "unknown or closed connection: conn-9");
    }
}
