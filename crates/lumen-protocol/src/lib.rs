//! Lumen protocol layer.
//!
//! Nine-layer packets, identity signatures and their resonance, coherence
//! scoring, a security gate, per-connection presence, a shared field and
//! an intention router, driven by a runtime on top of `lumen-transport`.
//!
//! Wire format: JSON, one packet or control frame per transport frame.

pub mod coherence;
pub mod control;
pub mod entropy;
pub mod error;
pub mod events;
pub mod field;
pub mod packet;
pub mod presence;
pub mod resonance;
pub mod router;
pub mod runtime;
pub mod security;
pub mod signature;
pub mod tracker;
pub mod types;

pub use coherence::{CoherenceConfig, CoherenceEngine, CoherenceReport};
pub use control::{ControlFrame, DeclineReason};
pub use entropy::{EntropySource, OsEntropy, SeededEntropy};
pub use error::ProtocolError;
pub use events::{EventBus, LifecycleEvent, Rejection, Subscription};
pub use field::{FieldAdjustment, FieldAggregator, FieldConfig, FieldState};
pub use packet::{
    decode, encode, AckType, Decoded, Packet, PacketBuilder, PresenceQuality, Target,
    TimingWindow,
};
pub use presence::{
    Connection, ConnectionRegistry, ConnectionState, PresenceConfig, PresenceTransition,
};
pub use resonance::{rank_peers, resonance};
pub use router::{Dispatch, DispatchContext, IntentionHandler, IntentionRouter};
pub use runtime::{
    ProtocolRuntime, RuntimeChannels, RuntimeConfig, RuntimeHandle, RuntimeState, RuntimeStats,
};
pub use security::{
    SecurityConfig, SecurityContext, SecurityGate, SecurityVerdict, Transmutation,
    TransmutationAction,
};
pub use signature::{Attunement, IdentitySignature, Key, Mode};
pub use tracker::AckTracker;
pub use types::now_ms;
