//! Presence protocol: per-peer connection state and its arena.
//!
//! ```text
//! Connecting ──handshake──▶ Negotiating ──admitted + resonant──▶ Established
//!                                                             │   ▲
//!                                       sustained low / fault │   │ passing packet
//!                                                             ▼   │
//!                                                            Degraded
//! any ──disconnect / shutdown / decay timeout──▶ Closed (terminal)
//! ```

mod connection;
mod registry;

pub use connection::{Connection, ConnectionState, PresenceConfig, PresenceTransition};
pub use registry::ConnectionRegistry;
