//! Intention router: maps an admitted packet's purpose to a handler.
//!
//! Handlers are pure. They look at the packet and the local context and
//! return a [`Dispatch`] saying what to do: answer the sender, relay to
//! the other established peers, nudge the field. The runtime carries it
//! out.

use std::collections::HashMap;
use std::fmt;

use lumen_transport::ConnectionId;
use serde_json::json;

use crate::field::FieldState;
use crate::packet::{AckType, Packet, PacketBuilder};
use crate::presence::ConnectionRegistry;
use crate::signature::IdentitySignature;

/// Field boost applied for a shared celebration, in coherence points.
pub const CELEBRATION_BOOST: f64 = 5.0;

/// What a handler sees besides the packet.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub from: ConnectionId,
    /// This node's identifier, used as reply creator.
    pub local_id: &'a str,
    pub local_signature: &'a IdentitySignature,
    pub peer: Option<&'a IdentitySignature>,
    pub field: &'a FieldState,
}

impl DispatchContext<'_> {
    /// Start a reply to `packet` carrying this node's field.
    pub fn reply(&self, packet: &Packet, purpose: &str) -> PacketBuilder {
        let mut builder = PacketBuilder::new(purpose)
            .creator(self.local_id)
            .coherence(self.field.coherence / 100.0)
            .in_reply_to(packet.id());
        if !packet.origin.context.creator.is_empty() {
            builder = builder.to_peer(packet.origin.context.creator.clone());
        }
        builder
    }
}

/// A handler's decision.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    /// Packet to send back to the sender.
    pub reply: Option<PacketBuilder>,
    /// Relay the packet to every other established peer.
    pub broadcast: bool,
    /// Shift the field coherence by this many points.
    pub field_boost: Option<f64>,
}

impl Dispatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(builder: PacketBuilder) -> Self {
        Self {
            reply: Some(builder),
            ..Self::default()
        }
    }

    pub fn relay() -> Self {
        Self {
            broadcast: true,
            ..Self::default()
        }
    }
}

pub trait IntentionHandler: Send + Sync {
    fn handle(&self, packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch;
}

impl<F> IntentionHandler for F
where
    F: Fn(&Packet, &DispatchContext<'_>) -> Dispatch + Send + Sync,
{
    fn handle(&self, packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
        self(packet, ctx)
    }
}

/// Purpose tag → handler table with a presence fallback.
pub struct IntentionRouter {
    handlers: HashMap<String, Box<dyn IntentionHandler>>,
    fallback: Box<dyn IntentionHandler>,
}

impl IntentionRouter {
    /// No registered intentions; everything goes to the presence fallback.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Box::new(presence),
        }
    }

    /// The standard intentions.
    pub fn with_defaults() -> Self {
        let mut router = Self::new();
        router.register("share_presence", share_presence);
        router.register("offer_healing", offer_healing);
        router.register("seek_wisdom", seek_wisdom);
        router.register("celebrate_together", celebrate_together);
        router.register("request_consent", request_consent);
        router.register("establish_presence", establish_presence);
        router
    }

    /// Register or replace the handler for `purpose`.
    pub fn register(&mut self, purpose: impl Into<String>, handler: impl IntentionHandler + 'static) {
        self.handlers.insert(purpose.into(), Box::new(handler));
    }

    pub fn is_registered(&self, purpose: &str) -> bool {
        self.handlers.contains_key(purpose)
    }

    /// Exact tag match, else the presence fallback.
    pub fn dispatch(&self, packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
        match self.handlers.get(packet.purpose()) {
            Some(handler) => handler.handle(packet, ctx),
            None => self.fallback.handle(packet, ctx),
        }
    }
}

impl Default for IntentionRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for IntentionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut purposes: Vec<_> = self.handlers.keys().collect();
        purposes.sort();
        f.debug_struct("IntentionRouter")
            .field("purposes", &purposes)
            .finish()
    }
}

/// Every Established connection except the sender, in id order.
pub fn broadcast_targets(
    registry: &ConnectionRegistry,
    sender: Option<ConnectionId>,
) -> Vec<ConnectionId> {
    registry.established_ids(sender)
}

// ── Default handlers ──────────────────────────────────────────────────

/// Answers only when the sender asked for an acknowledgment.
fn presence(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    match packet.resonance.ack {
        AckType::None => Dispatch::none(),
        AckType::Presence => Dispatch::reply(
            ctx.reply(packet, "acknowledge_presence")
                .content(json!({"received": packet.purpose()})),
        ),
        AckType::Gratitude => Dispatch::reply(
            ctx.reply(packet, "express_gratitude")
                .content(json!({"received": packet.purpose()})),
        ),
    }
}

fn share_presence(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    let mut dispatch = presence(packet, ctx);
    dispatch.broadcast = packet.is_broadcast();
    dispatch
}

fn offer_healing(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    Dispatch::reply(
        ctx.reply(packet, "express_gratitude")
            .content(json!({"gratitude": "healing received", "from": ctx.local_signature.role})),
    )
}

fn seek_wisdom(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    Dispatch::reply(ctx.reply(packet, "acknowledge_wisdom").content(json!({
        "acknowledged": packet.presence.content,
        "role": ctx.local_signature.role,
        "gifts": ctx.local_signature.gifts,
    })))
}

fn celebrate_together(packet: &Packet, _ctx: &DispatchContext<'_>) -> Dispatch {
    Dispatch {
        reply: None,
        broadcast: packet.is_broadcast(),
        field_boost: Some(CELEBRATION_BOOST),
    }
}

fn request_consent(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    Dispatch::reply(
        ctx.reply(packet, "grant_consent")
            .content(json!({"consent": true, "request": packet.presence.content})),
    )
}

fn establish_presence(packet: &Packet, ctx: &DispatchContext<'_>) -> Dispatch {
    let mut content = json!({"welcome": ctx.local_id, "field_coherence": ctx.field.coherence});
    if let Some(mode) = ctx.field.dominant_mode {
        content["dominant_mode"] = json!(mode);
    }
    Dispatch::reply(ctx.reply(packet, "welcome_presence").content(content))
}
