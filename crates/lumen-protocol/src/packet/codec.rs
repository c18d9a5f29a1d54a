//! JSON wire form for packets.
//!
//! Decoding never fails on foreign traffic: bytes that are not JSON, or
//! JSON without the packet layers, come back as [`Decoded::NotAPacket`] so
//! callers can fall back to other framing. Only JSON that claims to be a
//! packet (has `origin`, `field` and `covenant`) and is malformed is a
//! [`ProtocolError::Decode`].

use crate::error::ProtocolError;

use super::Packet;

/// Layers whose presence marks a JSON object as a packet.
const PACKET_MARKERS: [&str; 3] = ["origin", "field", "covenant"];

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Packet(Box<Packet>),
    /// Not a packet. Carries the parsed JSON when the bytes were JSON.
    NotAPacket(Option<serde_json::Value>),
}

/// Serialize a packet to its JSON wire form.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(packet)?)
}

/// Decode one frame.
pub fn decode(bytes: &[u8]) -> Result<Decoded, ProtocolError> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return Ok(Decoded::NotAPacket(None)),
    };

    let is_packet = value
        .as_object()
        .is_some_and(|obj| PACKET_MARKERS.iter().all(|k| obj.contains_key(*k)));
    if !is_packet {
        return Ok(Decoded::NotAPacket(Some(value)));
    }

    let mut packet: Packet =
        serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    packet.normalize();
    Ok(Decoded::Packet(Box::new(packet)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use crate::packet::{PacketBuilder, Target};
    use serde_json::json;

    fn sample() -> Packet {
        let mut p = PacketBuilder::new("celebrate_together")
            .creator("node-a")
            .content(json!({"text": "joy", "n": 3}))
            .coherence(0.83)
            .to_peer("node-b")
            .build_at(&mut SeededEntropy::new(11), 1_700_000_123_456);
        p.record_hop("relay-1", 0.81);
        p.record_hop("relay-2", 0.79);
        p
    }

    #[test]
    fn roundtrip_including_metadata() {
        let p = sample();
        let bytes = encode(&p).unwrap();
        match decode(&bytes).unwrap() {
            Decoded::Packet(back) => assert_eq!(*back, p),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn top_level_keys_are_the_nine_layers() {
        let value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "covenant", "embodiment", "field", "intention", "meaning", "metadata", "origin",
                "presence", "resonance"
            ]
        );
        assert!(value["resonance"]["sequence"].is_string());
        assert_eq!(value["intention"]["target"], json!({"kind": "peer", "id": "node-b"}));
    }

    #[test]
    fn noise_is_not_a_packet() {
        assert_eq!(decode(b"\x00\xffgarbage").unwrap(), Decoded::NotAPacket(None));
        assert_eq!(decode(b"").unwrap(), Decoded::NotAPacket(None));
    }

    #[test]
    fn other_json_is_not_a_packet() {
        match decode(br#"{"type":"chat","text":"hi"}"#).unwrap() {
            Decoded::NotAPacket(Some(v)) => assert_eq!(v["type"], "chat"),
            other => panic!("expected NotAPacket, got {other:?}"),
        }
        assert!(matches!(
            decode(b"[1,2,3]").unwrap(),
            Decoded::NotAPacket(Some(_))
        ));
        // Two of three markers is still not a packet
        assert!(matches!(
            decode(br#"{"origin":{},"field":{}}"#).unwrap(),
            Decoded::NotAPacket(Some(_))
        ));
    }

    #[test]
    fn malformed_packet_is_a_decode_error() {
        let bad = br#"{"origin":{},"field":{},"covenant":{}}"#;
        assert!(matches!(decode(bad), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn decode_clamps_out_of_range_scores() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["field"]["coherence"] = json!(4.2);
        value["presence"]["quality"]["warmth"] = json!(-1.0);
        let bytes = serde_json::to_vec(&value).unwrap();
        match decode(&bytes).unwrap() {
            Decoded::Packet(p) => {
                assert_eq!(p.field.coherence, 1.0);
                assert_eq!(p.presence.quality.warmth, 0.0);
            }
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_roundtrip() {
        let p = PacketBuilder::new("share_presence")
            .ttl(None)
            .build_at(&mut SeededEntropy::new(5), 9);
        assert_eq!(p.intention.target, Target::OpenField);
        let back = match decode(&encode(&p).unwrap()).unwrap() {
            Decoded::Packet(b) => *b,
            other => panic!("expected packet, got {other:?}"),
        };
        assert_eq!(back, p);
        assert_eq!(back.metadata.ttl, None);
    }
}
