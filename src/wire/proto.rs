//! Gossip message schemas and CBOR encoding.
//!
//! Envelope: `{ "v": u32, "type": text, "body": map }`. Bodies are maps
//! with string keys; unknown keys are skipped so older nodes tolerate
//! newer senders, and indefinite-length items are rejected outright.
//! Counters are unsigned on the wire - a negative generation or version
//! fails decoding, which is exactly the malformed-message path.

use std::collections::BTreeMap;
use std::convert::Infallible;

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::core::{ClusterId, Generation, NodeId, PeerAddr, Version, WallClock};
use crate::engine::digest::Digest;
use crate::engine::endpoint::{AppState, AppStateKey, EndpointState};
use crate::engine::heartbeat::HeartbeatSnapshot;

pub const PROTOCOL_VERSION_V1: u32 = 1;

/// Decode-side resource bounds. The frame cap bounds total bytes; these
/// bound element counts so a small frame cannot claim huge lists.
#[derive(Clone, Debug)]
pub struct WireLimits {
    pub max_digests: usize,
    pub max_endpoint_states: usize,
    pub max_app_states: usize,
    pub max_text_len: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_digests: 4096,
            max_endpoint_states: 4096,
            max_app_states: 256,
            max_text_len: 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipEnvelope {
    pub version: u32,
    pub message: GossipMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipMessage {
    Ping(HeartbeatPing),
    Pong(HeartbeatPong),
    Syn(DigestSyn),
    Ack(DigestAck),
    Ack2(DigestAck2),
}

/// Legacy liveness probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatPing {
    pub node_id: NodeId,
    pub generation: Generation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatPong {
    pub node_id: NodeId,
    pub timestamp: WallClock,
}

/// Phase 1: the initiator's digest summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestSyn {
    pub cluster_id: ClusterId,
    pub sender_address: PeerAddr,
    pub digests: Vec<Digest>,
}

/// Phase 2: states the receiver is ahead on, digests it is behind on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestAck {
    pub endpoint_states: Vec<EndpointStateWire>,
    pub request_digests: Vec<Digest>,
}

/// Phase 3: the states the receiver asked for. One-way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestAck2 {
    pub endpoint_states: Vec<EndpointStateWire>,
}

/// An endpoint state as it travels: no liveness flag - the receiver
/// derives its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointStateWire {
    pub node_id: NodeId,
    pub generation: Generation,
    pub heartbeat_version: Version,
    pub app_states: BTreeMap<AppStateKey, AppState>,
    pub update_timestamp: WallClock,
}

impl EndpointStateWire {
    pub fn from_state(node_id: &NodeId, state: &EndpointState) -> Self {
        Self {
            node_id: node_id.clone(),
            generation: state.generation(),
            heartbeat_version: state.heartbeat.version,
            app_states: state.app_states.clone(),
            update_timestamp: state.update_timestamp,
        }
    }

    /// Rebuild the endpoint aggregate on the receiving side. The entry
    /// arrives alive; the local merge path stamps its own timestamp.
    pub fn into_state(self) -> (NodeId, EndpointState) {
        let state = EndpointState {
            heartbeat: HeartbeatSnapshot {
                node_id: self.node_id.clone(),
                generation: self.generation,
                version: self.heartbeat_version,
            },
            app_states: self.app_states,
            is_alive: true,
            update_timestamp: self.update_timestamp,
        };
        (self.node_id, state)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MessageType {
    Ping,
    Pong,
    Syn,
    Ack,
    Ack2,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Syn => "SYN",
            MessageType::Ack => "ACK",
            MessageType::Ack2 => "ACK2",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PING" => Some(MessageType::Ping),
            "PONG" => Some(MessageType::Pong),
            "SYN" => Some(MessageType::Syn),
            "ACK" => Some(MessageType::Ack),
            "ACK2" => Some(MessageType::Ack2),
            _ => None,
        }
    }
}

impl GossipMessage {
    fn message_type(&self) -> MessageType {
        match self {
            GossipMessage::Ping(_) => MessageType::Ping,
            GossipMessage::Pong(_) => MessageType::Pong,
            GossipMessage::Syn(_) => MessageType::Syn,
            GossipMessage::Ack(_) => MessageType::Ack,
            GossipMessage::Ack2(_) => MessageType::Ack2,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoEncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<Infallible>),
}

#[derive(Debug, Error)]
pub enum ProtoDecodeError {
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("trailing bytes after message body")]
    TrailingBytes,
    #[error("{field} has too many elements: max {max} got {got}")]
    TooManyElements {
        field: &'static str,
        max: usize,
        got: usize,
    },
    #[error("text field exceeds {max} bytes")]
    TextTooLong { max: usize },
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

pub fn encode_envelope(envelope: &GossipEnvelope) -> Result<Vec<u8>, ProtoEncodeError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("v")?;
    enc.u32(envelope.version)?;
    enc.str("type")?;
    enc.str(envelope.message.message_type().as_str())?;
    enc.str("body")?;
    encode_message_body(&mut enc, &envelope.message)?;
    Ok(buf)
}

pub fn decode_envelope(
    bytes: &[u8],
    limits: &WireLimits,
) -> Result<GossipEnvelope, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let map_len = decode_map_len(&mut dec)?;

    let mut version = None;
    let mut message_type = None;
    let mut body_span = None;

    for _ in 0..map_len {
        let key = decode_text(&mut dec, limits)?;
        match key {
            "v" => version = Some(decode_u32(&mut dec, "v")?),
            "type" => {
                let raw = decode_text(&mut dec, limits)?;
                message_type = Some(
                    MessageType::parse(raw)
                        .ok_or_else(|| ProtoDecodeError::UnknownMessageType(raw.to_string()))?,
                );
            }
            "body" => {
                let start = dec.position();
                dec.skip()?;
                let end = dec.position();
                body_span = Some((start, end));
            }
            _ => skip_unknown(&mut dec)?,
        }
    }

    if dec.datatype().is_ok() {
        return Err(ProtoDecodeError::TrailingBytes);
    }

    let version = version.ok_or(ProtoDecodeError::MissingField("v"))?;
    let message_type = message_type.ok_or(ProtoDecodeError::MissingField("type"))?;
    let (start, end) = body_span.ok_or(ProtoDecodeError::MissingField("body"))?;

    let message = decode_message_body(message_type, &bytes[start..end], limits)?;

    Ok(GossipEnvelope { version, message })
}

fn encode_message_body(
    enc: &mut Encoder<&mut Vec<u8>>,
    message: &GossipMessage,
) -> Result<(), ProtoEncodeError> {
    match message {
        GossipMessage::Ping(msg) => {
            enc.map(2)?;
            enc.str("node_id")?;
            enc.str(msg.node_id.as_str())?;
            enc.str("generation")?;
            enc.u64(msg.generation.get())?;
        }
        GossipMessage::Pong(msg) => {
            enc.map(2)?;
            enc.str("node_id")?;
            enc.str(msg.node_id.as_str())?;
            enc.str("timestamp")?;
            enc.u64(msg.timestamp.secs())?;
        }
        GossipMessage::Syn(msg) => {
            enc.map(3)?;
            enc.str("cluster_id")?;
            enc.str(msg.cluster_id.as_str())?;
            enc.str("sender_address")?;
            enc.str(msg.sender_address.as_str())?;
            enc.str("digests")?;
            encode_digest_list(enc, &msg.digests)?;
        }
        GossipMessage::Ack(msg) => {
            enc.map(2)?;
            enc.str("endpoint_states")?;
            encode_endpoint_list(enc, &msg.endpoint_states)?;
            enc.str("request_digests")?;
            encode_digest_list(enc, &msg.request_digests)?;
        }
        GossipMessage::Ack2(msg) => {
            enc.map(1)?;
            enc.str("endpoint_states")?;
            encode_endpoint_list(enc, &msg.endpoint_states)?;
        }
    }
    Ok(())
}

fn decode_message_body(
    message_type: MessageType,
    bytes: &[u8],
    limits: &WireLimits,
) -> Result<GossipMessage, ProtoDecodeError> {
    let mut dec = Decoder::new(bytes);
    let message = match message_type {
        MessageType::Ping => GossipMessage::Ping(decode_ping(&mut dec, limits)?),
        MessageType::Pong => GossipMessage::Pong(decode_pong(&mut dec, limits)?),
        MessageType::Syn => GossipMessage::Syn(decode_syn(&mut dec, limits)?),
        MessageType::Ack => GossipMessage::Ack(decode_ack(&mut dec, limits)?),
        MessageType::Ack2 => GossipMessage::Ack2(decode_ack2(&mut dec, limits)?),
    };

    if dec.datatype().is_ok() {
        return Err(ProtoDecodeError::TrailingBytes);
    }

    Ok(message)
}

fn decode_ping(dec: &mut Decoder, limits: &WireLimits) -> Result<HeartbeatPing, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut node_id = None;
    let mut generation = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "node_id" => node_id = Some(decode_node_id(dec, limits)?),
            "generation" => generation = Some(Generation::new(dec.u64()?)),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(HeartbeatPing {
        node_id: node_id.ok_or(ProtoDecodeError::MissingField("node_id"))?,
        generation: generation.ok_or(ProtoDecodeError::MissingField("generation"))?,
    })
}

fn decode_pong(dec: &mut Decoder, limits: &WireLimits) -> Result<HeartbeatPong, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut node_id = None;
    let mut timestamp = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "node_id" => node_id = Some(decode_node_id(dec, limits)?),
            "timestamp" => timestamp = Some(WallClock::from_secs(dec.u64()?)),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(HeartbeatPong {
        node_id: node_id.ok_or(ProtoDecodeError::MissingField("node_id"))?,
        timestamp: timestamp.ok_or(ProtoDecodeError::MissingField("timestamp"))?,
    })
}

fn decode_syn(dec: &mut Decoder, limits: &WireLimits) -> Result<DigestSyn, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut cluster_id = None;
    let mut sender_address = None;
    let mut digests = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "cluster_id" => {
                let raw = decode_text(dec, limits)?;
                cluster_id =
                    Some(
                        ClusterId::new(raw).map_err(|err| ProtoDecodeError::InvalidField {
                            field: "cluster_id",
                            reason: err.to_string(),
                        })?,
                    );
            }
            "sender_address" => {
                let raw = decode_text(dec, limits)?;
                sender_address =
                    Some(
                        PeerAddr::new(raw).map_err(|err| ProtoDecodeError::InvalidField {
                            field: "sender_address",
                            reason: err.to_string(),
                        })?,
                    );
            }
            "digests" => digests = Some(decode_digest_list(dec, limits)?),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(DigestSyn {
        cluster_id: cluster_id.ok_or(ProtoDecodeError::MissingField("cluster_id"))?,
        sender_address: sender_address.ok_or(ProtoDecodeError::MissingField("sender_address"))?,
        digests: digests.ok_or(ProtoDecodeError::MissingField("digests"))?,
    })
}

fn decode_ack(dec: &mut Decoder, limits: &WireLimits) -> Result<DigestAck, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut endpoint_states = None;
    let mut request_digests = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "endpoint_states" => endpoint_states = Some(decode_endpoint_list(dec, limits)?),
            "request_digests" => request_digests = Some(decode_digest_list(dec, limits)?),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(DigestAck {
        endpoint_states: endpoint_states
            .ok_or(ProtoDecodeError::MissingField("endpoint_states"))?,
        request_digests: request_digests
            .ok_or(ProtoDecodeError::MissingField("request_digests"))?,
    })
}

fn decode_ack2(dec: &mut Decoder, limits: &WireLimits) -> Result<DigestAck2, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut endpoint_states = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "endpoint_states" => endpoint_states = Some(decode_endpoint_list(dec, limits)?),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(DigestAck2 {
        endpoint_states: endpoint_states
            .ok_or(ProtoDecodeError::MissingField("endpoint_states"))?,
    })
}

fn encode_digest_list(
    enc: &mut Encoder<&mut Vec<u8>>,
    digests: &[Digest],
) -> Result<(), ProtoEncodeError> {
    enc.array(digests.len() as u64)?;
    for digest in digests {
        enc.map(3)?;
        enc.str("node_id")?;
        enc.str(digest.node_id.as_str())?;
        enc.str("generation")?;
        enc.u64(digest.generation.get())?;
        enc.str("max_version")?;
        enc.u64(digest.max_version.get())?;
    }
    Ok(())
}

fn decode_digest_list(
    dec: &mut Decoder,
    limits: &WireLimits,
) -> Result<Vec<Digest>, ProtoDecodeError> {
    let len = decode_array_len(dec)?;
    if len as usize > limits.max_digests {
        return Err(ProtoDecodeError::TooManyElements {
            field: "digests",
            max: limits.max_digests,
            got: len as usize,
        });
    }

    let mut digests = Vec::with_capacity(len as usize);
    for _ in 0..len {
        digests.push(decode_digest(dec, limits)?);
    }
    Ok(digests)
}

fn decode_digest(dec: &mut Decoder, limits: &WireLimits) -> Result<Digest, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut node_id = None;
    let mut generation = None;
    let mut max_version = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "node_id" => node_id = Some(decode_node_id(dec, limits)?),
            "generation" => generation = Some(Generation::new(dec.u64()?)),
            "max_version" => max_version = Some(Version::new(dec.u64()?)),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(Digest {
        node_id: node_id.ok_or(ProtoDecodeError::MissingField("node_id"))?,
        generation: generation.ok_or(ProtoDecodeError::MissingField("generation"))?,
        max_version: max_version.ok_or(ProtoDecodeError::MissingField("max_version"))?,
    })
}

fn encode_endpoint_list(
    enc: &mut Encoder<&mut Vec<u8>>,
    states: &[EndpointStateWire],
) -> Result<(), ProtoEncodeError> {
    enc.array(states.len() as u64)?;
    for state in states {
        enc.map(5)?;
        enc.str("node_id")?;
        enc.str(state.node_id.as_str())?;
        enc.str("generation")?;
        enc.u64(state.generation.get())?;
        enc.str("heartbeat_version")?;
        enc.u64(state.heartbeat_version.get())?;
        enc.str("app_states")?;
        enc.map(state.app_states.len() as u64)?;
        for (key, entry) in &state.app_states {
            enc.str(key.as_str())?;
            enc.map(2)?;
            enc.str("value")?;
            enc.str(&entry.value)?;
            enc.str("version")?;
            enc.u64(entry.version.get())?;
        }
        enc.str("update_timestamp")?;
        enc.u64(state.update_timestamp.secs())?;
    }
    Ok(())
}

fn decode_endpoint_list(
    dec: &mut Decoder,
    limits: &WireLimits,
) -> Result<Vec<EndpointStateWire>, ProtoDecodeError> {
    let len = decode_array_len(dec)?;
    if len as usize > limits.max_endpoint_states {
        return Err(ProtoDecodeError::TooManyElements {
            field: "endpoint_states",
            max: limits.max_endpoint_states,
            got: len as usize,
        });
    }

    let mut states = Vec::with_capacity(len as usize);
    for _ in 0..len {
        states.push(decode_endpoint_state(dec, limits)?);
    }
    Ok(states)
}

fn decode_endpoint_state(
    dec: &mut Decoder,
    limits: &WireLimits,
) -> Result<EndpointStateWire, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    let mut node_id = None;
    let mut generation = None;
    let mut heartbeat_version = None;
    let mut app_states = None;
    let mut update_timestamp = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "node_id" => node_id = Some(decode_node_id(dec, limits)?),
            "generation" => generation = Some(Generation::new(dec.u64()?)),
            "heartbeat_version" => heartbeat_version = Some(Version::new(dec.u64()?)),
            "app_states" => app_states = Some(decode_app_states(dec, limits)?),
            "update_timestamp" => update_timestamp = Some(WallClock::from_secs(dec.u64()?)),
            _ => skip_unknown(dec)?,
        }
    }

    Ok(EndpointStateWire {
        node_id: node_id.ok_or(ProtoDecodeError::MissingField("node_id"))?,
        generation: generation.ok_or(ProtoDecodeError::MissingField("generation"))?,
        heartbeat_version: heartbeat_version
            .ok_or(ProtoDecodeError::MissingField("heartbeat_version"))?,
        app_states: app_states.ok_or(ProtoDecodeError::MissingField("app_states"))?,
        update_timestamp: update_timestamp
            .ok_or(ProtoDecodeError::MissingField("update_timestamp"))?,
    })
}

fn decode_app_states(
    dec: &mut Decoder,
    limits: &WireLimits,
) -> Result<BTreeMap<AppStateKey, AppState>, ProtoDecodeError> {
    let map_len = decode_map_len(dec)?;
    if map_len as usize > limits.max_app_states {
        return Err(ProtoDecodeError::TooManyElements {
            field: "app_states",
            max: limits.max_app_states,
            got: map_len as usize,
        });
    }

    let mut app_states = BTreeMap::new();
    for _ in 0..map_len {
        let raw_key = decode_text(dec, limits)?;
        if raw_key.is_empty() {
            return Err(ProtoDecodeError::InvalidField {
                field: "app_states",
                reason: "empty key".to_string(),
            });
        }
        let key = AppStateKey::new(raw_key);

        let entry_len = decode_map_len(dec)?;
        let mut value = None;
        let mut version = None;
        for _ in 0..entry_len {
            let field = decode_text(dec, limits)?;
            match field {
                "value" => value = Some(decode_text(dec, limits)?.to_string()),
                "version" => version = Some(Version::new(dec.u64()?)),
                _ => skip_unknown(dec)?,
            }
        }

        app_states.insert(
            key,
            AppState {
                value: value.ok_or(ProtoDecodeError::MissingField("value"))?,
                version: version.ok_or(ProtoDecodeError::MissingField("version"))?,
            },
        );
    }
    Ok(app_states)
}

fn decode_node_id(dec: &mut Decoder, limits: &WireLimits) -> Result<NodeId, ProtoDecodeError> {
    let raw = decode_text(dec, limits)?;
    NodeId::new(raw).map_err(|err| ProtoDecodeError::InvalidField {
        field: "node_id",
        reason: err.to_string(),
    })
}

fn decode_map_len(dec: &mut Decoder) -> Result<u64, ProtoDecodeError> {
    dec.map()?.ok_or(ProtoDecodeError::IndefiniteLength)
}

fn decode_array_len(dec: &mut Decoder) -> Result<u64, ProtoDecodeError> {
    dec.array()?.ok_or(ProtoDecodeError::IndefiniteLength)
}

fn decode_text<'b>(dec: &mut Decoder<'b>, limits: &WireLimits) -> Result<&'b str, ProtoDecodeError> {
    let s = dec.str()?;
    if s.len() > limits.max_text_len {
        return Err(ProtoDecodeError::TextTooLong {
            max: limits.max_text_len,
        });
    }
    Ok(s)
}

fn decode_u32(dec: &mut Decoder, field: &'static str) -> Result<u32, ProtoDecodeError> {
    dec.u32().map_err(|err| ProtoDecodeError::InvalidField {
        field,
        reason: err.to_string(),
    })
}

fn skip_unknown(dec: &mut Decoder) -> Result<(), ProtoDecodeError> {
    if is_indefinite(dec)? {
        return Err(ProtoDecodeError::IndefiniteLength);
    }
    dec.skip()?;
    Ok(())
}

fn is_indefinite(dec: &Decoder) -> Result<bool, ProtoDecodeError> {
    Ok(matches!(
        dec.datatype()?,
        Type::BytesIndef | Type::StringIndef | Type::ArrayIndef | Type::MapIndef
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    fn syn() -> DigestSyn {
        DigestSyn {
            cluster_id: ClusterId::new("test-cluster").unwrap(),
            sender_address: PeerAddr::new("127.0.0.1:7000").unwrap(),
            digests: vec![
                Digest {
                    node_id: node("a"),
                    generation: Generation::new(100),
                    max_version: Version::new(9),
                },
                Digest {
                    node_id: node("b"),
                    generation: Generation::new(200),
                    max_version: Version::ZERO,
                },
            ],
        }
    }

    fn wire_state() -> EndpointStateWire {
        let mut app_states = BTreeMap::new();
        app_states.insert(
            AppStateKey::status(),
            AppState {
                value: "UP".to_string(),
                version: Version::new(3),
            },
        );
        app_states.insert(
            AppStateKey::addr(),
            AppState {
                value: "127.0.0.1:7001".to_string(),
                version: Version::new(4),
            },
        );
        EndpointStateWire {
            node_id: node("b"),
            generation: Generation::new(200),
            heartbeat_version: Version::new(7),
            app_states,
            update_timestamp: WallClock::from_secs(1234),
        }
    }

    fn roundtrip(message: GossipMessage) -> GossipMessage {
        let envelope = GossipEnvelope {
            version: PROTOCOL_VERSION_V1,
            message,
        };
        let bytes = encode_envelope(&envelope).unwrap();
        let decoded = decode_envelope(&bytes, &WireLimits::default()).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION_V1);
        decoded.message
    }

    #[test]
    fn syn_round_trips() {
        let message = GossipMessage::Syn(syn());
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn ack_round_trips() {
        let message = GossipMessage::Ack(DigestAck {
            endpoint_states: vec![wire_state()],
            request_digests: vec![Digest {
                node_id: node("a"),
                generation: Generation::new(100),
                max_version: Version::new(5),
            }],
        });
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn ack2_and_ping_pong_round_trip() {
        let ack2 = GossipMessage::Ack2(DigestAck2 {
            endpoint_states: vec![wire_state()],
        });
        assert_eq!(roundtrip(ack2.clone()), ack2);

        let ping = GossipMessage::Ping(HeartbeatPing {
            node_id: node("a"),
            generation: Generation::new(100),
        });
        assert_eq!(roundtrip(ping.clone()), ping);

        let pong = GossipMessage::Pong(HeartbeatPong {
            node_id: node("b"),
            timestamp: WallClock::from_secs(42),
        });
        assert_eq!(roundtrip(pong.clone()), pong);
    }

    #[test]
    fn unknown_envelope_type_is_rejected() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap();
        enc.u32(1).unwrap();
        enc.str("type").unwrap();
        enc.str("NACK").unwrap();
        enc.str("body").unwrap();
        enc.map(0).unwrap();

        let err = decode_envelope(&buf, &WireLimits::default()).unwrap_err();
        assert!(matches!(err, ProtoDecodeError::UnknownMessageType(raw) if raw == "NACK"));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap();
        enc.u32(1).unwrap();
        enc.str("type").unwrap();
        enc.str("SYN").unwrap();
        enc.str("body").unwrap();
        // SYN body with no digests.
        enc.map(2).unwrap();
        enc.str("cluster_id").unwrap();
        enc.str("c").unwrap();
        enc.str("sender_address").unwrap();
        enc.str("127.0.0.1:1").unwrap();

        let err = decode_envelope(&buf, &WireLimits::default()).unwrap_err();
        assert!(matches!(err, ProtoDecodeError::MissingField("digests")));
    }

    #[test]
    fn negative_counters_fail_decoding() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap();
        enc.u32(1).unwrap();
        enc.str("type").unwrap();
        enc.str("PING").unwrap();
        enc.str("body").unwrap();
        enc.map(2).unwrap();
        enc.str("node_id").unwrap();
        enc.str("a").unwrap();
        enc.str("generation").unwrap();
        enc.i64(-5).unwrap();

        let err = decode_envelope(&buf, &WireLimits::default()).unwrap_err();
        assert!(matches!(err, ProtoDecodeError::Cbor(_)));
    }

    #[test]
    fn empty_cluster_id_is_invalid() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap();
        enc.u32(1).unwrap();
        enc.str("type").unwrap();
        enc.str("SYN").unwrap();
        enc.str("body").unwrap();
        enc.map(3).unwrap();
        enc.str("cluster_id").unwrap();
        enc.str("").unwrap();
        enc.str("sender_address").unwrap();
        enc.str("127.0.0.1:1").unwrap();
        enc.str("digests").unwrap();
        enc.array(0).unwrap();

        let err = decode_envelope(&buf, &WireLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtoDecodeError::InvalidField {
                field: "cluster_id",
                ..
            }
        ));
    }

    #[test]
    fn unknown_body_keys_are_skipped() {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(3).unwrap();
        enc.str("v").unwrap();
        enc.u32(1).unwrap();
        enc.str("type").unwrap();
        enc.str("PING").unwrap();
        enc.str("body").unwrap();
        enc.map(3).unwrap();
        enc.str("node_id").unwrap();
        enc.str("a").unwrap();
        enc.str("generation").unwrap();
        enc.u64(100).unwrap();
        enc.str("introduced_later").unwrap();
        enc.str("ignored").unwrap();

        let envelope = decode_envelope(&buf, &WireLimits::default()).unwrap();
        assert!(matches!(envelope.message, GossipMessage::Ping(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let envelope = GossipEnvelope {
            version: PROTOCOL_VERSION_V1,
            message: GossipMessage::Ping(HeartbeatPing {
                node_id: node("a"),
                generation: Generation::new(1),
            }),
        };
        let mut bytes = encode_envelope(&envelope).unwrap();
        bytes.push(0x00);

        let err = decode_envelope(&bytes, &WireLimits::default()).unwrap_err();
        assert!(matches!(err, ProtoDecodeError::TrailingBytes));
    }

    #[test]
    fn digest_list_length_is_bounded() {
        let envelope = GossipEnvelope {
            version: PROTOCOL_VERSION_V1,
            message: GossipMessage::Syn(syn()),
        };
        let bytes = encode_envelope(&envelope).unwrap();

        let limits = WireLimits {
            max_digests: 1,
            ..WireLimits::default()
        };
        let err = decode_envelope(&bytes, &limits).unwrap_err();
        assert!(matches!(err, ProtoDecodeError::TooManyElements { .. }));
    }

    #[test]
    fn wire_state_conversion_preserves_versions() {
        let wire = wire_state();
        let (node_id, state) = wire.clone().into_state();
        assert_eq!(node_id, node("b"));
        assert_eq!(state.heartbeat.version, Version::new(7));
        assert_eq!(state.max_version(), Version::new(7));
        assert!(state.is_alive);

        let back = EndpointStateWire::from_state(&node_id, &state);
        assert_eq!(back, wire);
    }
}
