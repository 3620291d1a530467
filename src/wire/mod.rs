//! Wire format: framing and message codecs.

pub mod frame;
pub mod proto;

pub use frame::{FrameError, FrameReader, FrameWriter, HEADER_BYTES, frame_bytes, frame_header};
pub use proto::{
    DigestAck, DigestAck2, DigestSyn, EndpointStateWire, GossipEnvelope, GossipMessage,
    HeartbeatPing, HeartbeatPong, PROTOCOL_VERSION_V1, ProtoDecodeError, ProtoEncodeError,
    WireLimits, decode_envelope, encode_envelope,
};
