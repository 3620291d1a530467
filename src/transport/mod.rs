//! The engine/transport boundary.
//!
//! The engine never sees sockets. It implements [`GossipHandler`] and
//! hands that to whatever transport hosts it; outbound it is given a
//! [`Dialer`] that turns a peer address into a request/response
//! channel. `tcp` provides the framed-TCP implementation of both
//! sides; tests swap in a loopback.

pub mod tcp;

use std::time::Duration;

use thiserror::Error;

use crate::core::PeerAddr;
use crate::engine::error::ProtocolError;
use crate::wire::frame::FrameError;
use crate::wire::proto::{
    DigestAck, DigestAck2, DigestSyn, HeartbeatPing, HeartbeatPong, ProtoDecodeError,
    ProtoEncodeError,
};

pub use tcp::{TcpDialer, TcpGossipServer, TcpServerHandle};

/// Inbound side: the engine's message handlers, registered with the
/// transport.
pub trait GossipHandler: Send + Sync {
    /// Phase 1 -> phase 2: examine a SYN, produce the ACK.
    fn handle_syn(&self, syn: DigestSyn) -> Result<DigestAck, ProtocolError>;

    /// Phase 3: merge the states the peer sent back. One-way.
    fn handle_ack2(&self, ack2: DigestAck2) -> Result<(), ProtocolError>;

    /// Legacy liveness probe.
    fn handle_ping(&self, ping: HeartbeatPing) -> Result<HeartbeatPong, ProtocolError>;
}

/// Outbound side: one dialed connection to a peer.
pub trait PeerChannel {
    fn exchange_syn(&mut self, syn: DigestSyn) -> Result<DigestAck, TransportError>;

    fn send_ack2(&mut self, ack2: DigestAck2) -> Result<(), TransportError>;

    fn ping(&mut self, ping: HeartbeatPing) -> Result<HeartbeatPong, TransportError>;
}

/// How the engine reaches peers. Implementations must not block longer
/// than `timeout` per dial.
pub trait Dialer: Send + Sync {
    fn dial(
        &self,
        addr: &PeerAddr,
        timeout: Duration,
    ) -> Result<Box<dyn PeerChannel>, TransportError>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("encode error: {0}")]
    Encode(#[from] ProtoEncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] ProtoDecodeError),
    #[error("address `{addr}` did not resolve")]
    InvalidAddress { addr: String },
    #[error("peer closed the connection")]
    ConnectionClosed,
    #[error("expected {expected} in response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
    #[error("peer rejected the request: {reason}")]
    Rejected { reason: String },
}
