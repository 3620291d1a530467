//! Framed-TCP transport: accept loop, inbound dispatch, and dialer.
//!
//! Each dialed connection carries one request/response exchange at a
//! time; rounds open a fresh connection and drop it, so inbound
//! connection threads end when their peer finishes a round. The server
//! dispatches decoded messages to the registered [`GossipHandler`] and
//! never tears a connection down for a malformed message - only for
//! broken framing.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::PeerAddr;
use crate::wire::frame::{FrameReader, FrameWriter};
use crate::wire::proto::{
    DigestAck, DigestAck2, DigestSyn, GossipEnvelope, GossipMessage, HeartbeatPing, HeartbeatPong,
    PROTOCOL_VERSION_V1, WireLimits, decode_envelope, encode_envelope,
};

use super::{Dialer, GossipHandler, PeerChannel, TransportError};

pub struct TcpGossipServer {
    listen_addr: PeerAddr,
    handler: Arc<dyn GossipHandler>,
    max_frame_bytes: usize,
    wire_limits: WireLimits,
}

pub struct TcpServerHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl TcpServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept loop. Idempotent. In-flight
    /// connection threads finish with their peers.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for TcpServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TcpGossipServer {
    pub fn new(listen_addr: PeerAddr, handler: Arc<dyn GossipHandler>) -> Self {
        Self {
            listen_addr,
            handler,
            max_frame_bytes: 1024 * 1024,
            wire_limits: WireLimits::default(),
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn start(self) -> Result<TcpServerHandle, TransportError> {
        let listener = TcpListener::bind(self.listen_addr.as_str())?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let runtime = ServerRuntime {
            handler: self.handler,
            max_frame_bytes: self.max_frame_bytes,
            wire_limits: self.wire_limits,
            shutdown: Arc::clone(&shutdown),
        };

        let join = thread::spawn(move || run_accept_loop(listener, runtime));

        Ok(TcpServerHandle {
            shutdown,
            join: Some(join),
            local_addr,
        })
    }
}

#[derive(Clone)]
struct ServerRuntime {
    handler: Arc<dyn GossipHandler>,
    max_frame_bytes: usize,
    wire_limits: WireLimits,
    shutdown: Arc<AtomicBool>,
}

fn run_accept_loop(listener: TcpListener, runtime: ServerRuntime) {
    if let Err(err) = listener.set_nonblocking(true) {
        tracing::error!("gossip server failed to set nonblocking: {err}");
        return;
    }

    loop {
        if runtime.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                let runtime = runtime.clone();
                thread::spawn(move || {
                    if let Err(err) = run_inbound_conn(stream, runtime) {
                        tracing::warn!("gossip inbound connection error: {err}");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!("gossip accept error: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

fn run_inbound_conn(stream: TcpStream, runtime: ServerRuntime) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;

    let reader_stream = stream.try_clone()?;
    let mut reader = FrameReader::new(reader_stream, runtime.max_frame_bytes);
    let mut writer = FrameWriter::new(stream, runtime.max_frame_bytes);

    loop {
        let Some(bytes) = reader.read_frame()? else {
            return Ok(());
        };

        let envelope = match decode_envelope(&bytes, &runtime.wire_limits) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Malformed payload inside an intact frame: drop the
                // message, keep the connection.
                tracing::warn!("discarding malformed gossip message: {err}");
                continue;
            }
        };

        match envelope.message {
            GossipMessage::Syn(syn) => match runtime.handler.handle_syn(syn) {
                Ok(ack) => send_message(&mut writer, GossipMessage::Ack(ack))?,
                Err(err) => tracing::warn!("rejected gossip exchange: {err}"),
            },
            GossipMessage::Ack2(ack2) => {
                if let Err(err) = runtime.handler.handle_ack2(ack2) {
                    tracing::warn!("rejected gossip reply: {err}");
                }
            }
            GossipMessage::Ping(ping) => match runtime.handler.handle_ping(ping) {
                Ok(pong) => send_message(&mut writer, GossipMessage::Pong(pong))?,
                Err(err) => tracing::warn!("rejected heartbeat probe: {err}"),
            },
            GossipMessage::Ack(_) | GossipMessage::Pong(_) => {
                tracing::warn!("discarding response-type message on inbound connection");
            }
        }
    }
}

fn send_message<W: std::io::Write>(
    writer: &mut FrameWriter<W>,
    message: GossipMessage,
) -> Result<(), TransportError> {
    let envelope = GossipEnvelope {
        version: PROTOCOL_VERSION_V1,
        message,
    };
    let bytes = encode_envelope(&envelope)?;
    writer.write_frame(&bytes)?;
    Ok(())
}

/// Dialer opening one framed TCP connection per call.
#[derive(Clone, Debug, Default)]
pub struct TcpDialer {
    max_frame_bytes: Option<usize>,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = Some(max_frame_bytes);
        self
    }
}

impl Dialer for TcpDialer {
    fn dial(
        &self,
        addr: &PeerAddr,
        timeout: Duration,
    ) -> Result<Box<dyn PeerChannel>, TransportError> {
        let socket_addr = addr
            .as_str()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress {
                addr: addr.as_str().to_string(),
            })?;

        let stream = TcpStream::connect_timeout(&socket_addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let max_frame_bytes = self.max_frame_bytes.unwrap_or(1024 * 1024);
        let reader_stream = stream.try_clone()?;
        Ok(Box::new(TcpPeerChannel {
            reader: FrameReader::new(reader_stream, max_frame_bytes),
            writer: FrameWriter::new(stream, max_frame_bytes),
            wire_limits: WireLimits::default(),
        }))
    }
}

struct TcpPeerChannel {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    wire_limits: WireLimits,
}

impl TcpPeerChannel {
    fn send(&mut self, message: GossipMessage) -> Result<(), TransportError> {
        send_message(&mut self.writer, message)
    }

    fn recv(&mut self) -> Result<GossipMessage, TransportError> {
        let bytes = self
            .reader
            .read_frame()?
            .ok_or(TransportError::ConnectionClosed)?;
        let envelope = decode_envelope(&bytes, &self.wire_limits)?;
        Ok(envelope.message)
    }
}

impl PeerChannel for TcpPeerChannel {
    fn exchange_syn(&mut self, syn: DigestSyn) -> Result<DigestAck, TransportError> {
        self.send(GossipMessage::Syn(syn))?;
        match self.recv()? {
            GossipMessage::Ack(ack) => Ok(ack),
            other => Err(TransportError::UnexpectedResponse {
                expected: "ACK",
                got: message_name(&other),
            }),
        }
    }

    fn send_ack2(&mut self, ack2: DigestAck2) -> Result<(), TransportError> {
        self.send(GossipMessage::Ack2(ack2))
    }

    fn ping(&mut self, ping: HeartbeatPing) -> Result<HeartbeatPong, TransportError> {
        self.send(GossipMessage::Ping(ping))?;
        match self.recv()? {
            GossipMessage::Pong(pong) => Ok(pong),
            other => Err(TransportError::UnexpectedResponse {
                expected: "PONG",
                got: message_name(&other),
            }),
        }
    }
}

fn message_name(message: &GossipMessage) -> &'static str {
    match message {
        GossipMessage::Ping(_) => "PING",
        GossipMessage::Pong(_) => "PONG",
        GossipMessage::Syn(_) => "SYN",
        GossipMessage::Ack(_) => "ACK",
        GossipMessage::Ack2(_) => "ACK2",
    }
}
