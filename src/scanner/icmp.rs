//! ICMP echo sweep.
//!
//! One socket serves the whole sweep. A paced sender writes one Echo
//! Request to every host in the range while a blocking receiver polls the
//! same socket with a short read deadline, recording every Echo Reply
//! until the overall deadline passes.
//!
//! # Privileges
//!
//! A raw ICMP socket needs root or `CAP_NET_RAW`. Without it the scanner
//! falls back to an unprivileged datagram ICMP socket where the kernel
//! allows one (Linux `net.ipv4.ping_group_range`).

use crate::error::{ScanError, ScanResult};
use crate::registry::DeviceRegistry;
use crate::scanner::rate_limiter::RateLimiter;
use crate::scanner::traits::Discoverer;
use crate::types::{DiscoverySource, NetworkRange};
use async_trait::async_trait;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Payload carried by every echo request.
pub const ECHO_PAYLOAD: &[u8] = b"IDIOT-SCAN";

/// Sequence number of the single request sent to each host.
pub const ECHO_SEQUENCE: u16 = 1;

const RECV_BUFFER_SIZE: usize = 1500;

/// A socket-like endpoint that can send and receive ICMP messages.
///
/// Both calls are blocking. `recv_from` must return an error of kind
/// `WouldBlock` or `TimedOut` when nothing arrives within `timeout`.
pub trait IcmpTransport: Send + Sync {
    /// Send one ICMP message to `dest`.
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize>;

    /// Receive one message into `buf`, returning its length and sender.
    fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> io::Result<(usize, Ipv4Addr)>;

    /// Whether the kernel replaces the echo identifier with its own, as
    /// unprivileged datagram sockets do.
    fn rewrites_identifier(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Raw,
    Datagram,
}

/// An ICMPv4 socket, raw when permitted and datagram otherwise.
///
/// Closed exactly once when the last reference is dropped.
#[derive(Debug)]
pub struct IcmpSocket {
    socket: Socket,
    kind: SocketKind,
}

impl IcmpSocket {
    /// Open a raw socket, falling back to an unprivileged datagram socket.
    pub fn open() -> ScanResult<Self> {
        match Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) {
            Ok(socket) => {
                debug!("opened raw ICMP socket");
                Ok(Self {
                    socket,
                    kind: SocketKind::Raw,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("raw ICMP socket denied, trying unprivileged datagram socket");
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))
                    .map_err(|e| {
                        ScanError::PermissionDenied(format!(
                            "ICMP sockets require root or CAP_NET_RAW ({})",
                            e
                        ))
                    })?;
                debug!("opened unprivileged ICMP socket");
                Ok(Self {
                    socket,
                    kind: SocketKind::Datagram,
                })
            }
            Err(e) => Err(ScanError::RawSocket(e.to_string())),
        }
    }

    /// Whether this is a raw socket.
    pub fn is_raw(&self) -> bool {
        self.kind == SocketKind::Raw
    }
}

impl IcmpTransport for IcmpSocket {
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(dest, 0));
        self.socket.send_to(packet, &addr)
    }

    fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> io::Result<(usize, Ipv4Addr)> {
        // A zero read timeout is rejected by the OS.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let (n, from) = self.socket.recv_from(as_uninit_mut(buf))?;

        match from.as_socket() {
            Some(SocketAddr::V4(addr)) => Ok((n, *addr.ip())),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "reply from a non-IPv4 address",
            )),
        }
    }

    fn rewrites_identifier(&self) -> bool {
        self.kind == SocketKind::Datagram
    }
}

/// View an initialized buffer as the `MaybeUninit` slice socket2 reads into.
fn as_uninit_mut(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // Safety: `MaybeUninit<u8>` has the layout of `u8`, and the socket only
    // ever writes initialized bytes through the returned slice.
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

/// Identifier and sequence of a received Echo Reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
}

/// The echo identifier for this process: the pid masked to 16 bits.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Build an ICMP Echo Request with a valid checksum.
pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> ScanResult<Vec<u8>> {
    let mut buffer = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + payload.len()];
    let mut packet = MutableEchoRequestPacket::new(&mut buffer)
        .ok_or_else(|| ScanError::ProtocolParse("echo request buffer too small".to_string()))?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.set_payload(payload);

    let checksum = IcmpPacket::new(packet.packet())
        .map(|p| icmp::checksum(&p))
        .ok_or_else(|| ScanError::ProtocolParse("echo request too short".to_string()))?;
    packet.set_checksum(checksum);

    Ok(buffer)
}

/// Drop a leading IPv4 header, present on raw sockets only.
fn strip_ipv4_header(data: &[u8]) -> ScanResult<&[u8]> {
    match data.first() {
        Some(byte) if byte >> 4 == 4 => {
            let header = Ipv4Packet::new(data)
                .ok_or_else(|| ScanError::ProtocolParse("truncated IPv4 header".to_string()))?;
            let len = usize::from(header.get_header_length()) * 4;
            if len < 20 || len > data.len() {
                return Err(ScanError::ProtocolParse(format!(
                    "bad IPv4 header length {}",
                    len
                )));
            }
            Ok(&data[len..])
        }
        Some(_) => Ok(data),
        None => Err(ScanError::ProtocolParse("empty packet".to_string())),
    }
}

/// Parse an incoming message.
///
/// Returns `Ok(None)` for valid ICMP that is not one of our Echo Replies
/// and `ProtocolParse` for malformed or corrupted packets. When
/// `expected_id` is `None` any identifier is accepted.
pub fn parse_echo_reply(data: &[u8], expected_id: Option<u16>) -> ScanResult<Option<EchoReply>> {
    let data = strip_ipv4_header(data)?;
    let packet = IcmpPacket::new(data)
        .ok_or_else(|| ScanError::ProtocolParse("truncated ICMP header".to_string()))?;

    if icmp::checksum(&packet) != packet.get_checksum() {
        return Err(ScanError::ProtocolParse("ICMP checksum mismatch".to_string()));
    }
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return Ok(None);
    }

    let reply = EchoReplyPacket::new(data)
        .ok_or_else(|| ScanError::ProtocolParse("truncated echo reply".to_string()))?;
    let identifier = reply.get_identifier();
    if expected_id.is_some_and(|id| id != identifier) {
        return Ok(None);
    }

    Ok(Some(EchoReply {
        identifier,
        sequence: reply.get_sequence_number(),
    }))
}

/// ICMP echo sweep over a [`NetworkRange`].
pub struct IcmpScanner {
    timeout: Duration,
    poll_interval: Duration,
    send_rate: u32,
    identifier: u16,
    transport: Option<Arc<dyn IcmpTransport>>,
}

impl IcmpScanner {
    /// Create a scanner with an overall deadline, a receive poll interval
    /// and a send rate in packets per second (0 disables pacing).
    pub fn new(timeout: Duration, poll_interval: Duration, send_rate: u32) -> Self {
        Self {
            timeout,
            poll_interval,
            send_rate,
            identifier: process_identifier(),
            transport: None,
        }
    }

    /// Use the given transport instead of opening a socket.
    pub fn with_transport(mut self, transport: Arc<dyn IcmpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the echo identifier.
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    fn transport(&self) -> ScanResult<Arc<dyn IcmpTransport>> {
        match &self.transport {
            Some(transport) => Ok(Arc::clone(transport)),
            None => Ok(Arc::new(IcmpSocket::open()?)),
        }
    }

    /// Sweep the range over `transport` until the deadline.
    ///
    /// Returns the number of distinct hosts that replied.
    pub async fn sweep(
        &self,
        transport: Arc<dyn IcmpTransport>,
        range: &NetworkRange,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let deadline = Instant::now() + self.timeout;
        let packet = build_echo_request(self.identifier, ECHO_SEQUENCE, ECHO_PAYLOAD)?;
        let expected_id = if transport.rewrites_identifier() {
            None
        } else {
            Some(self.identifier)
        };

        debug!(
            hosts = range.host_count(),
            identifier = self.identifier,
            timeout_ms = self.timeout.as_millis() as u64,
            "starting ICMP sweep"
        );

        let receiver = {
            let transport = Arc::clone(&transport);
            let registry = registry.clone();
            let range = range.clone();
            let cancel = cancel.clone();
            let poll = self.poll_interval;
            tokio::task::spawn_blocking(move || {
                receive_replies(
                    transport.as_ref(),
                    &registry,
                    &range,
                    expected_id,
                    deadline,
                    poll,
                    &cancel,
                )
            })
        };

        let sender = {
            let transport = Arc::clone(&transport);
            let hosts: Vec<Ipv4Addr> = range.hosts().collect();
            let pacer = RateLimiter::from_rate(self.send_rate);
            if let Some(pacer) = &pacer {
                trace!(interval_us = pacer.interval().as_micros() as u64, "pacing echo requests");
            }
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                send_requests(transport.as_ref(), &packet, hosts, pacer, deadline, &cancel)
            })
        };

        let (sent, replied) = tokio::join!(sender, receiver);
        let sent = sent.map_err(|e| ScanError::RawSocket(format!("ICMP sender failed: {}", e)))?;
        let replied =
            replied.map_err(|e| ScanError::RawSocket(format!("ICMP receiver failed: {}", e)))?;

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        debug!(sent, replied, "ICMP sweep finished");
        Ok(replied)
    }
}

#[async_trait]
impl Discoverer for IcmpScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Icmp
    }

    fn requires_privileges(&self) -> bool {
        true
    }

    async fn discover(
        &self,
        range: &NetworkRange,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let transport = self.transport()?;
        self.sweep(transport, range, registry, cancel).await
    }
}

/// Send one request to every host, paced, until the deadline.
///
/// Runs on a blocking thread: both the socket write and the pacing wait block.
fn send_requests(
    transport: &dyn IcmpTransport,
    packet: &[u8],
    hosts: Vec<Ipv4Addr>,
    pacer: Option<RateLimiter>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> usize {
    let mut sent = 0;

    for host in hosts {
        if let Some(pacer) = &pacer {
            pacer.wait_blocking();
        }
        if cancel.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        match transport.send_to(packet, host) {
            Ok(_) => sent += 1,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                // Broadcast-like destinations are refused without SO_BROADCAST.
                trace!(%host, error = %e, "send refused");
            }
            Err(e) => trace!(%host, error = %e, "send failed"),
        }
    }

    sent
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Receive until the deadline, recording every in-range Echo Reply.
fn receive_replies(
    transport: &dyn IcmpTransport,
    registry: &DeviceRegistry,
    range: &NetworkRange,
    expected_id: Option<u16>,
    deadline: Instant,
    poll: Duration,
    cancel: &CancellationToken,
) -> usize {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let mut responders = HashSet::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        match transport.recv_from(&mut buf, poll.min(deadline - now)) {
            Ok((n, from)) => match parse_echo_reply(&buf[..n], expected_id) {
                Ok(Some(reply)) => {
                    if !range.contains(from) {
                        trace!(%from, "ignoring reply from outside the range");
                        continue;
                    }
                    trace!(%from, sequence = reply.sequence, "echo reply");
                    registry.record_source(from, DiscoverySource::Icmp);
                    responders.insert(from);
                }
                Ok(None) => {}
                Err(e) => trace!(%from, error = %e, "skipping packet"),
            },
            Err(e) if is_poll_timeout(&e) => {}
            Err(e) => {
                warn!(error = %e, "ICMP receive failed, stopping receiver");
                break;
            }
        }
    }

    responders.len()
}
