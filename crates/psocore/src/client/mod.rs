// client/mod.rs -- A connected game client: buffers, cipher, and phase.

mod recv_buffer;
mod send_buffer;

pub use recv_buffer::RecvBuffer;
pub use send_buffer::{send_packet, SendBuffer};

use std::io::{Read, Write};

use crate::crypto::CipherPair;
use crate::error::Result;
use crate::proto::{HeaderKind, PacketHeader};

/// Which client family is on the other end. Fixed by which listening
/// socket accepted the connection, but may be refined once the first
/// login packet names a more specific variant (DC v2 vs PC share a
/// handshake shape but not a header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVariant {
    DcV1,
    DcV2,
    Pc,
    Gc,
}

impl ClientVariant {
    pub fn header_kind(self) -> HeaderKind {
        match self {
            ClientVariant::Pc => HeaderKind::Pc,
            ClientVariant::DcV1 | ClientVariant::DcV2 | ClientVariant::Gc => HeaderKind::DcGc,
        }
    }
}

/// State machine for a client-facing connection (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    AwaitWelcomeAck,
    AwaitLogin,
    Authenticated,
    Redirecting,
    Closed,
}

/// A connected game client. Generic over its transport so the same
/// state machine serves both a plain `std::net::TcpStream` and a
/// `mio::net::TcpStream` registered with a reactor `Poll` -- only the
/// I/O, never the framing or backpressure logic, differs between them.
pub struct Client<S> {
    pub stream: S,
    pub variant: ClientVariant,
    pub guildcard: u32,
    pub language_code: u8,
    pub phase: ClientPhase,
    pub recv: RecvBuffer,
    pub send: SendBuffer,
    pub cipher: CipherPair,
}

impl<S: Read + Write> Client<S> {
    pub fn new(stream: S, variant: ClientVariant) -> Self {
        Self {
            stream,
            variant,
            guildcard: 0,
            language_code: 0,
            phase: ClientPhase::AwaitWelcomeAck,
            recv: RecvBuffer::new(),
            send: SendBuffer::new(),
            cipher: CipherPair::default(),
        }
    }

    /// Send a fully-built packet (header + body), enciphering everything
    /// past the 2-byte clear prefix to match what `RecvBuffer` expects
    /// on the other end (spec.md §4.1, §6).
    pub fn send_raw(&mut self, packet: &mut [u8]) -> Result<()> {
        if self.cipher.key_set && packet.len() > 2 {
            self.cipher.encrypt(&mut packet[2..]);
        }
        send_packet(&mut self.send, &mut self.stream, packet)
    }

    /// Build and send a packet with no body, just a header -- used for
    /// `ignore`/`ping`-shaped traffic and for any handler that sends a
    /// fixed-size reply it assembles itself in `scratch`.
    pub fn send_header_only(&mut self, pkt_type: u16, flags: u16) -> Result<()> {
        let kind = self.variant.header_kind();
        let header = PacketHeader {
            pkt_type,
            flags,
            pkt_len: kind.len() as u16,
            unc_len: 0,
        };
        let mut buf = vec![0u8; kind.len()];
        header.encode(kind, &mut buf)?;
        self.send_raw(&mut buf)
    }

    /// Drain whatever the client's deferred send buffer holds. Called
    /// by the reactor when the socket reports writable.
    pub fn drain_send(&mut self) -> Result<bool> {
        self.send.drain(&mut self.stream)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}
