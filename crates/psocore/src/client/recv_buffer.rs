// recv_buffer.rs -- Growable receive buffer with a parse cursor.
//
// Holds raw bytes off the wire until a full header, then a full body,
// is available. For DC/GC and PC clients only the first 2 bytes of
// every packet travel in clear -- type+flags for DC/GC, the length
// field for PC (spec.md §4.1, §6) -- so the other half of the header
// must itself be decrypted before `pkt_len` can even be read. That
// decrypt must happen exactly once per packet: `header_decrypted`
// remembers that it already ran while we wait for the rest of the
// body to arrive. The shipgate header has no such wrinkle -- all 8
// bytes are sent in clear -- so it skips this dance entirely.

use std::io::{self, Read};

use crate::crypto::CipherPair;
use crate::error::{ProtoError, Result};
use crate::proto::{HeaderKind, PacketHeader};

const CLEAR_PREFIX: usize = 2;

pub struct RecvBuffer {
    data: Vec<u8>,
    consumed: usize,
    header_decrypted: bool,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            consumed: 0,
            header_decrypted: false,
        }
    }

    /// Pull as many bytes as the transport has ready into the buffer.
    /// Returns `false` on `WouldBlock`, propagates any other error, and
    /// treats a zero-length read as the peer closing the connection.
    pub fn fill<R: Read>(&mut self, transport: &mut R) -> Result<bool> {
        let mut tmp = [0u8; 4096];
        loop {
            match transport.read(&mut tmp) {
                Ok(0) => return Err(ProtoError::TransportClosed),
                Ok(n) => self.data.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn pending(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    fn pending_len(&self) -> usize {
        self.data.len() - self.consumed
    }

    fn drop_consumed(&mut self) {
        if self.consumed > 0 {
            self.data.drain(..self.consumed);
            self.consumed = 0;
        }
    }

    /// If a complete packet is available, decrypt whichever part of it
    /// is still ciphered and return its bytes (header included).
    pub fn take_packet(
        &mut self,
        kind: HeaderKind,
        cipher: &mut CipherPair,
    ) -> Result<Option<Vec<u8>>> {
        let header_len = kind.len();

        if matches!(kind, HeaderKind::Shipgate) {
            return self.take_shipgate_packet(header_len, cipher);
        }

        if self.pending_len() < CLEAR_PREFIX {
            return Ok(None);
        }

        if cipher.key_set && !self.header_decrypted {
            if self.pending_len() < header_len {
                return Ok(None);
            }
            let start = self.consumed + CLEAR_PREFIX;
            let end = self.consumed + header_len;
            cipher.decrypt(&mut self.data[start..end]);
            self.header_decrypted = true;
        } else if self.pending_len() < header_len {
            return Ok(None);
        }

        let header = PacketHeader::decode(kind, self.pending())?;
        let pkt_len = header.pkt_len as usize;
        if pkt_len < header_len {
            return Err(ProtoError::Framing("pkt_len shorter than header"));
        }
        if self.pending_len() < pkt_len {
            return Ok(None);
        }

        if cipher.key_set {
            let start = self.consumed + header_len;
            let end = self.consumed + pkt_len;
            cipher.decrypt(&mut self.data[start..end]);
        }

        let packet = self.pending()[..pkt_len].to_vec();
        self.header_decrypted = false;
        self.consumed += pkt_len;
        self.drop_consumed();
        Ok(Some(packet))
    }

    fn take_shipgate_packet(
        &mut self,
        header_len: usize,
        cipher: &mut CipherPair,
    ) -> Result<Option<Vec<u8>>> {
        if self.pending_len() < header_len {
            return Ok(None);
        }

        let header = PacketHeader::decode(HeaderKind::Shipgate, self.pending())?;
        let pkt_len = header.pkt_len as usize;
        if pkt_len < header_len {
            return Err(ProtoError::Framing("pkt_len shorter than header"));
        }
        if self.pending_len() < pkt_len {
            return Ok(None);
        }

        let mut packet = self.pending()[..pkt_len].to_vec();
        if cipher.key_set {
            cipher.decrypt(&mut packet[header_len..]);
        }

        self.consumed += pkt_len;
        self.drop_consumed();
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Cipher, Rc4State};
    use std::io::Cursor;

    fn keyed_pair(key: &[u8]) -> (CipherPair, CipherPair) {
        let mut client = CipherPair::default();
        client.set(
            Cipher::Rc4(Rc4State::new(key)),
            Cipher::Rc4(Rc4State::new(key)),
        );
        let mut server = CipherPair::default();
        server.set(
            Cipher::Rc4(Rc4State::new(key)),
            Cipher::Rc4(Rc4State::new(key)),
        );
        (client, server)
    }

    #[test]
    fn dc_gc_packet_round_trips_through_cipher() {
        let key = [7u8, 7, 7, 7];
        let (mut sender_cipher, mut receiver_cipher) = keyed_pair(&key);

        let header = PacketHeader {
            pkt_type: 0x05,
            flags: 0,
            pkt_len: 8,
            unc_len: 0,
        };
        let mut packet = vec![0u8; 8];
        header.encode(HeaderKind::DcGc, &mut packet[..4]).unwrap();
        packet[4..8].copy_from_slice(b"body");

        // Encrypt exactly the bytes that will be decrypted on receipt.
        sender_cipher.encrypt(&mut packet[2..]);

        let mut reader = Cursor::new(packet.clone());
        let mut recv = RecvBuffer::new();
        recv.fill(&mut reader).unwrap();
        let decoded = recv
            .take_packet(HeaderKind::DcGc, &mut receiver_cipher)
            .unwrap()
            .expect("packet available");

        assert_eq!(decoded[0], 0x05);
        assert_eq!(&decoded[4..8], b"body");
    }

    #[test]
    fn packet_split_across_two_fills_still_decodes() {
        let key = [1u8, 2, 3, 4];
        let (mut sender_cipher, mut receiver_cipher) = keyed_pair(&key);

        let header = PacketHeader {
            pkt_type: 0x10,
            flags: 0,
            pkt_len: 12,
            unc_len: 0,
        };
        let mut packet = vec![0u8; 12];
        header.encode(HeaderKind::DcGc, &mut packet[..4]).unwrap();
        packet[4..12].copy_from_slice(b"splitbod");
        sender_cipher.encrypt(&mut packet[2..]);

        let mut recv = RecvBuffer::new();

        let mut first_half = Cursor::new(packet[..5].to_vec());
        recv.fill(&mut first_half).unwrap();
        assert!(recv
            .take_packet(HeaderKind::DcGc, &mut receiver_cipher)
            .unwrap()
            .is_none());

        let mut second_half = Cursor::new(packet[5..].to_vec());
        recv.fill(&mut second_half).unwrap();
        let decoded = recv
            .take_packet(HeaderKind::DcGc, &mut receiver_cipher)
            .unwrap()
            .expect("packet now complete");
        assert_eq!(&decoded[4..12], b"splitbod");
    }

    #[test]
    fn pc_header_length_is_never_enciphered() {
        let key = [9u8, 9, 9, 9];
        let (mut sender_cipher, mut receiver_cipher) = keyed_pair(&key);

        let header = PacketHeader {
            pkt_type: 0x19,
            flags: 0,
            pkt_len: 8,
            unc_len: 0,
        };
        let mut packet = vec![0u8; 8];
        header.encode(HeaderKind::Pc, &mut packet[..4]).unwrap();
        packet[4..8].copy_from_slice(b"abcd");
        sender_cipher.encrypt(&mut packet[2..]);

        // The length prefix must still read correctly straight off the wire.
        assert_eq!(u16::from_le_bytes([packet[0], packet[1]]), 8);

        let mut reader = Cursor::new(packet);
        let mut recv = RecvBuffer::new();
        recv.fill(&mut reader).unwrap();
        let decoded = recv
            .take_packet(HeaderKind::Pc, &mut receiver_cipher)
            .unwrap()
            .unwrap();
        assert_eq!(decoded[2], 0x19);
    }
}
