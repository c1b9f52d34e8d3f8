// header.rs -- The three on-wire header shapes, as one parametric type.
//
// Converted in spirit from the teacher's SizeBuf read/write helpers
// (myq2_common::common), generalized to the three incompatible framings
// this protocol actually has. Design Note: "three header shapes for one
// protocol" -- the encode/decode below is parametric over `HeaderKind`,
// never duplicated per call site.

use crate::error::{ProtoError, Result};

/// Which of the three wire layouts a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `{u8 type, u8 flags, u16 len_le}` -- Dreamcast and GameCube clients.
    DcGc,
    /// `{u16 len_le, u8 type, u8 flags}` -- PC clients.
    Pc,
    /// `{u16 len_be, u16 type_be, u16 flags_be, u16 unc_len_be}` -- shipgate link.
    Shipgate,
}

impl HeaderKind {
    pub const fn len(self) -> usize {
        match self {
            HeaderKind::DcGc | HeaderKind::Pc => 4,
            HeaderKind::Shipgate => 8,
        }
    }
}

/// A decoded packet header, independent of which wire shape produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub pkt_type: u16,
    pub flags: u16,
    pub pkt_len: u16,
    /// Only meaningful for `HeaderKind::Shipgate`; equals `pkt_len` when
    /// deflate is not in use.
    pub unc_len: u16,
}

impl PacketHeader {
    /// Encode this header into `out`, which must be at least
    /// `kind.len()` bytes. Returns the number of bytes written.
    pub fn encode(&self, kind: HeaderKind, out: &mut [u8]) -> Result<usize> {
        let n = kind.len();
        if out.len() < n {
            return Err(ProtoError::Framing("header encode buffer too small"));
        }

        match kind {
            HeaderKind::DcGc => {
                out[0] = self.pkt_type as u8;
                out[1] = self.flags as u8;
                out[2..4].copy_from_slice(&self.pkt_len.to_le_bytes());
            }
            HeaderKind::Pc => {
                out[0..2].copy_from_slice(&self.pkt_len.to_le_bytes());
                out[2] = self.pkt_type as u8;
                out[3] = self.flags as u8;
            }
            HeaderKind::Shipgate => {
                out[0..2].copy_from_slice(&self.pkt_len.to_be_bytes());
                out[2..4].copy_from_slice(&self.pkt_type.to_be_bytes());
                out[4..6].copy_from_slice(&self.flags.to_be_bytes());
                out[6..8].copy_from_slice(&self.unc_len.to_be_bytes());
            }
        }

        Ok(n)
    }

    /// Decode a header of the given shape from the front of `data`.
    pub fn decode(kind: HeaderKind, data: &[u8]) -> Result<Self> {
        let n = kind.len();
        if data.len() < n {
            return Err(ProtoError::Framing("short header"));
        }

        let header = match kind {
            HeaderKind::DcGc => PacketHeader {
                pkt_type: data[0] as u16,
                flags: data[1] as u16,
                pkt_len: u16::from_le_bytes([data[2], data[3]]),
                unc_len: 0,
            },
            HeaderKind::Pc => PacketHeader {
                pkt_len: u16::from_le_bytes([data[0], data[1]]),
                pkt_type: data[2] as u16,
                flags: data[3] as u16,
                unc_len: 0,
            },
            HeaderKind::Shipgate => PacketHeader {
                pkt_len: u16::from_be_bytes([data[0], data[1]]),
                pkt_type: u16::from_be_bytes([data[2], data[3]]),
                flags: u16::from_be_bytes([data[4], data[5]]),
                unc_len: u16::from_be_bytes([data[6], data[7]]),
            },
        };

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_gc_round_trip() {
        let hdr = PacketHeader {
            pkt_type: 0x19,
            flags: 0,
            pkt_len: 0x0C,
            unc_len: 0,
        };
        let mut buf = [0u8; 4];
        hdr.encode(HeaderKind::DcGc, &mut buf).unwrap();
        assert_eq!(buf, [0x19, 0x00, 0x0C, 0x00]);
        assert_eq!(PacketHeader::decode(HeaderKind::DcGc, &buf).unwrap(), hdr);
    }

    #[test]
    fn pc_round_trip() {
        let hdr = PacketHeader {
            pkt_type: 0x19,
            flags: 0,
            pkt_len: 0x00B0,
            unc_len: 0,
        };
        let mut buf = [0u8; 4];
        hdr.encode(HeaderKind::Pc, &mut buf).unwrap();
        assert_eq!(buf, [0xB0, 0x00, 0x19, 0x00]);
        assert_eq!(PacketHeader::decode(HeaderKind::Pc, &buf).unwrap(), hdr);
    }

    #[test]
    fn shipgate_round_trip() {
        let hdr = PacketHeader {
            pkt_type: 0x0004,
            flags: 0x0001,
            pkt_len: 0x0020,
            unc_len: 0x0020,
        };
        let mut buf = [0u8; 8];
        hdr.encode(HeaderKind::Shipgate, &mut buf).unwrap();
        assert_eq!(
            PacketHeader::decode(HeaderKind::Shipgate, &buf).unwrap(),
            hdr
        );
    }

    #[test]
    fn selective_redirect_byte_layout() {
        // The same 0xB0-byte frame parses as one thing under the PC
        // header and something else entirely under the DC/GC header.
        let mut buf = [0u8; 0xB0];
        buf[0] = 0x19;
        buf[1] = 0x00;
        buf[2] = 0xB0;
        buf[3] = 0x00;

        let pc = PacketHeader::decode(HeaderKind::Pc, &buf).unwrap();
        assert_eq!(pc.pkt_type, 0x19);
        assert_eq!(pc.pkt_len, 0x00B0);

        let dc = PacketHeader::decode(HeaderKind::DcGc, &buf).unwrap();
        assert_eq!(dc.pkt_type, 0xB0);
        assert_eq!(dc.pkt_len, 0x0019);
    }
}
