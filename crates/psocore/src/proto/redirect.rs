// redirect.rs -- The "go elsewhere" packet and the selective-redirect trick.
// Converted from: original_source/redirector/src/redirector.c

use std::net::Ipv4Addr;

use super::header::{HeaderKind, PacketHeader};

pub const REDIRECT_TYPE: u16 = 0x0019;
pub const IGNORE_TYPE: u16 = 0x00B0;
pub const DC_REDIRECT_LEN: u16 = 0x000C;
pub const SELECTIVE_REDIRECT_LEN: u16 = 0x00B0;

/// Build a plain redirect packet: `{header(4), ip(4) big-endian,
/// port(2) little-endian, pad(2)}`, framed under either the DC/GC or
/// the PC header depending on which listening port accepted the client.
pub fn build_redirect(kind: HeaderKind, ip: Ipv4Addr, port: u16) -> Vec<u8> {
    debug_assert!(matches!(kind, HeaderKind::DcGc | HeaderKind::Pc));

    let header = PacketHeader {
        pkt_type: REDIRECT_TYPE,
        flags: 0,
        pkt_len: DC_REDIRECT_LEN,
        unc_len: 0,
    };

    let mut buf = vec![0u8; DC_REDIRECT_LEN as usize];
    header.encode(kind, &mut buf[..4]).expect("fixed-size header");
    buf[4..8].copy_from_slice(&ip.octets());
    buf[8..10].copy_from_slice(&port.to_le_bytes());
    // buf[10..12] stays zero padding.
    buf
}

/// Build the 0xB0-byte selective-redirect frame. Parsed under the PC
/// header it is a valid redirect (type 0x19, len 0x00B0) to `(ip,
/// 9300)`; parsed under the DC/GC header it is one ignore packet (type
/// 0xB0, len 0x19) followed by a second header at offset 0x19 (type
/// 0xB0, len 0x97) that consumes the rest of the frame. Preserve the
/// exact byte layout -- do not "clean it up" (Design Note, spec.md §9).
pub fn build_selective_redirect(ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; SELECTIVE_REDIRECT_LEN as usize];

    let pc_header = PacketHeader {
        pkt_type: REDIRECT_TYPE,
        flags: 0,
        pkt_len: SELECTIVE_REDIRECT_LEN,
        unc_len: 0,
    };
    pc_header
        .encode(HeaderKind::Pc, &mut buf[..4])
        .expect("fixed-size header");

    buf[4..8].copy_from_slice(&ip.octets());
    buf[8..10].copy_from_slice(&9300u16.to_le_bytes());
    // buf[10..0x19] stays zero padding, read as part of the first
    // "ignored" packet's body under the DC/GC interpretation.

    let secondary = PacketHeader {
        pkt_type: IGNORE_TYPE,
        flags: 0,
        pkt_len: 0x0097,
        unc_len: 0,
    };
    secondary
        .encode(HeaderKind::DcGc, &mut buf[0x19..0x19 + 4])
        .expect("fixed-size header");

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_happy_path_bytes() {
        let ip = Ipv4Addr::new(203, 0, 113, 10);
        let pkt = build_redirect(HeaderKind::DcGc, ip, 9200);
        assert_eq!(pkt.len(), 12);
        assert_eq!(pkt[0], 0x19);
        assert_eq!(pkt[1], 0x00);
        assert_eq!(&pkt[2..4], &0x0Cu16.to_le_bytes());
        assert_eq!(&pkt[4..8], &[203, 0, 113, 10]);
        assert_eq!(&pkt[8..10], &9200u16.to_le_bytes());
        assert_eq!(&pkt[10..12], &[0, 0]);
    }

    #[test]
    fn selective_redirect_parses_both_ways() {
        let ip = Ipv4Addr::new(203, 0, 113, 10);
        let pkt = build_selective_redirect(ip);
        assert_eq!(pkt.len(), 0xB0);

        let as_pc = PacketHeader::decode(HeaderKind::Pc, &pkt).unwrap();
        assert_eq!(as_pc.pkt_type, REDIRECT_TYPE);
        assert_eq!(as_pc.pkt_len, 0x00B0);
        assert_eq!(&pkt[4..8], &ip.octets());
        assert_eq!(&pkt[8..10], &9300u16.to_le_bytes());

        let as_dc = PacketHeader::decode(HeaderKind::DcGc, &pkt).unwrap();
        assert_eq!(as_dc.pkt_type, IGNORE_TYPE);
        assert_eq!(as_dc.pkt_len, 0x0019);

        let secondary = PacketHeader::decode(HeaderKind::DcGc, &pkt[0x19..]).unwrap();
        assert_eq!(secondary.pkt_type, IGNORE_TYPE);
        assert_eq!(secondary.pkt_len, 0x0097);
    }
}
