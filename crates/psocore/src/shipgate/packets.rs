// packets.rs -- Shipgate envelope packet bodies.
// Ground truth: original_source/shipgate/src/packets.c

use crate::error::{ProtoError, Result};
use crate::proto::{HeaderKind, PacketHeader};

use super::flags::ShipgateFlags;

pub const SHDR_TYPE_LOGIN: u16 = 0x00;
pub const SHDR_TYPE_DC: u16 = 0x01;
pub const SHDR_TYPE_PC: u16 = 0x02;
pub const SHDR_TYPE_SSTATUS: u16 = 0x03;
pub const SHDR_TYPE_COUNT: u16 = 0x04;
pub const SHDR_TYPE_PING: u16 = 0x05;
pub const SHDR_TYPE_CREQ: u16 = 0x06;
pub const SHDR_TYPE_GMLOGIN: u16 = 0x07;
pub const SHDR_TYPE_ERROR: u16 = 0x08;

pub const CHAR_DATA_LEN: usize = 1052;
const LOGIN_MSG: &[u8] = b"Sylverant Shipgate";

/// Round a shipgate envelope's total length up to the next multiple of
/// 8 (spec.md §3, §4.4, §8). `pkt_len` itself must carry the *padded*
/// value; the padding bytes are left zeroed.
fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

fn write_header(buf: &mut Vec<u8>, pkt_type: u16, flags: ShipgateFlags, total_len: u16) {
    let header = PacketHeader {
        pkt_type,
        flags: flags.bits(),
        pkt_len: total_len,
        unc_len: total_len,
    };
    let mut hdr_bytes = [0u8; 8];
    header
        .encode(HeaderKind::Shipgate, &mut hdr_bytes)
        .expect("fixed-size header");
    buf.extend_from_slice(&hdr_bytes);
}

/// `send_welcome` -- the unencrypted login packet a ship receives right
/// after connecting, carrying the two handshake nonces.
pub fn build_welcome(ship_nonce: [u8; 4], gate_nonce: [u8; 4], version: (u8, u8, u8)) -> Vec<u8> {
    let body_len = 32; // 3 version bytes + 1 pad + 2*4 nonce + 20 message bytes, fixed-size
    let total = 8 + body_len;
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_LOGIN, ShipgateFlags::NO_DEFLATE | ShipgateFlags::NO_ENCRYPT, total as u16);

    buf.push(version.0);
    buf.push(version.1);
    buf.push(version.2);
    buf.push(0); // pad
    buf.extend_from_slice(&ship_nonce);
    buf.extend_from_slice(&gate_nonce);

    let mut msg = [0u8; 20];
    let n = LOGIN_MSG.len().min(20);
    msg[..n].copy_from_slice(&LOGIN_MSG[..n]);
    buf.extend_from_slice(&msg);

    buf
}

/// `forward_dreamcast` / `forward_pc` -- wrap a client packet with the
/// originating ship id and pad to a multiple of 8. The inner packet's
/// own length is carried verbatim (spec.md §8: "inner pkt_len is
/// preserved byte-for-byte").
pub fn build_forward(is_pc: bool, ship_id: u32, inner: &[u8]) -> Result<Vec<u8>> {
    if inner.len() > u16::MAX as usize {
        return Err(ProtoError::Framing("forwarded packet too large"));
    }

    let unpadded = 8 + 4 + inner.len();
    let total = pad8(unpadded);
    let mut buf = vec![0u8; total];

    let pkt_type = if is_pc { SHDR_TYPE_PC } else { SHDR_TYPE_DC };
    let header = PacketHeader {
        pkt_type,
        flags: ShipgateFlags::NO_DEFLATE.bits(),
        pkt_len: total as u16,
        unc_len: total as u16,
    };
    header.encode(HeaderKind::Shipgate, &mut buf[..8])?;
    buf[8..12].copy_from_slice(&ship_id.to_be_bytes());
    buf[12..12 + inner.len()].copy_from_slice(inner);
    Ok(buf)
}

/// Parsed view of a forward envelope's metadata -- the caller re-slices
/// the tail for the embedded client packet.
pub struct ForwardHeader {
    pub is_pc: bool,
    pub ship_id: u32,
}

pub fn parse_forward_header(packet: &[u8]) -> Result<ForwardHeader> {
    if packet.len() < 12 {
        return Err(ProtoError::Framing("forward packet too short"));
    }
    let header = PacketHeader::decode(HeaderKind::Shipgate, packet)?;
    let is_pc = match header.pkt_type {
        SHDR_TYPE_DC => false,
        SHDR_TYPE_PC => true,
        _ => return Err(ProtoError::Framing("not a forward packet")),
    };
    let ship_id = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
    Ok(ForwardHeader { is_pc, ship_id })
}

pub struct ShipStatusInfo<'a> {
    pub name: &'a str,
    pub ship_id: u32,
    pub ext_addr: u32,
    pub int_addr: u32,
    pub port: u16,
    pub up: bool,
    pub flags: u32,
    pub clients: u16,
    pub games: u16,
    pub menu_code: u16,
}

/// `send_ship_status` -- a ship-up/ship-down notification about `info`.
pub fn build_ship_status(info: &ShipStatusInfo) -> Vec<u8> {
    let total = 8 + 32 + 4 + 4 + 4 + 2 + 2 + 4 + 2 + 2 + 2;
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_SSTATUS, ShipgateFlags::NO_DEFLATE, total as u16);

    let mut name = [0u8; 32];
    let bytes = info.name.as_bytes();
    let n = bytes.len().min(32);
    name[..n].copy_from_slice(&bytes[..n]);
    buf.extend_from_slice(&name);

    buf.extend_from_slice(&info.ship_id.to_be_bytes());
    buf.extend_from_slice(&info.ext_addr.to_be_bytes());
    buf.extend_from_slice(&info.int_addr.to_be_bytes());
    buf.extend_from_slice(&info.port.to_be_bytes());
    buf.extend_from_slice(&(if info.up { 1u16 } else { 0u16 }).to_be_bytes());
    buf.extend_from_slice(&info.flags.to_be_bytes());
    buf.extend_from_slice(&info.clients.to_be_bytes());
    buf.extend_from_slice(&info.games.to_be_bytes());
    buf.extend_from_slice(&info.menu_code.to_be_bytes());

    buf
}

/// Owned counterpart to `ShipStatusInfo`, returned by `parse_ship_status`
/// once a status packet has to outlive the buffer it was parsed from --
/// login and ship hold these in their local roster mirrors.
#[derive(Debug, Clone)]
pub struct ParsedShipStatus {
    pub name: String,
    pub ship_id: u32,
    pub ext_addr: u32,
    pub int_addr: u32,
    pub port: u16,
    pub up: bool,
    pub flags: u32,
    pub clients: u16,
    pub games: u16,
    pub menu_code: u16,
}

/// The inverse of `build_ship_status` -- login and ship mirror the
/// shipgate's roster locally rather than querying it per-request
/// (spec.md §4.3, §4.5), so both need to decode what the gate forwards.
pub fn parse_ship_status(packet: &[u8]) -> Result<ParsedShipStatus> {
    const BODY_LEN: usize = 32 + 4 + 4 + 4 + 2 + 2 + 4 + 2 + 2 + 2;
    if packet.len() < 8 + BODY_LEN {
        return Err(ProtoError::Framing("short ship status body"));
    }
    let body = &packet[8..];
    let name_end = body[..32].iter().position(|&b| b == 0).unwrap_or(32);
    let name = String::from_utf8_lossy(&body[..name_end]).into_owned();

    let ship_id = u32::from_be_bytes(body[32..36].try_into().unwrap());
    let ext_addr = u32::from_be_bytes(body[36..40].try_into().unwrap());
    let int_addr = u32::from_be_bytes(body[40..44].try_into().unwrap());
    let port = u16::from_be_bytes(body[44..46].try_into().unwrap());
    let up = u16::from_be_bytes(body[46..48].try_into().unwrap()) != 0;
    let flags = u32::from_be_bytes(body[48..52].try_into().unwrap());
    let clients = u16::from_be_bytes(body[52..54].try_into().unwrap());
    let games = u16::from_be_bytes(body[54..56].try_into().unwrap());
    let menu_code = u16::from_be_bytes(body[56..58].try_into().unwrap());

    Ok(ParsedShipStatus {
        name,
        ship_id,
        ext_addr,
        int_addr,
        port,
        up,
        flags,
        clients,
        games,
        menu_code,
    })
}

/// `send_counts` -- a live client/game count update.
pub fn build_count(ship_id: u32, clients: u16, games: u16) -> Vec<u8> {
    let total = 8 + 4 + 2 + 2;
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_COUNT, ShipgateFlags::NO_DEFLATE, total as u16);
    buf.extend_from_slice(&ship_id.to_be_bytes());
    buf.extend_from_slice(&clients.to_be_bytes());
    buf.extend_from_slice(&games.to_be_bytes());
    buf
}

/// `send_ping` -- never deflated, and on protocol v0 never encrypted
/// either (spec.md §4.4).
pub fn build_ping(is_reply: bool) -> Vec<u8> {
    let total = 8u16;
    let mut flags = ShipgateFlags::NO_DEFLATE;
    if is_reply {
        flags |= ShipgateFlags::RESPONSE;
    }
    let mut buf = Vec::with_capacity(total as usize);
    write_header(&mut buf, SHDR_TYPE_PING, flags, total);
    buf
}

/// `send_cdata` -- character-data restore, always a `RESPONSE`.
pub fn build_char_data(guildcard: u32, slot: u32, data: &[u8; CHAR_DATA_LEN]) -> Vec<u8> {
    let total = 8 + 4 + 4 + 4 + CHAR_DATA_LEN;
    let mut buf = Vec::with_capacity(total);
    write_header(
        &mut buf,
        SHDR_TYPE_CREQ,
        ShipgateFlags::NO_DEFLATE | ShipgateFlags::RESPONSE,
        total as u16,
    );
    buf.extend_from_slice(&guildcard.to_be_bytes());
    buf.extend_from_slice(&slot.to_be_bytes());
    buf.extend_from_slice(&[0u8; 4]); // padding
    buf.extend_from_slice(data);
    buf
}

/// `send_creq` -- a ship's request that the gateway restore a
/// character slot on behalf of a reconnecting client (spec.md §4.5:
/// "forwards account-critical packets ... character data requests").
pub fn build_char_data_request(guildcard: u32, slot: u32) -> Vec<u8> {
    let total = 8 + 4 + 4;
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_CREQ, ShipgateFlags::NO_DEFLATE, total as u16);
    buf.extend_from_slice(&guildcard.to_be_bytes());
    buf.extend_from_slice(&slot.to_be_bytes());
    buf
}

pub struct CharDataRequest {
    pub guildcard: u32,
    pub slot: u32,
}

/// The gateway's side of `build_char_data_request` -- the reply is
/// distinguished by carrying `RESPONSE` and the 1052-byte blob.
pub fn parse_char_data_request(packet: &[u8]) -> Result<CharDataRequest> {
    if packet.len() < 16 {
        return Err(ProtoError::Framing("short char data request"));
    }
    Ok(CharDataRequest {
        guildcard: u32::from_be_bytes(packet[8..12].try_into().unwrap()),
        slot: u32::from_be_bytes(packet[12..16].try_into().unwrap()),
    })
}

/// The owned counterpart to `build_char_data`, parsed by the ship once
/// the gateway's `CREQ` reply comes back.
pub fn parse_char_data_reply(packet: &[u8]) -> Result<(u32, u32, [u8; CHAR_DATA_LEN])> {
    const BODY_LEN: usize = 4 + 4 + 4 + CHAR_DATA_LEN;
    if packet.len() < 8 + BODY_LEN {
        return Err(ProtoError::Framing("short char data reply"));
    }
    let guildcard = u32::from_be_bytes(packet[8..12].try_into().unwrap());
    let slot = u32::from_be_bytes(packet[12..16].try_into().unwrap());
    let mut data = [0u8; CHAR_DATA_LEN];
    data.copy_from_slice(&packet[20..20 + CHAR_DATA_LEN]);
    Ok((guildcard, slot, data))
}

/// `send_gmlogin` -- a ship's forwarded GM-authorization check for a
/// client that just presented GM credentials (spec.md §4.5).
pub fn build_gm_login_request(guildcard: u32, block: u32) -> Vec<u8> {
    let total = 8 + 4 + 4;
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_GMLOGIN, ShipgateFlags::NO_DEFLATE, total as u16);
    buf.extend_from_slice(&guildcard.to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    buf
}

pub struct GmLoginRequest {
    pub guildcard: u32,
    pub block: u32,
}

pub fn parse_gm_login_request(packet: &[u8]) -> Result<GmLoginRequest> {
    if packet.len() < 16 {
        return Err(ProtoError::Framing("short gm login request"));
    }
    Ok(GmLoginRequest {
        guildcard: u32::from_be_bytes(packet[8..12].try_into().unwrap()),
        block: u32::from_be_bytes(packet[12..16].try_into().unwrap()),
    })
}

/// The owned counterpart to `build_gm_login_reply`.
pub fn parse_gm_login_reply(packet: &[u8]) -> Result<(u32, u32, bool, u8)> {
    if packet.len() < 8 + 4 + 4 + 1 {
        return Err(ProtoError::Framing("short gm login reply"));
    }
    let header = PacketHeader::decode(HeaderKind::Shipgate, packet)?;
    let guildcard = u32::from_be_bytes(packet[8..12].try_into().unwrap());
    let block = u32::from_be_bytes(packet[12..16].try_into().unwrap());
    let good = header.flags & ShipgateFlags::RESPONSE.bits() != 0;
    let privilege = packet[16];
    Ok((guildcard, block, good, privilege))
}

/// `send_gmreply` -- success/failure encoded in the envelope flags.
pub fn build_gm_login_reply(guildcard: u32, block: u32, good: bool, privilege: u8) -> Vec<u8> {
    let total = 8 + 4 + 4 + 1 + 3;
    let mut flags = ShipgateFlags::NO_DEFLATE;
    flags |= if good {
        ShipgateFlags::RESPONSE
    } else {
        ShipgateFlags::FAILURE
    };
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_GMLOGIN, flags, total as u16);
    buf.extend_from_slice(&guildcard.to_be_bytes());
    buf.extend_from_slice(&block.to_be_bytes());
    buf.push(privilege);
    buf.extend_from_slice(&[0u8; 3]);
    buf
}

/// Minimum shipgate protocol version the error packet requires
/// (spec.md §4.4: "only valid when peer proto_ver >= 1").
pub const ERROR_MIN_PROTO_VER: u16 = 1;

/// `send_error` -- silently a no-op (returns `Ok(None)`) against a peer
/// whose `proto_ver` predates the feature, per spec.md §4.4/§7.
pub fn build_error(peer_proto_ver: u16, error_code: u32, data: &[u8]) -> Result<Option<Vec<u8>>> {
    if peer_proto_ver < ERROR_MIN_PROTO_VER {
        return Ok(None);
    }
    if data.len() > 65536 - 12 {
        return Err(ProtoError::Framing("error packet payload too large"));
    }

    let total = 8 + 4 + data.len();
    let mut buf = Vec::with_capacity(total);
    write_header(&mut buf, SHDR_TYPE_ERROR, ShipgateFlags::NO_DEFLATE, total as u16);
    buf.extend_from_slice(&error_code.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_packet_pads_to_multiple_of_8() {
        let inner = vec![0u8; 5]; // 12 + 5 = 17, pads to 24
        let pkt = build_forward(false, 7, &inner).unwrap();
        assert_eq!(pkt.len() % 8, 0);
        assert_eq!(pkt.len(), 24);

        let parsed = parse_forward_header(&pkt).unwrap();
        assert!(!parsed.is_pc);
        assert_eq!(parsed.ship_id, 7);
    }

    #[test]
    fn forward_packet_already_aligned_is_not_padded_further() {
        // 8 header + 4 ship_id + 4 inner = 16, already a multiple of 8.
        let inner = vec![0xAAu8; 4];
        let pkt = build_forward(true, 1, &inner).unwrap();
        assert_eq!(pkt.len(), 16);
    }

    #[test]
    fn error_packet_silently_absent_for_old_peers() {
        assert!(build_error(0, 1, &[]).unwrap().is_none());
        assert!(build_error(1, 1, &[]).unwrap().is_some());
    }

    #[test]
    fn ship_status_round_trips_through_build_and_parse() {
        let info = ShipStatusInfo {
            name: "Ship01",
            ship_id: 3,
            ext_addr: 0x0A000001,
            int_addr: 0x0A000002,
            port: 5900,
            up: true,
            flags: 0,
            clients: 12,
            games: 4,
            menu_code: 0,
        };
        let pkt = build_ship_status(&info);
        let parsed = parse_ship_status(&pkt).unwrap();
        assert_eq!(parsed.name, "Ship01");
        assert_eq!(parsed.ship_id, 3);
        assert_eq!(parsed.ext_addr, 0x0A000001);
        assert!(parsed.up);
        assert_eq!(parsed.clients, 12);
        assert_eq!(parsed.games, 4);
    }

    #[test]
    fn ping_is_never_deflated() {
        let ping = build_ping(false);
        let header = PacketHeader::decode(HeaderKind::Shipgate, &ping).unwrap();
        assert_eq!(header.flags & ShipgateFlags::NO_DEFLATE.bits(), ShipgateFlags::NO_DEFLATE.bits());
        assert_eq!(header.pkt_len, header.unc_len);
    }

    #[test]
    fn char_data_request_round_trips() {
        let pkt = build_char_data_request(42, 1);
        let parsed = parse_char_data_request(&pkt).unwrap();
        assert_eq!(parsed.guildcard, 42);
        assert_eq!(parsed.slot, 1);
    }

    #[test]
    fn char_data_reply_round_trips_through_build_and_parse() {
        let data = [0x7Fu8; CHAR_DATA_LEN];
        let pkt = build_char_data(42, 1, &data);
        let (gc, slot, parsed) = parse_char_data_reply(&pkt).unwrap();
        assert_eq!(gc, 42);
        assert_eq!(slot, 1);
        assert_eq!(parsed, data);
    }

    #[test]
    fn gm_login_request_round_trips() {
        let pkt = build_gm_login_request(7, 2);
        let parsed = parse_gm_login_request(&pkt).unwrap();
        assert_eq!(parsed.guildcard, 7);
        assert_eq!(parsed.block, 2);
    }

    #[test]
    fn gm_login_reply_encodes_success_in_flags() {
        let good = build_gm_login_reply(7, 2, true, 3);
        let (gc, block, ok, priv_) = parse_gm_login_reply(&good).unwrap();
        assert_eq!((gc, block, ok, priv_), (7, 2, true, 3));

        let bad = build_gm_login_reply(7, 2, false, 0);
        let (_, _, ok, _) = parse_gm_login_reply(&bad).unwrap();
        assert!(!ok);
    }
}
