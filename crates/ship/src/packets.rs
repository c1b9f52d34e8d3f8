// packets.rs -- Wire packets the ship service sends to its own
// clients. Ground truth: original_source/trunk/ship_server/src/ship_packets.h
// for every numeric type id; body shapes mirror the login service's
// own login/security/info packets since they share the same DC/PC/GC
// header family (spec.md §4.1).

use std::io::{Read, Write};

use psocore::client::Client;
use psocore::error::Result;
use psocore::proto::{HeaderKind, PacketHeader};
use psocore::shipgate::CHAR_DATA_LEN;

pub const BLOCK_LOGIN_TYPE: u16 = 0x93;
pub const BLOCK_LOGIN_V2_TYPE: u16 = 0x9D;
pub const DC_SECURITY_TYPE: u16 = 0x04;
pub const INFO_REQUEST_TYPE: u16 = 0x09;
pub const INFO_REPLY_TYPE: u16 = 0x11;
pub const MSG_BOX_TYPE: u16 = 0x1A;
pub const GUILD_SEARCH_TYPE: u16 = 0x40;
pub const CHAR_DATA_REQUEST_TYPE: u16 = 0x95;
pub const CHAR_DATA_TYPE: u16 = 0x61;
pub const SIMPLE_MAIL_TYPE: u16 = 0x81;

/// `send_security` -- the ship-side echo of login's own
/// `send_dc_security`: proves the block accepted the guildcard this
/// client presented.
pub fn send_security<S: Read + Write>(client: &mut Client<S>, guildcard: u32) -> Result<()> {
    const SECURITY_DATA_LEN: usize = 40;
    let kind = client.variant.header_kind();
    let total = kind.len() + 4 + SECURITY_DATA_LEN + 4;
    let header = PacketHeader {
        pkt_type: DC_SECURITY_TYPE,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");
    buf[kind.len()..kind.len() + 4].copy_from_slice(&guildcard.to_le_bytes());
    client.send_raw(&mut buf)
}

fn send_message_box<S: Read + Write>(client: &mut Client<S>, pkt_type: u16, message: &str) -> Result<()> {
    let kind = client.variant.header_kind();
    let mut body: Vec<u8> = message.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    body.extend_from_slice(&[0, 0]);
    let total = kind.len() + body.len();
    let header = PacketHeader {
        pkt_type,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");
    buf[kind.len()..].copy_from_slice(&body);
    client.send_raw(&mut buf)
}

/// `send_info_reply` -- one-way informational text, reused as the
/// failure channel for a bug report that could not be written
/// (spec.md §4.5, §7: "reported back as in-game text; no retry").
pub fn send_info_reply<S: Read + Write>(client: &mut Client<S>, message: &str) -> Result<()> {
    send_message_box(client, INFO_REPLY_TYPE, message)
}

/// `send_char_data` -- relays the shipgate's `CREQ` reply blob straight
/// through to the client that asked for it.
pub fn send_char_data<S: Read + Write>(client: &mut Client<S>, data: &[u8; CHAR_DATA_LEN]) -> Result<()> {
    let kind = client.variant.header_kind();
    let total = kind.len() + CHAR_DATA_LEN;
    let header = PacketHeader {
        pkt_type: CHAR_DATA_TYPE,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");
    buf[kind.len()..].copy_from_slice(data);
    client.send_raw(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_packet_carries_guildcard_right_after_the_header() {
        let kind = HeaderKind::DcGc;
        let total = kind.len() + 4 + 40 + 4;
        let header = PacketHeader {
            pkt_type: DC_SECURITY_TYPE,
            flags: 0,
            pkt_len: total as u16,
            unc_len: 0,
        };
        let mut buf = vec![0u8; total];
        header.encode(kind, &mut buf[..kind.len()]).unwrap();
        buf[kind.len()..kind.len() + 4].copy_from_slice(&77u32.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes(buf[kind.len()..kind.len() + 4].try_into().unwrap()),
            77
        );
    }
}
