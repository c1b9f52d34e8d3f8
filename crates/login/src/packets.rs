// packets.rs -- Wire packets the login service sends and parses.
// Ground truth: original_source/trunk/login_server/src/dclogin.c names
// every one of these by the handler that builds or consumes it; the
// numeric packet-type table itself follows the DC/PC/GC login
// protocol's well-known ids.

use std::io::{Read, Write};

use psocore::client::Client;
use psocore::error::Result;
use psocore::proto::{HeaderKind, PacketHeader};
use psocore::quests::{Quest, QuestCategory};

pub const LOGIN0_TYPE: u16 = 0x17;
pub const LOGIN2_TYPE: u16 = 0x02;
pub const CLIENT_LOGIN_TYPE: u16 = 0x90;
pub const DCV2_LOGINA_TYPE: u16 = 0x9D;
pub const DC_CHECKSUM_TYPE: u16 = 0x96;
pub const DC_CHECKSUM_REPLY_TYPE: u16 = 0x97;
pub const TIMESTAMP_TYPE: u16 = 0xB1;
pub const SHIP_LIST_REQ_TYPE: u16 = 0x05;
pub const SHIP_LIST_TYPE: u16 = 0xA0;
pub const INFO_REQUEST_TYPE: u16 = 0x1F;
pub const SHIP_SELECT_TYPE: u16 = 0x10;
pub const GC_VERIFY_LICENSE_TYPE: u16 = 0xDB;
pub const GC_LOGINC_TYPE: u16 = 0x9A;
pub const GC_LOGINE_TYPE: u16 = 0x9C;
pub const LOGIND_TYPE: u16 = 0x9E;
pub const DC_SECURITY_TYPE: u16 = 0x04;
pub const MSG_BOX_TYPE: u16 = 0x1A;
pub const QUEST_LIST_TYPE: u16 = 0xA2;
pub const REDIRECT_TYPE: u16 = psocore::proto::redirect::REDIRECT_TYPE;

/// `send_simple` -- a fixed 4-byte-body ack carrying one flag word.
/// Used for `LOGIN0`/`LOGIN2`/checksum acks and the GC `LOGINA`/`LOGINC`
/// pass/fail replies (spec.md §8 scenarios 3, 4).
pub fn build_simple(kind: HeaderKind, pkt_type: u16, flag: u32) -> Vec<u8> {
    let total = kind.len() + 4;
    let header = PacketHeader {
        pkt_type,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");
    buf[kind.len()..].copy_from_slice(&flag.to_le_bytes());
    buf
}

pub fn send_simple<S: Read + Write>(client: &mut Client<S>, pkt_type: u16, flag: u32) -> Result<()> {
    let mut pkt = build_simple(client.variant.header_kind(), pkt_type, flag);
    client.send_raw(&mut pkt)
}

const SECURITY_DATA_LEN: usize = 40;

/// `send_dc_security` -- hands the client its guildcard once it has
/// passed whichever login check applied (spec.md §4.3). `security_data`
/// is an opaque blob the real protocol round-trips; callers that have
/// none pass an all-zero one, matching `send_dc_security(c, gc, NULL, 0)`.
pub fn send_dc_security<S: Read + Write>(
    client: &mut Client<S>,
    guildcard: u32,
    security_data: Option<&[u8]>,
    team_id: u32,
) -> Result<()> {
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

    let mut offset = kind.len();
    buf[offset..offset + 4].copy_from_slice(&guildcard.to_le_bytes());
    offset += 4;
    if let Some(data) = security_data {
        let n = data.len().min(SECURITY_DATA_LEN);
        buf[offset..offset + n].copy_from_slice(&data[..n]);
    }
    offset += SECURITY_DATA_LEN;
    buf[offset..offset + 4].copy_from_slice(&team_id.to_le_bytes());

    client.send_raw(&mut buf)
}

/// `send_timestamp` -- an ASCII `YYYY:MM:DD: HH:MM:SS.mmm` string body,
/// padded with a NUL terminator.
pub fn send_timestamp<S: Read + Write>(client: &mut Client<S>, stamp: &str) -> Result<()> {
    let kind = client.variant.header_kind();
    let mut body = stamp.as_bytes().to_vec();
    body.push(0);
    let total = kind.len() + body.len();
    let header = PacketHeader {
        pkt_type: TIMESTAMP_TYPE,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");
    buf[kind.len()..].copy_from_slice(&body);
    client.send_raw(&mut buf)
}

/// `send_info_reply` -- a one-way informational text box.
pub fn send_info_reply<S: Read + Write>(client: &mut Client<S>, message: &str) -> Result<()> {
    send_message_box(client, MSG_BOX_TYPE, message)
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

/// One entry in the ship-select menu (spec.md §4.3 "serves the ship
/// list"). Matches the live roster fields a client actually needs to
/// render a menu: id, display name, and current load.
pub struct ShipMenuEntry {
    pub ship_id: u32,
    pub name: String,
    pub clients: u16,
}

/// `send_ship_list` -- one fixed-size entry per live ship, menu id
/// `0x0001` throughout (the login service's only menu).
pub fn send_ship_list<S: Read + Write>(client: &mut Client<S>, ships: &[ShipMenuEntry]) -> Result<()> {
    const ENTRY_LEN: usize = 4 + 4 + 32 + 2;
    let kind = client.variant.header_kind();
    let total = kind.len() + ships.len() * ENTRY_LEN;
    let header = PacketHeader {
        pkt_type: SHIP_LIST_TYPE,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");

    let mut offset = kind.len();
    for entry in ships {
        buf[offset..offset + 4].copy_from_slice(&0x0001u32.to_le_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&entry.ship_id.to_le_bytes());
        offset += 4;
        let name_bytes = entry.name.as_bytes();
        let n = name_bytes.len().min(32);
        buf[offset..offset + n].copy_from_slice(&name_bytes[..n]);
        offset += 32;
        buf[offset..offset + 2].copy_from_slice(&entry.clients.to_le_bytes());
        offset += 2;
    }

    client.send_raw(&mut buf)
}

/// `send_quest_list` -- one fixed-size entry per quest in `category`
/// (spec.md §3 "Quest list ... ordered quests identified by numeric
/// menu/item ids").
pub fn send_quest_list<S: Read + Write>(client: &mut Client<S>, category: &QuestCategory) -> Result<()> {
    const ENTRY_LEN: usize = 4 + 4 + 32 + 112;
    let kind = client.variant.header_kind();
    let total = kind.len() + category.quests.len() * ENTRY_LEN;
    let header = PacketHeader {
        pkt_type: QUEST_LIST_TYPE,
        flags: 0,
        pkt_len: total as u16,
        unc_len: 0,
    };
    let mut buf = vec![0u8; total];
    header.encode(kind, &mut buf[..kind.len()]).expect("fixed-size header");

    let mut offset = kind.len();
    for quest in &category.quests {
        write_quest_entry(&mut buf[offset..offset + ENTRY_LEN], quest);
        offset += ENTRY_LEN;
    }

    client.send_raw(&mut buf)
}

fn write_quest_entry(out: &mut [u8], quest: &Quest) {
    out[0..4].copy_from_slice(&quest.menu_id.to_le_bytes());
    out[4..8].copy_from_slice(&quest.item_id.to_le_bytes());
    let name = quest.name.as_bytes();
    let n = name.len().min(32);
    out[8..8 + n].copy_from_slice(&name[..n]);
    let desc = quest.description.as_bytes();
    let n = desc.len().min(112);
    out[40..40 + n].copy_from_slice(&desc[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use psocore::proto::HeaderKind;

    #[test]
    fn simple_packet_round_trips_flag() {
        let pkt = build_simple(HeaderKind::DcGc, LOGIN0_TYPE, 1);
        assert_eq!(pkt.len(), 8);
        let header = PacketHeader::decode(HeaderKind::DcGc, &pkt).unwrap();
        assert_eq!(header.pkt_type, LOGIN0_TYPE);
        assert_eq!(u32::from_le_bytes(pkt[4..8].try_into().unwrap()), 1);
    }

    #[test]
    fn gc_verify_license_success_flag_matches_loginc_ack() {
        let pkt = build_simple(HeaderKind::DcGc, GC_LOGINC_TYPE, 1);
        let header = PacketHeader::decode(HeaderKind::DcGc, &pkt).unwrap();
        assert_eq!(header.pkt_type, GC_LOGINC_TYPE);
    }
}
