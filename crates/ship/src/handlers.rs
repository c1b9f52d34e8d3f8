// handlers.rs -- Per-block client packet dispatch.
// Ground truth: original_source/trunk/ship_server/src/ship_packets.h
// for the wire shapes this switches on, and spec.md §4.5 for the three
// things the ship service itself owns: block login, the forwarded
// account-critical packets, and bug-report capture.

use std::io::{Read, Write};

use psocore::bugreport::BUG_REPORT_GUILDCARD;
use psocore::client::{Client, ClientVariant};
use psocore::error::{ProtoError, Result};
use psocore::proto::PacketHeader;

use crate::packets::{self, send_security};

/// What `dispatch` did with one decoded packet: either it already
/// handled everything itself, the client just completed block login
/// (the caller still owns telling the shipgate about it), or the
/// caller needs to run a job that crosses a suspension point (shipgate
/// round trip, disk write) the reactor thread must not block on.
pub enum DispatchOutcome {
    Handled,
    LoggedIn { guildcard: u32 },
    NeedsCharDataRequest { guildcard: u32, slot: u32 },
    NeedsBugReportWrite { guildcard: u32, body: Vec<u8> },
}

/// `guildcard` sits right after the 4-byte `tag` field in both the v1
/// and v2/PC block-login bodies (ground truth: `dc_login_pkt` /
/// `dcv2_login_pkt`).
fn parse_block_login(body: &[u8]) -> Result<u32> {
    if body.len() < 8 {
        return Err(ProtoError::Framing("short block login body"));
    }
    Ok(u32::from_le_bytes(body[4..8].try_into().unwrap()))
}

/// A client's saved-character restore request: just the slot it wants
/// restored, forwarded to the shipgate as `CREQ` (spec.md §4.5).
fn parse_char_data_request(body: &[u8]) -> Result<u32> {
    if body.len() < 4 {
        return Err(ProtoError::Framing("short char data request body"));
    }
    Ok(u32::from_le_bytes(body[0..4].try_into().unwrap()))
}

/// Parsed view of a simple-mail packet (spec.md §4.5 bug-report
/// capture). `body` is the sender's ordinary chat text -- UTF-16LE for
/// PC, 8-bit for DC/GC -- transcoding is the caller's job.
struct SimpleMail<'a> {
    gc_dest: u32,
    body: &'a [u8],
}

/// Byte offsets of `gc_dest` within the full packet (including the
/// 4-byte client header) differ between the DC/GC and PC mail bodies
/// because PC's sender name field is UTF-16 (ground truth:
/// `dc_simple_mail_pkt`/`pc_simple_mail_pkt`, `gc_dest` sits right
/// after a 16-char name field that is 2x as wide on PC).
fn parse_simple_mail(is_pc: bool, packet: &[u8]) -> Result<SimpleMail<'_>> {
    let (gc_dest_off, body_off) = if is_pc { (44, 48) } else { (28, 32) };
    if packet.len() < body_off {
        return Err(ProtoError::Framing("short simple mail packet"));
    }
    let gc_dest = u32::from_le_bytes(packet[gc_dest_off..gc_dest_off + 4].try_into().unwrap());
    Ok(SimpleMail {
        gc_dest,
        body: &packet[body_off..],
    })
}

/// Top-level dispatch for one decoded ship-service packet.
pub fn dispatch<S: Read + Write>(client: &mut Client<S>, packet: &[u8]) -> Result<DispatchOutcome> {
    let kind = client.variant.header_kind();
    let header = PacketHeader::decode(kind, packet)?;
    let body = &packet[kind.len()..];

    match header.pkt_type {
        packets::BLOCK_LOGIN_TYPE | packets::BLOCK_LOGIN_V2_TYPE => {
            let guildcard = parse_block_login(body)?;
            client.guildcard = guildcard;
            send_security(client, guildcard)?;
            Ok(DispatchOutcome::LoggedIn { guildcard })
        }
        packets::INFO_REQUEST_TYPE => {
            packets::send_info_reply(client, "Nothing here.")?;
            Ok(DispatchOutcome::Handled)
        }
        packets::CHAR_DATA_REQUEST_TYPE => {
            let slot = parse_char_data_request(body)?;
            Ok(DispatchOutcome::NeedsCharDataRequest {
                guildcard: client.guildcard,
                slot,
            })
        }
        packets::GUILD_SEARCH_TYPE => {
            // Cross-ship guildcard search is game logic the ship
            // forwards to the shipgate verbatim; the search result
            // itself is out of scope (spec.md §1 Non-goals).
            Ok(DispatchOutcome::Handled)
        }
        packets::SIMPLE_MAIL_TYPE => {
            let is_pc = client.variant == ClientVariant::Pc;
            let mail = parse_simple_mail(is_pc, packet)?;
            if mail.gc_dest == BUG_REPORT_GUILDCARD {
                let body = if is_pc {
                    psocore::bugreport::transcode_pc_body(mail.body)
                } else {
                    mail.body.to_vec()
                };
                Ok(DispatchOutcome::NeedsBugReportWrite {
                    guildcard: client.guildcard,
                    body,
                })
            } else {
                Ok(DispatchOutcome::Handled)
            }
        }
        other => {
            tracing::warn!(pkt_type = other, "unhandled ship packet type");
            Ok(DispatchOutcome::Handled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_login_extracts_guildcard_after_the_tag() {
        let mut body = vec![0u8; 8];
        body[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(parse_block_login(&body).unwrap(), 99);
    }

    #[test]
    fn block_login_rejects_short_bodies() {
        assert!(matches!(
            parse_block_login(&[0u8; 4]),
            Err(ProtoError::Framing(_))
        ));
    }

    #[test]
    fn char_data_request_reads_the_slot() {
        let body = 3u32.to_le_bytes();
        assert_eq!(parse_char_data_request(&body).unwrap(), 3);
    }

    #[test]
    fn simple_mail_to_bug_report_guildcard_is_detected_on_dc() {
        let mut packet = vec![0u8; 40];
        packet[28..32].copy_from_slice(&BUG_REPORT_GUILDCARD.to_le_bytes());
        packet[32..36].copy_from_slice(b"oops");
        let mail = parse_simple_mail(false, &packet).unwrap();
        assert_eq!(mail.gc_dest, BUG_REPORT_GUILDCARD);
        assert_eq!(&mail.body[..4], b"oops");
    }

    #[test]
    fn simple_mail_to_bug_report_guildcard_is_detected_on_pc() {
        let mut packet = vec![0u8; 52];
        packet[44..48].copy_from_slice(&BUG_REPORT_GUILDCARD.to_le_bytes());
        let mail = parse_simple_mail(true, &packet).unwrap();
        assert_eq!(mail.gc_dest, BUG_REPORT_GUILDCARD);
    }

    #[test]
    fn simple_mail_to_an_ordinary_player_is_not_flagged() {
        let mut packet = vec![0u8; 40];
        packet[28..32].copy_from_slice(&1234u32.to_le_bytes());
        let mail = parse_simple_mail(false, &packet).unwrap();
        assert_ne!(mail.gc_dest, BUG_REPORT_GUILDCARD);
    }
}
