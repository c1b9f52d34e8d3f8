// client.rs -- The ship/login half of the shipgate handshake.
//
// Both the login service and the ship service dial out to the shipgate
// and complete the same handshake (spec.md §4.4): read the gate's
// unencrypted welcome, mint a fresh nonce of our own, derive the RC4
// session key from the two nonces, and echo a login reply built with
// the same wire shape the welcome used, just with the roles of
// `ship_nonce`/`gate_nonce` filled in from our side.

use crate::crypto::{Cipher, CipherPair, Rc4State};
use crate::error::{ProtoError, Result};
use crate::proto::{HeaderKind, PacketHeader};

use super::packets::{build_welcome, SHDR_TYPE_LOGIN};
use super::{fresh_nonce, mix_handshake_key};

/// The gate's nonce plus protocol version, pulled out of its welcome
/// packet. The ship-side handshake needs nothing else to reply.
pub struct GateWelcome {
    pub gate_nonce: [u8; 4],
    pub version: (u8, u8, u8),
}

/// Parse the welcome packet a fresh shipgate connection receives
/// before any cipher is negotiated. Layout matches `build_welcome`:
/// `{header(8), version(3), pad(1), ship_nonce(4), gate_nonce(4), msg(20)}`.
pub fn parse_welcome(packet: &[u8]) -> Result<GateWelcome> {
    let header = PacketHeader::decode(HeaderKind::Shipgate, packet)?;
    if header.pkt_type != SHDR_TYPE_LOGIN {
        return Err(ProtoError::Framing("expected shipgate welcome packet"));
    }
    if packet.len() < 8 + 20 {
        return Err(ProtoError::Framing("short shipgate welcome body"));
    }

    Ok(GateWelcome {
        version: (packet[8], packet[9], packet[10]),
        gate_nonce: [packet[16], packet[17], packet[18], packet[19]],
    })
}

/// Complete the handshake: mint our own nonce, derive the session
/// cipher, and build the login-reply packet to send back. Returns the
/// reply bytes and the `CipherPair` both directions should use from
/// the next packet onward (spec.md §4.4: "from the next packet on,
/// both directions encrypt the post-header body").
pub fn respond_to_welcome(welcome: &GateWelcome) -> (Vec<u8>, CipherPair) {
    let ship_nonce = fresh_nonce();
    let key = mix_handshake_key(ship_nonce, welcome.gate_nonce);

    let reply = build_welcome(ship_nonce, welcome.gate_nonce, welcome.version);

    let mut cipher = CipherPair::default();
    cipher.set(
        Cipher::Rc4(Rc4State::new(&key)),
        Cipher::Rc4(Rc4State::new(&key)),
    );

    (reply, cipher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_gate_and_ship_halves() {
        let gate_nonce = fresh_nonce();
        let welcome_pkt = build_welcome([0; 4], gate_nonce, (1, 0, 0));

        let parsed = parse_welcome(&welcome_pkt).unwrap();
        assert_eq!(parsed.gate_nonce, gate_nonce);

        let (reply, mut ship_cipher) = respond_to_welcome(&parsed);
        let header = PacketHeader::decode(HeaderKind::Shipgate, &reply).unwrap();
        assert_eq!(header.pkt_type, SHDR_TYPE_LOGIN);

        // The gate side derives the identical key from the nonce it
        // reads back out of the reply plus the one it generated itself.
        let ship_nonce_from_reply = [reply[12], reply[13], reply[14], reply[15]];
        let key = mix_handshake_key(ship_nonce_from_reply, gate_nonce);
        let mut gate_cipher = CipherPair::default();
        gate_cipher.set(
            Cipher::Rc4(Rc4State::new(&key)),
            Cipher::Rc4(Rc4State::new(&key)),
        );

        let mut body = b"after handshake".to_vec();
        ship_cipher.encrypt(&mut body);
        gate_cipher.decrypt(&mut body);
        assert_eq!(&body, b"after handshake");
    }
}
