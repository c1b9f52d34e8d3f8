// shipgate/mod.rs -- The federation link between login/ship servers.
//
// Ground truth: original_source/shipgate/src/packets.c and spec.md §4.4.

pub mod client;
pub mod flags;
pub mod packets;
pub mod roster;

pub use client::{parse_welcome, respond_to_welcome, GateWelcome};
pub use flags::{ShipCapFlags, ShipgateFlags};
pub use packets::{
    build_char_data, build_char_data_request, build_count, build_error, build_forward,
    build_gm_login_reply, build_gm_login_request, build_ping, build_ship_status, build_welcome,
    parse_char_data_reply, parse_char_data_request, parse_forward_header, parse_gm_login_reply,
    parse_gm_login_request, parse_ship_status, CharDataRequest, ForwardHeader, GmLoginRequest,
    ParsedShipStatus, ShipStatusInfo, CHAR_DATA_LEN, ERROR_MIN_PROTO_VER,
};
pub use roster::{ShipRecord, ShipRoster};

use rand::RngCore;

/// A fresh 4-byte nonce for one side of the login handshake
/// (spec.md §4.4, §8 scenario 3). Grounded on `redirector.c`'s use of
/// `rand()` for one-shot per-connection values, generalized to the
/// crate's shared `rand` dependency instead of libc's weaker `rand()`.
pub fn fresh_nonce() -> [u8; 4] {
    let mut nonce = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Mix the ship- and gate-provided nonces into the RC4 key used for the
/// remainder of a shipgate session, the way the client/server halves of
/// every other connection in this crate derive a shared cipher key from
/// two numbers exchanged in the clear during the welcome handshake.
pub fn mix_handshake_key(ship_nonce: [u8; 4], gate_nonce: [u8; 4]) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&ship_nonce);
    key[4..].copy_from_slice(&gate_nonce);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_key_concatenates_both_nonces_in_order() {
        let key = mix_handshake_key([1, 2, 3, 4], [5, 6, 7, 8]);
        assert_eq!(key, [1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
