// rc4.rs -- Streaming RC4 for DC/GC clients and the shipgate link.
// Converted from the Sylverant redirector/shipgate/login RC4 usage.
// Now delegates to the `rc4` crate (RustCrypto) for the keystream.

use rc4::{consts::U32, KeyInit, Rc4, StreamCipher};

/// One direction's worth of RC4 state. A client or ship connection owns
/// two of these -- one per direction -- and must never share one
/// between them (Design Note: mixing the two streams silently corrupts
/// the stream after the first odd-length packet).
pub struct Rc4State {
    cipher: Rc4<U32>,
}

impl Rc4State {
    /// `key` is zero-padded/truncated to the fixed 32-byte key size RC4
    /// is instantiated with here; PSO's key is the 4-byte client seed
    /// plus whatever the caller mixes in (e.g. the shipgate shared
    /// secret and nonce pair).
    pub fn new(key: &[u8]) -> Self {
        let mut padded = [0u8; 32];
        let n = key.len().min(32);
        padded[..n].copy_from_slice(&key[..n]);
        Self {
            cipher: Rc4::new_from_slice(&padded).expect("rc4 key length"),
        }
    }

    /// Decrypt/encrypt in place. RC4 is a symmetric keystream, so the
    /// same call does both directions' work.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = [1, 2, 3, 4];
        let mut enc = Rc4State::new(&key);
        let mut dec = Rc4State::new(&key);

        let original = b"hello shipgate".to_vec();
        let mut buf = original.clone();
        enc.apply(&mut buf);
        assert_ne!(buf, original);
        dec.apply(&mut buf);
        assert_eq!(buf, original);
    }
}
