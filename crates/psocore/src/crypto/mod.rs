// crypto/mod.rs -- Per-client and per-ship cipher state.
//
// Every connection owns two independent cipher states (read, write).
// `CipherPair` is the only place either is constructed so a caller
// cannot accidentally share one across directions.

mod md5_auth;
mod pc_cipher;
mod rc4;

pub use md5_auth::{salted_password_digest, verify_password};
pub use pc_cipher::PcCipherState;
pub use rc4::Rc4State;

/// Which cipher a connection negotiated. DC/GC and the shipgate link
/// use RC4; PC clients use their own keystream cipher.
pub enum Cipher {
    Rc4(Rc4State),
    Pc(PcCipherState),
}

impl Cipher {
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            Cipher::Rc4(s) => s.apply(data),
            Cipher::Pc(s) => s.apply(data),
        }
    }
}

/// The two independent directions of cipher state a connection owns
/// once its session key is set. `None` until the key-setting packet
/// (welcome / shipgate login) has been processed.
#[derive(Default)]
pub struct CipherPair {
    read: Option<Cipher>,
    write: Option<Cipher>,
    pub key_set: bool,
}

impl CipherPair {
    pub fn set(&mut self, read: Cipher, write: Cipher) {
        self.read = Some(read);
        self.write = Some(write);
        self.key_set = true;
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        if let Some(c) = self.read.as_mut() {
            c.apply(data);
        }
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        if let Some(c) = self.write.as_mut() {
            c.apply(data);
        }
    }
}
