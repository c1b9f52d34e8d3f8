// md5_auth.rs -- GC salted-password check.
// Converted from: original_source/trunk/login_server (VERIFY_LICENSE path).
// Delegates to the `md-5` crate (RustCrypto).

use md5::{Digest, Md5};

/// Compute `lowercase_hex(md5(password || "_" || regtime || "_salt"))`,
/// the digest format the GC license check compares against the stored
/// account row.
pub fn salted_password_digest(password: &str, regtime: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(b"_");
    hasher.update(regtime.as_bytes());
    hasher.update(b"_salt");
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(32);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Compare a presented password against the stored lowercase hex digest.
pub fn verify_password(password: &str, regtime: &str, stored_digest: &str) -> bool {
    salted_password_digest(password, regtime).eq_ignore_ascii_case(stored_digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        let regtime = "1609459200";
        let stored = salted_password_digest("hunter2", regtime);
        assert!(verify_password("hunter2", regtime, &stored));
        assert!(!verify_password("hunter3", regtime, &stored));
    }
}
