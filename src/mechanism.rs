//! SCRAM mechanism negotiation and key derivation.
//!
//! A [`Mechanism`] is one hash-function instantiation of SCRAM (RFC 5802);
//! the supported set matches the RFC 7804 HTTP registrations: SHA-1, SHA-256,
//! SHA-512 and SHA3-512. All mechanisms share the same `Hi()` / HMAC / proof
//! pipeline, generic over the RustCrypto `Digest` implementations.

use std::fmt;

use hmac::digest::crypto_common::BlockSizeUser;
use hmac::{Mac, SimpleHmac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use sha3::Sha3_512;

use crate::error::{Result, ScramHttpError};

/// A SCRAM hash-function instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    ScramSha1,
    ScramSha256,
    ScramSha512,
    ScramSha3_512,
}

impl Mechanism {
    /// Every mechanism this client can speak.
    pub const ALL: [Mechanism; 4] = [
        Mechanism::ScramSha1,
        Mechanism::ScramSha256,
        Mechanism::ScramSha512,
        Mechanism::ScramSha3_512,
    ];

    /// The RFC 7804 auth-scheme token.
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
            Mechanism::ScramSha512 => "SCRAM-SHA-512",
            Mechanism::ScramSha3_512 => "SCRAM-SHA3-512",
        }
    }

    /// Parses an auth-scheme token. Scheme names are case-insensitive per
    /// RFC 7235.
    pub fn from_token(token: &str) -> Option<Mechanism> {
        let token = token.trim();
        Mechanism::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(token))
    }

    /// Picks the first entry of the server's preference order that the client
    /// supports.
    pub fn select(supported: &[Mechanism], offered: &[String]) -> Result<Mechanism> {
        offered
            .iter()
            .filter_map(|token| Mechanism::from_token(token))
            .find(|m| supported.contains(m))
            .ok_or_else(|| {
                ScramHttpError::NoCommonMechanism(format!("server offered {offered:?}"))
            })
    }

    /// Runs the RFC 5802 key derivation for this mechanism's hash.
    pub(crate) fn derive_keys(
        self,
        password: &str,
        salt: &[u8],
        iterations: u32,
        auth_message: &str,
    ) -> DerivedKeys {
        let (password, auth_message) = (password.as_bytes(), auth_message.as_bytes());
        match self {
            Mechanism::ScramSha1 => derive::<Sha1>(password, salt, iterations, auth_message),
            Mechanism::ScramSha256 => derive::<Sha256>(password, salt, iterations, auth_message),
            Mechanism::ScramSha512 => derive::<Sha512>(password, salt, iterations, auth_message),
            Mechanism::ScramSha3_512 => {
                derive::<Sha3_512>(password, salt, iterations, auth_message)
            }
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client proof and expected server signature for one exchange.
#[derive(Debug, Clone)]
pub(crate) struct DerivedKeys {
    pub proof: Vec<u8>,
    pub server_signature: Vec<u8>,
}

fn derive<D: Digest + BlockSizeUser>(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    auth_message: &[u8],
) -> DerivedKeys {
    let salted_password = hi::<D>(password, salt, iterations);

    let client_key = hmac::<D>(&salted_password, b"Client Key");
    let stored_key = D::digest(&client_key);
    let client_signature = hmac::<D>(&stored_key, auth_message);
    let proof = xor_bytes(&client_key, &client_signature);

    let server_key = hmac::<D>(&salted_password, b"Server Key");
    let server_signature = hmac::<D>(&server_key, auth_message);

    DerivedKeys {
        proof,
        server_signature,
    }
}

/// `Hi()` function from RFC 5802 - essentially PBKDF2 with HMAC as the PRF.
fn hi<D: Digest + BlockSizeUser>(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    // U1 = HMAC(password, salt || INT(1))
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac::<D>(password, &block);
    let mut out = u.clone();

    // Ui = HMAC(password, U(i-1)), result = U1 XOR U2 XOR ... XOR Ui
    for _ in 1..iterations {
        u = hmac::<D>(password, &u);
        for (o, ui) in out.iter_mut().zip(u.iter()) {
            *o ^= *ui;
        }
    }

    out
}

fn hmac<D: Digest + BlockSizeUser>(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(key)
        .expect("HMAC key length is always valid");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

/// XOR two byte slices of equal length.
fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len(), "XOR operands must have equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Constant-time byte slice comparison.
///
/// Returns true if slices are equal, using constant-time comparison
/// to prevent timing side-channel attacks.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let result = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn select_follows_server_preference_order() {
        let offered = tokens(&["SCRAM-SHA-512", "SCRAM-SHA-256"]);
        let picked = Mechanism::select(&Mechanism::ALL, &offered).unwrap();
        assert_eq!(picked, Mechanism::ScramSha512);
    }

    #[test]
    fn select_skips_unsupported_entries() {
        let offered = tokens(&["SCRAM-SHA-512", "SCRAM-SHA-256"]);
        let supported = [Mechanism::ScramSha256];
        let picked = Mechanism::select(&supported, &offered).unwrap();
        assert_eq!(picked, Mechanism::ScramSha256);
    }

    #[test]
    fn select_skips_unknown_tokens() {
        let offered = tokens(&["SCRAM-SHA-42", "SCRAM-SHA-1"]);
        let picked = Mechanism::select(&Mechanism::ALL, &offered).unwrap();
        assert_eq!(picked, Mechanism::ScramSha1);
    }

    #[test]
    fn select_fails_on_empty_intersection() {
        let offered = tokens(&["SCRAM-SHA-1"]);
        let supported = [Mechanism::ScramSha256];
        let err = Mechanism::select(&supported, &offered).unwrap_err();
        assert!(matches!(err, ScramHttpError::NoCommonMechanism(_)));
    }

    #[test]
    fn select_is_deterministic() {
        let offered = tokens(&["SCRAM-SHA3-512", "SCRAM-SHA-1"]);
        for _ in 0..8 {
            let picked = Mechanism::select(&Mechanism::ALL, &offered).unwrap();
            assert_eq!(picked, Mechanism::ScramSha3_512);
        }
    }

    #[test]
    fn from_token_is_case_insensitive() {
        assert_eq!(
            Mechanism::from_token("scram-sha-256"),
            Some(Mechanism::ScramSha256)
        );
        assert_eq!(
            Mechanism::from_token(" SCRAM-SHA3-512 "),
            Some(Mechanism::ScramSha3_512)
        );
        assert_eq!(Mechanism::from_token("Basic"), None);
    }

    #[test]
    fn display_matches_token() {
        assert_eq!(Mechanism::ScramSha1.to_string(), "SCRAM-SHA-1");
        assert_eq!(Mechanism::ScramSha3_512.to_string(), "SCRAM-SHA3-512");
    }

    #[test]
    fn derived_key_lengths_follow_digest_size() {
        for (mechanism, len) in [
            (Mechanism::ScramSha1, 20),
            (Mechanism::ScramSha256, 32),
            (Mechanism::ScramSha512, 64),
            (Mechanism::ScramSha3_512, 64),
        ] {
            let keys = mechanism.derive_keys("pencil", b"salt", 16, "a,b,c");
            assert_eq!(keys.proof.len(), len, "{mechanism}");
            assert_eq!(keys.server_signature.len(), len, "{mechanism}");
        }
    }

    #[test]
    fn derive_is_deterministic_per_input() {
        let a = Mechanism::ScramSha256.derive_keys("pencil", b"salt", 64, "msg");
        let b = Mechanism::ScramSha256.derive_keys("pencil", b"salt", 64, "msg");
        assert_eq!(a.proof, b.proof);
        assert_eq!(a.server_signature, b.server_signature);

        let c = Mechanism::ScramSha256.derive_keys("pencil", b"salt", 65, "msg");
        assert_ne!(a.proof, c.proof);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(constant_time_eq(&[], &[]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }
}
