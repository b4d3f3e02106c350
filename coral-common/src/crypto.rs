//! Cryptographic helpers: hashing, at-rest secret wrapping, and
//! constant-time comparison.
//!
//! The wrapping functions exist for exactly one purpose today: storing
//! bootstrap-PSK material in the colony's analytical store without ever
//! writing the plaintext to disk. The wrapping key is derived from the
//! colony's root CA private key, so PSK rows are unreadable without the
//! CA material.

use crypto_secretbox::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Nonce, XSalsa20Poly1305,
};
use rand::random;
use subtle::ConstantTimeEq;

/// XSalsa20Poly1305 nonce length; a sealed secret starts with one.
const NONCE_LEN: usize = 24;

/// Blake3 Hash.
pub type Hash = blake3::Hash;

pub use blake3::hash;

pub use blake3::Hasher;

/// Create an array of random bytes with a size `N`.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let arr: [u8; N] = random();

    arr
}

/// Encode bytes as uppercase Crockford base32, the display form used for
/// bootstrap secrets.
pub fn base32_encode(bytes: &[u8]) -> String {
    base32::encode(base32::Alphabet::Crockford, bytes).to_uppercase()
}

/// Derive a 32-byte key from secret material, bound to a context string.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, material)
}

/// Compare two byte strings in constant time.
///
/// Returns false for length mismatches without leaking at which byte the
/// inputs diverge.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Wrap a secret for at-rest storage.
///
/// A fresh 24-byte nonce is drawn per call and stored in front of the
/// ciphertext, so the sealed blob is self-contained and two seals of the
/// same secret never collide.
pub fn seal_secret(secret: &[u8], wrapping_key: &[u8; 32]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(wrapping_key.into());
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, secret)
        .expect("secretbox sealing of an in-memory buffer cannot fail");

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    sealed
}

/// Recover a secret wrapped by [seal_secret].
pub fn open_secret(sealed: &[u8], wrapping_key: &[u8; 32]) -> Result<Vec<u8>, UnsealError> {
    if sealed.len() < NONCE_LEN {
        return Err(UnsealError::MissingNonce(sealed.len()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XSalsa20Poly1305::new(wrapping_key.into());

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| UnsealError::WrongKeyOrTampered)
}

/// Error while opening a sealed secret.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum UnsealError {
    /// The blob is shorter than the nonce it must carry.
    #[error("sealed secret is {0} bytes, too short to carry its nonce")]
    MissingNonce(usize),

    /// Authentication failed: wrong wrapping key, or the blob was altered.
    #[error("sealed secret failed authentication")]
    WrongKeyOrTampered,
}
