//! Crypto contexts: the abstract capability set {encrypt, decrypt,
//! sign, verify, wrap, unwrap} that every stage of the pipeline
//! consumes (spec §3, "Crypto Context").
//!
//! Concrete contexts are built by factories (entity auth, key
//! exchange, or from a verified master token); this module defines the
//! capability trait plus the two context types spec §9 calls for
//! explicitly for tests: [`NullCryptoContext`] and
//! [`RejectingCryptoContext`]. The AES/HMAC-backed session context used
//! once a master token has been verified lives in [`session`].

mod session;

pub use session::SessionCryptoContext;

use crate::error::Result;

/// The capability interface every concrete crypto context implements.
///
/// A context is immutable for the lifetime of the stream that selects
/// it (spec invariant I5); none of these methods take `&mut self`.
pub trait CryptoContext: Send + Sync {
    /// Encrypts `plaintext`, returning ciphertext.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    /// Decrypts `ciphertext`, returning plaintext.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
    /// Signs `data`, returning a signature.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Verifies that `signature` is a valid signature of `data`.
    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool>;
    /// Wraps (encrypts) key material for transport, e.g. inside a key
    /// response.
    fn wrap(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(key)
    }
    /// Unwraps (decrypts) key material received from a wrap.
    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.decrypt(wrapped)
    }
}

/// A no-op crypto context: encrypt/decrypt are the identity function,
/// sign returns an empty signature, and verify always succeeds.
///
/// Exists for tests that need a context to plug into the pipeline
/// without exercising real cryptography (spec §9).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCryptoContext;

impl CryptoContext for NullCryptoContext {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> Result<bool> {
        Ok(true)
    }
}

/// A crypto context whose `verify` always fails.
///
/// Exists for tests that need to exercise the pipeline's signature-
/// verification-failed path (spec §9).
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingCryptoContext;

impl CryptoContext for RejectingCryptoContext {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> Result<bool> {
        Ok(false)
    }
}
