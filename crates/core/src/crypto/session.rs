//! AES-CFB + HMAC-SHA256 backed crypto context.
//!
//! Mirrors the shape of a Baichuan-style `EncryptionProtocol`: an
//! encryptor/decryptor pair constructed once from key material and
//! reused for every call, with `encrypt`/`decrypt` cloning the cipher
//! state before use since CFB mode cipher objects are consumed by a
//! single encrypt/decrypt call.

use aes::{
    cipher::{AsyncStreamCipher, KeyIvInit},
    Aes128,
};
use cfb_mode::{Decryptor, Encryptor};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use super::CryptoContext;
use crate::error::{MslError, MslErrorKind, Result};

type Aes128CfbEnc = Encryptor<Aes128>;
type Aes128CfbDec = Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// A crypto context derived from a master token's session keys, an
/// entity auth scheme, or a key exchange.
///
/// Encryption is AES-128 in CFB mode; signing is HMAC-SHA256. Both
/// keys are independent, as is standard for an encrypt-then-MAC
/// construction.
#[derive(ZeroizeOnDrop)]
pub struct SessionCryptoContext {
    enc_key: [u8; 16],
    #[zeroize(skip)]
    iv: [u8; 16],
    hmac_key: Vec<u8>,
}

impl SessionCryptoContext {
    /// Builds a session crypto context from an AES-128 key, an IV, and
    /// an HMAC key.
    ///
    /// The IV must not be reused across contexts sharing the same
    /// `enc_key`; callers derive it from per-session material (e.g. a
    /// master token's issuer data or a key-exchange nonce), not a
    /// shared constant.
    pub fn new(enc_key: [u8; 16], iv: [u8; 16], hmac_key: Vec<u8>) -> Self {
        SessionCryptoContext {
            enc_key,
            iv,
            hmac_key,
        }
    }

    fn encryptor(&self) -> Aes128CfbEnc {
        Aes128CfbEnc::new((&self.enc_key).into(), (&self.iv).into())
    }

    fn decryptor(&self) -> Aes128CfbDec {
        Aes128CfbDec::new((&self.enc_key).into(), (&self.iv).into())
    }
}

impl CryptoContext for SessionCryptoContext {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        self.encryptor().encrypt(&mut buf);
        Ok(buf)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut buf = ciphertext.to_vec();
        self.decryptor().decrypt(&mut buf);
        Ok(buf)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .map_err(|e| MslError::new(MslErrorKind::InternalException).with_source(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            ))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .map_err(|e| MslError::new(MslErrorKind::InternalException).with_source(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            ))?;
        mac.update(data);
        Ok(mac.verify_slice(signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionCryptoContext {
        SessionCryptoContext::new([0x11; 16], [0x22; 16], b"hmac-key-material".to_vec())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let ctx = ctx();
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = ctx.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let roundtripped = ctx.decrypt(&ciphertext).unwrap();
        assert_eq!(roundtripped, plaintext);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let ctx = ctx();
        let data = b"header bytes to sign";
        let sig = ctx.sign(data).unwrap();
        assert!(ctx.verify(data, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let ctx = ctx();
        let sig = ctx.sign(b"original").unwrap();
        assert!(!ctx.verify(b"tampered", &sig).unwrap());
    }

    #[test]
    fn different_keys_do_not_decrypt_to_the_same_plaintext() {
        let a = SessionCryptoContext::new([0x11; 16], [0x22; 16], b"k1".to_vec());
        let b = SessionCryptoContext::new([0x33; 16], [0x22; 16], b"k2".to_vec());
        let ciphertext = a.encrypt(b"some secret bytes").unwrap();
        assert_ne!(b.decrypt(&ciphertext).unwrap(), b"some secret bytes");
    }
}
