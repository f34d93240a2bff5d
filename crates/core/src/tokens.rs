//! Master tokens and user-ID tokens (spec §3): sealed credentials that
//! have been decrypted, signature-verified, and parsed.
//!
//! These are the pipeline's internal representation; [`crate::wire`]
//! holds the raw, still-sealed shapes they are built from.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::crypto::{CryptoContext, SessionCryptoContext};
use crate::error::{MslError, MslErrorKind, Result};
use crate::wire::{MasterTokenData, SealedMasterToken, SealedToken, SessionData, UserIdTokenData};

/// Decodes and signature-verifies a [`SealedToken`], returning its
/// decrypted, parsed plaintext.
///
/// `crypto` is the context that sealed the token: the MSL crypto
/// context for master tokens, the owning master token's session
/// context for user-ID tokens (spec §3, "User-ID Token ... bound to a
/// master token").
fn open_sealed_token<T: serde::de::DeserializeOwned>(
    sealed: &SealedToken,
    crypto: &dyn CryptoContext,
) -> Result<T> {
    let raw = STANDARD
        .decode(&sealed.tokendata)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
    let signature = STANDARD
        .decode(&sealed.signature)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

    if !crypto.verify(&raw, &signature)? {
        return Err(MslError::new(MslErrorKind::MasterTokenUntrusted));
    }

    let plaintext = crypto.decrypt(&raw)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))
}

/// A master token: its plaintext `tokendata` (always parsed) plus the
/// session key material from `sessiondata` (always decrypted, but only
/// trustworthy once [`Self::open`] has been called with
/// `verify_signature: true` or a cached session context already
/// vouches for this token's serial number).
#[derive(Debug, Clone)]
pub struct MasterToken {
    data: MasterTokenData,
    session: SessionData,
}

fn decode_tokendata(sealed: &SealedMasterToken) -> Result<MasterTokenData> {
    let raw = STANDARD
        .decode(&sealed.tokendata)
        .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))
}

impl MasterToken {
    /// Reads the serial number out of a sealed master token's plaintext
    /// `tokendata`, without checking `signature`.
    ///
    /// Exists solely to look up a cached session context (spec §4.2
    /// step 2) before paying for (or risking failing) a full signature
    /// verification. Never use this value for anything that assumes
    /// trust; that's what [`Self::open`] is for.
    pub fn peek_serial_number(sealed: &SealedMasterToken) -> Result<i64> {
        Ok(decode_tokendata(sealed)?.serialnumber)
    }

    /// Opens a sealed master token: parses its plaintext `tokendata`
    /// and decrypts its embedded `sessiondata` against `msl_crypto`.
    ///
    /// If `verify_signature` is `true`, a bad signature fails
    /// [`MslErrorKind::MasterTokenUntrusted`] before anything else is
    /// trusted. Callers pass `false` only when a cached session context
    /// already vouches for this serial number (spec §4.2 step 2); the
    /// header's own envelope signature, checked against that cached
    /// context afterwards, is what actually authenticates the message
    /// in that path.
    pub fn open(
        sealed: &SealedMasterToken,
        msl_crypto: &dyn CryptoContext,
        verify_signature: bool,
    ) -> Result<Self> {
        let raw = STANDARD
            .decode(&sealed.tokendata)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;

        if verify_signature {
            let signature = STANDARD
                .decode(&sealed.signature)
                .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;
            if !msl_crypto.verify(&raw, &signature)? {
                return Err(MslError::new(MslErrorKind::MasterTokenUntrusted));
            }
        }

        let data: MasterTokenData = serde_json::from_slice(&raw)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;
        let session_ciphertext = STANDARD
            .decode(&data.sessiondata)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;
        let session_plaintext = msl_crypto.decrypt(&session_ciphertext)?;
        let session: SessionData = serde_json::from_slice(&session_plaintext)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;

        Ok(MasterToken { data, session })
    }

    /// The entity identity this token was issued to.
    pub fn identity(&self) -> &str {
        &self.data.identity
    }

    /// Sequence number; advances each renewal.
    pub fn sequence_number(&self) -> i64 {
        self.data.sequencenumber
    }

    /// Serial number; stable across renewals.
    pub fn serial_number(&self) -> i64 {
        self.data.serialnumber
    }

    /// Milliseconds since epoch at which the token becomes renewable.
    pub fn renewal_window(&self) -> i64 {
        self.data.renewalwindow
    }

    /// Milliseconds since epoch at which the token expires.
    pub fn expiration(&self) -> i64 {
        self.data.expiration
    }

    /// Whether `now_millis` is past [`Self::expiration`].
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.data.expiration
    }

    /// Whether `now_millis` is past [`Self::renewal_window`].
    pub fn is_renewable(&self, now_millis: i64) -> bool {
        now_millis >= self.data.renewalwindow
    }

    /// Base64-decoded AES-128 session encryption key.
    pub fn encryption_key(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.session.encryptionkey)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))
    }

    /// Base64-decoded HMAC session signing key.
    pub fn hmac_key(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.session.hmackey)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))
    }

    /// Base64-decoded AES-128 session IV.
    pub fn encryption_iv(&self) -> Result<[u8; 16]> {
        let raw = STANDARD
            .decode(&self.session.encryptioniv)
            .map_err(|e| MslError::new(MslErrorKind::MasterTokenUntrusted).with_source(e))?;
        raw.try_into()
            .map_err(|_| MslError::new(MslErrorKind::MasterTokenUntrusted))
    }

    /// Builds the AES/HMAC session crypto context this token carries
    /// the key material for (spec §3, §4.2).
    pub fn session_crypto_context(&self) -> Result<SessionCryptoContext> {
        let enc_key: [u8; 16] = self
            .encryption_key()?
            .try_into()
            .map_err(|_| MslError::new(MslErrorKind::MasterTokenUntrusted))?;
        let iv = self.encryption_iv()?;
        let hmac_key = self.hmac_key()?;
        Ok(SessionCryptoContext::new(enc_key, iv, hmac_key))
    }
}

/// A verified user-ID token: binds a user identity to a master token's
/// serial number.
#[derive(Debug, Clone)]
pub struct UserIdToken {
    data: UserIdTokenData,
}

impl UserIdToken {
    /// Opens and verifies a sealed user-ID token against the owning
    /// master token's session crypto context.
    pub fn open(sealed: &SealedToken, session_crypto: &dyn CryptoContext) -> Result<Self> {
        let data: UserIdTokenData = open_sealed_token(sealed, session_crypto).map_err(|e| {
            if e.kind() == MslErrorKind::MasterTokenUntrusted {
                MslError::new(MslErrorKind::UserIdTokenUntrusted)
            } else {
                e
            }
        })?;
        Ok(UserIdToken { data })
    }

    /// Serial number of this user-ID token.
    pub fn serial_number(&self) -> i64 {
        self.data.serialnumber
    }

    /// Serial number of the master token this token is bound to.
    pub fn master_token_serial_number(&self) -> i64 {
        self.data.mastertokenserialnumber
    }

    /// Whether this token attaches to `master`, per spec §4.3.
    pub fn attaches_to(&self, master: &MasterToken) -> bool {
        self.data.mastertokenserialnumber == master.serial_number()
    }

    /// Opaque user identity payload.
    pub fn user_data(&self) -> &serde_json::Value {
        &self.data.userdata
    }

    /// Milliseconds since epoch at which the token expires.
    pub fn expiration(&self) -> i64 {
        self.data.expiration
    }

    /// Whether `now_millis` is past [`Self::expiration`].
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.data.expiration
    }
}
