//! Wire types: the JSON shapes exchanged on the byte stream (spec §6).
//!
//! A message is a concatenation of self-delimited JSON objects. The
//! first is a signed envelope around either a message header or an
//! error header; each subsequent one is a signed envelope around a
//! payload chunk. These types are the `serde` mirror of those shapes;
//! [`crate::frame`] is responsible for pulling one object's worth of
//! bytes off the stream, and [`crate::header`] for turning a parsed
//! envelope into a validated [`crate::header::MessageHeader`].

use serde::{Deserialize, Serialize};

/// The outermost object on the wire: a signed envelope.
///
/// Disambiguated into header vs. error header by which of
/// `headerdata`/`errordata` is present (spec §4.2 step 1). Exactly one
/// of them is expected to be set; a well-formed object never sets
/// both or neither.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireEnvelope {
    /// Entity authentication data, present whenever the sender has no
    /// (or is not using a) master token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entityauthdata: Option<serde_json::Value>,
    /// The sender's master token, sealed by the MSL crypto context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastertoken: Option<SealedMasterToken>,
    /// Base64-encoded ciphertext; decrypts to a [`HeaderData`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headerdata: Option<String>,
    /// Base64-encoded plaintext; decodes to an [`ErrorData`]. Error
    /// headers are not encrypted, since they may need to be readable
    /// before any crypto context has been negotiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errordata: Option<String>,
    /// Base64-encoded signature over `headerdata` or `errordata`.
    pub signature: String,
}

/// A sealed credential: opaque token data plus a signature over it.
///
/// Used for both master tokens and user-ID tokens; which one a given
/// instance is depends on context, not on the shape.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SealedToken {
    /// Base64-encoded ciphertext (master tokens) or plaintext
    /// (user-ID tokens are bound to, and therefore implicitly trusted
    /// through, their master token and are not independently
    /// encrypted).
    pub tokendata: String,
    /// Base64-encoded signature over `tokendata`.
    pub signature: String,
}

/// The decrypted plaintext of a message header's `headerdata`.
///
/// Carries exactly the options spec §3 recognizes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaderData {
    /// Non-negative, monotonically increasing per sender.
    pub messageid: i64,
    /// Per-master-token replay-protection ID (spec §4.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonreplayableid: Option<i64>,
    /// Whether the sender is willing to have tokens renewed in
    /// response to this message.
    #[serde(default)]
    pub renewable: bool,
    /// Whether this message explicitly announces itself as a
    /// handshake message.
    #[serde(default)]
    pub handshake: bool,
    /// Negotiable capabilities (compression, encoding).
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Ordered key exchange requests the sender is willing to honor a
    /// response to.
    #[serde(default)]
    pub keyrequestdata: Vec<KeyRequestData>,
    /// A key exchange response to a previously sent request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyresponsedata: Option<KeyResponseData>,
    /// Concrete user authentication data (scheme left opaque to the
    /// core pipeline; out of scope per spec §1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userauthdata: Option<serde_json::Value>,
    /// A sealed user-ID token binding a user to the message's master
    /// token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useridtoken: Option<SealedToken>,
    /// Opaque, caller-verified service tokens.
    #[serde(default)]
    pub servicetokens: Vec<ServiceToken>,
}

/// Negotiable header capabilities.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Compression algorithms the sender supports, most preferred
    /// first.
    #[serde(default)]
    pub compression: Vec<String>,
    /// Character/byte encodings the sender supports.
    #[serde(default)]
    pub encoding: Vec<String>,
}

/// One entry of key request data: a scheme name plus scheme-specific,
/// opaque parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyRequestData {
    /// The key exchange scheme identifier, looked up in the
    /// [`crate::factory::KeyExchangeFactory`] registry.
    pub scheme: String,
    /// Scheme-specific request parameters, opaque to the core
    /// pipeline.
    #[serde(default)]
    pub keydata: serde_json::Value,
}

/// Key response data matched against a caller-supplied
/// [`KeyRequestData`] (spec §4.4).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyResponseData {
    /// Must equal the scheme of the request it answers.
    pub scheme: String,
    /// Scheme-specific response parameters, opaque to the core
    /// pipeline.
    #[serde(default)]
    pub keydata: serde_json::Value,
}

/// An opaque, caller-verified service token.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceToken {
    /// The token's name; service tokens are a set keyed by name.
    pub name: String,
    /// Base64-encoded, opaque token data.
    pub tokendata: String,
    /// Base64-encoded signature over `tokendata`.
    pub signature: String,
}

/// A sealed master token: a plaintext, signed `tokendata` wrapping a
/// separately-sealed `sessiondata`.
///
/// Unlike [`SealedToken`], `tokendata` here is plaintext JSON rather
/// than ciphertext — only `signature` vouches for it. This lets a
/// receiver read a presented master token's serial number (and decide
/// whether it already has a cached session context for it) before
/// ever checking that signature, as spec §4.2 step 2 requires. The
/// session key material that actually matters cryptographically lives
/// one level down, in `sessiondata`, which is encrypted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SealedMasterToken {
    /// Base64-encoded plaintext JSON of a [`MasterTokenData`].
    pub tokendata: String,
    /// Base64-encoded signature over `tokendata`.
    pub signature: String,
}

/// The plaintext of a master token's `tokendata`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MasterTokenData {
    /// The entity identity this token was issued to.
    pub identity: String,
    /// Sequence number; advances each time the token is renewed.
    pub sequencenumber: i64,
    /// Serial number; stable across renewals, used to scope
    /// non-replayable IDs and user-ID token bindings.
    pub serialnumber: i64,
    /// Milliseconds since epoch; the token becomes renewable at this
    /// instant.
    pub renewalwindow: i64,
    /// Milliseconds since epoch; the token is expired after this
    /// instant.
    pub expiration: i64,
    /// Opaque issuer-defined data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuerdata: Option<serde_json::Value>,
    /// Base64-encoded ciphertext; decrypts to a [`SessionData`].
    pub sessiondata: String,
}

/// The decrypted plaintext of a master token's `sessiondata`: the
/// session key material a [`crate::crypto::SessionCryptoContext`] is
/// built from.
///
/// Sealed separately from the rest of [`MasterTokenData`] so that
/// field can stay in the clear without exposing key material.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionData {
    /// Base64-encoded AES-128 session encryption key.
    pub encryptionkey: String,
    /// Base64-encoded HMAC session signing key.
    pub hmackey: String,
    /// Base64-encoded AES-128 initialization vector for the session
    /// crypto context this token derives.
    pub encryptioniv: String,
}

/// The decrypted plaintext of a user-ID token's `tokendata`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserIdTokenData {
    /// Serial number of this user-ID token.
    pub serialnumber: i64,
    /// Serial number of the master token this user-ID token is bound
    /// to.
    pub mastertokenserialnumber: i64,
    /// Opaque user identity data.
    pub userdata: serde_json::Value,
    /// Milliseconds since epoch; renewable after this instant.
    pub renewalwindow: i64,
    /// Milliseconds since epoch; expired after this instant.
    pub expiration: i64,
}

/// The decrypted (never encrypted: see [`WireEnvelope::errordata`])
/// plaintext of an error header.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorData {
    /// Identity of the entity the error is addressed to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Message ID of the message that provoked the error, if one had
    /// been parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messageid: Option<i64>,
    /// Application/transport-level response code.
    pub errorcode: i64,
    /// Internal, implementation-defined diagnostic code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internalcode: Option<i64>,
    /// Free-text error description intended for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errormsg: Option<String>,
    /// Free-text error description intended for the end user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usermsg: Option<String>,
}

/// A signed envelope around one payload chunk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkEnvelope {
    /// Base64-encoded ciphertext; decrypts to a [`ChunkData`].
    pub payload: String,
    /// Base64-encoded signature over `payload`.
    pub signature: String,
}

/// The decrypted plaintext of a payload chunk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkData {
    /// Strictly increasing within a message, starting at the value
    /// the header fixes.
    pub sequencenumber: i64,
    /// Must equal the header's message ID (spec invariant I1).
    pub messageid: i64,
    /// Set on exactly one chunk per completed message (spec invariant
    /// I3).
    #[serde(default)]
    pub endofmsg: bool,
    /// Compression algorithm applied to `data`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressionalgo: Option<String>,
    /// Base64-encoded, optionally compressed application bytes.
    #[serde(default)]
    pub data: String,
}
