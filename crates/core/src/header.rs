//! The Header Parser & Validator (spec §4.2): turns the first signed
//! envelope off the wire into a validated [`MessageHeader`] or
//! [`ErrorHeader`], resolving whichever crypto context signed it along
//! the way.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, trace};

use crate::crypto::CryptoContext;
use crate::error::{MslError, MslErrorKind, Result};
use crate::factory::MslContext;
use crate::tokens::{MasterToken, UserIdToken};
use crate::wire::{Capabilities, ErrorData, HeaderData, KeyRequestData, KeyResponseData, WireEnvelope};

/// Either kind of header the first envelope on a message can carry.
pub enum Header {
    /// A normal message header.
    Message(Box<MessageHeader>),
    /// An error header, sent in place of a message header when the
    /// peer could not process whatever provoked it.
    Error(Box<ErrorHeader>),
}

/// A validated, decrypted message header.
pub struct MessageHeader {
    data: HeaderData,
    entity_identity: String,
    master_token: Option<MasterToken>,
    user_id_token: Option<UserIdToken>,
    /// The crypto context that signed/sealed this header: either the
    /// sender's session context (master token present) or an entity
    /// auth context (no master token).
    pub crypto_context: Arc<dyn CryptoContext>,
}

impl MessageHeader {
    /// Non-negative, monotonically increasing per sender.
    pub fn message_id(&self) -> i64 {
        self.data.messageid
    }

    /// The replay-protection ID scoped to the header's master token, if
    /// any was presented (spec §4.5).
    pub fn non_replayable_id(&self) -> Option<i64> {
        self.data.nonreplayableid
    }

    /// Whether the sender will accept tokens being renewed in response.
    pub fn is_renewable(&self) -> bool {
        self.data.renewable
    }

    /// Whether the header explicitly announces a handshake message.
    ///
    /// Under the `legacy-handshake-inference` feature this is not the
    /// only way a message is treated as a handshake; see
    /// [`crate::stream::MessageInputStream::is_handshake`].
    pub fn is_explicit_handshake(&self) -> bool {
        self.data.handshake
    }

    /// Negotiated capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        &self.data.capabilities
    }

    /// Key exchange requests the sender is willing to honor a response
    /// to.
    pub fn key_request_data(&self) -> &[KeyRequestData] {
        &self.data.keyrequestdata
    }

    /// A key exchange response to a previously sent request, if any.
    pub fn key_response_data(&self) -> Option<&KeyResponseData> {
        self.data.keyresponsedata.as_ref()
    }

    /// Concrete user authentication data, opaque to this pipeline.
    pub fn user_auth_data(&self) -> Option<&serde_json::Value> {
        self.data.userauthdata.as_ref()
    }

    /// The entity identity resolved while building the header's crypto
    /// context (spec invariant I4).
    pub fn entity_identity(&self) -> &str {
        &self.entity_identity
    }

    /// The header's master token, if the sender presented one.
    pub fn master_token(&self) -> Option<&MasterToken> {
        self.master_token.as_ref()
    }

    /// The header's verified user-ID token, if one was presented and
    /// bound to [`Self::master_token`].
    pub fn user_id_token(&self) -> Option<&UserIdToken> {
        self.user_id_token.as_ref()
    }
}

/// A validated error header.
pub struct ErrorHeader {
    data: ErrorData,
    entity_identity: String,
}

impl ErrorHeader {
    /// Identity of the entity the error is addressed to, if known.
    pub fn recipient(&self) -> Option<&str> {
        self.data.recipient.as_deref()
    }

    /// Message ID of the message that provoked the error, if one had
    /// been parsed.
    pub fn message_id(&self) -> Option<i64> {
        self.data.messageid
    }

    /// Application/transport-level response code.
    pub fn error_code(&self) -> i64 {
        self.data.errorcode
    }

    /// Internal, implementation-defined diagnostic code.
    pub fn internal_code(&self) -> Option<i64> {
        self.data.internalcode
    }

    /// Free-text error description intended for logs.
    pub fn error_message(&self) -> Option<&str> {
        self.data.errormsg.as_deref()
    }

    /// Free-text error description intended for the end user.
    pub fn user_message(&self) -> Option<&str> {
        self.data.usermsg.as_deref()
    }

    /// The entity identity resolved while verifying the error header's
    /// signature.
    pub fn entity_identity(&self) -> &str {
        &self.entity_identity
    }
}

/// Resolves the crypto context that should have signed/sealed the
/// envelope, per spec §4.2 step 2.
///
/// If a master token is present: look up a cached session context by
/// its (unverified) plaintext serial number first; only if nothing is
/// cached does this verify and open the master token itself, deriving
/// a fresh session context from it and caching the result. A master
/// token is rejected `MASTERTOKEN_UNTRUSTED` only when *both* the cache
/// misses *and* the signature fails to verify — not merely because the
/// signature doesn't verify, since a stale signing key on an otherwise
/// still-cached session is not grounds for distrust. Otherwise: look up
/// the entity auth factory for the declared scheme and build its
/// crypto context.
async fn resolve_crypto_context(
    envelope: &WireEnvelope,
    ctx: &MslContext,
) -> Result<(Arc<dyn CryptoContext>, Option<MasterToken>, String)> {
    if let Some(sealed) = &envelope.mastertoken {
        let serial_number = MasterToken::peek_serial_number(sealed)?;
        trace!("resolving header crypto context for master token serial {serial_number}");

        let (master, crypto_context) = match ctx
            .msl_store
            .get_session_crypto_context(serial_number)
            .await
        {
            Some(cached) => {
                debug!("serial {serial_number}: using cached session crypto context");
                let master = MasterToken::open(sealed, ctx.msl_crypto_context.as_ref(), false)?;
                (master, cached)
            }
            None => {
                debug!("serial {serial_number}: no cached session crypto context, verifying master token");
                let master = MasterToken::open(sealed, ctx.msl_crypto_context.as_ref(), true)?;
                let fresh: Arc<dyn CryptoContext> = Arc::new(master.session_crypto_context()?);
                ctx.msl_store
                    .set_session_crypto_context(master.serial_number(), fresh.clone())
                    .await;
                (master, fresh)
            }
        };

        if let Some(reason) = ctx.token_factory.is_entity_revoked(master.identity()).await {
            return Err(MslError::new(MslErrorKind::EntityRevoked)
                .with_entity(master.identity().to_string())
                .with_source(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason)));
        }
        if let Some(reason) = ctx
            .token_factory
            .is_master_token_identity_revoked(&master)
            .await
        {
            return Err(MslError::new(MslErrorKind::MasterTokenIdentityRevoked)
                .with_entity(master.identity().to_string())
                .with_source(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason)));
        }
        if let Some(reason) = ctx.token_factory.is_master_token_revoked(&master).await {
            return Err(MslError::new(MslErrorKind::MasterTokenRevoked)
                .with_entity(master.identity().to_string())
                .with_source(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason)));
        }

        let identity = master.identity().to_string();
        return Ok((crypto_context, Some(master), identity));
    }

    let entity_auth_data = envelope.entityauthdata.as_ref().ok_or_else(|| {
        MslError::new(MslErrorKind::MessageFormatError)
    })?;

    // The scheme is read out of the opaque entity auth data by
    // convention; concrete schemes are a caller concern (spec §1), but
    // every scheme's wire shape is expected to carry its own name.
    let scheme = entity_auth_data
        .get("scheme")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MslError::new(MslErrorKind::MessageFormatError))?;
    debug!("resolving header crypto context via entity auth scheme {scheme}");

    let factory = ctx
        .entity_auth_factory(scheme)
        .ok_or_else(|| MslError::new(MslErrorKind::EntityAuthFactoryNotFound))?;

    let identity = factory
        .identity(entity_auth_data)
        .ok_or_else(|| MslError::new(MslErrorKind::EntityAuthVerificationFailed))?;

    if let Some(reason) = ctx.token_factory.is_entity_revoked(&identity).await {
        return Err(MslError::new(MslErrorKind::EntityRevoked)
            .with_entity(identity)
            .with_source(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason)));
    }

    let crypto = factory.crypto_context(entity_auth_data).await?;
    Ok((crypto, None, identity))
}

/// Parses and validates the first envelope of a message, resolving its
/// crypto context and, for message headers, its bound tokens (spec
/// §4.2, §4.3).
pub async fn parse_header(envelope_value: serde_json::Value, ctx: &MslContext) -> Result<Header> {
    let envelope: WireEnvelope = serde_json::from_value(envelope_value)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
    trace!(
        "parsing envelope: master_token={} entity_auth_data={}",
        envelope.mastertoken.is_some(),
        envelope.entityauthdata.is_some()
    );

    let (crypto_context, master_token, entity_identity) = resolve_crypto_context(&envelope, ctx).await?;

    let signature = STANDARD
        .decode(&envelope.signature)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

    if let Some(encoded) = &envelope.errordata {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
        if !crypto_context.verify(&raw, &signature)? {
            return Err(MslError::new(MslErrorKind::EntityAuthVerificationFailed)
                .with_entity(entity_identity));
        }
        let data: ErrorData = serde_json::from_slice(&raw)
            .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
        return Ok(Header::Error(Box::new(ErrorHeader {
            data,
            entity_identity,
        })));
    }

    let encoded = envelope
        .headerdata
        .as_ref()
        .ok_or_else(|| MslError::new(MslErrorKind::MessageFormatError))?;
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

    if !crypto_context.verify(&raw, &signature)? {
        return Err(MslError::new(MslErrorKind::EntityAuthVerificationFailed)
            .with_entity(entity_identity));
    }

    let plaintext = crypto_context.decrypt(&raw)?;
    let data: HeaderData = serde_json::from_slice(&plaintext)
        .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

    if data.handshake && (!data.renewable || data.keyrequestdata.is_empty()) {
        return Err(MslError::new(MslErrorKind::HandshakeDataMissing)
            .with_message_id(data.messageid)
            .with_entity(entity_identity));
    }
    if data.nonreplayableid.is_some() && master_token.is_none() {
        return Err(MslError::new(MslErrorKind::IncompleteNonReplayableMessage)
            .with_message_id(data.messageid)
            .with_entity(entity_identity));
    }

    let user_id_token = match (&data.useridtoken, &master_token) {
        (Some(sealed), Some(master)) => {
            let session_crypto = master.session_crypto_context()?;
            let token = UserIdToken::open(sealed, &session_crypto).map_err(|e| {
                e.with_message_id(data.messageid)
                    .with_entity(entity_identity.clone())
            })?;
            if !token.attaches_to(master) {
                return Err(MslError::new(MslErrorKind::UserIdTokenUntrusted)
                    .with_message_id(data.messageid)
                    .with_entity(entity_identity));
            }
            if let Some(reason) = ctx
                .token_factory
                .is_user_id_token_revoked(master, &token)
                .await
            {
                return Err(MslError::new(MslErrorKind::UserIdTokenRevoked)
                    .with_message_id(data.messageid)
                    .with_entity(entity_identity)
                    .with_source(std::io::Error::new(std::io::ErrorKind::PermissionDenied, reason)));
            }
            Some(token)
        }
        (Some(_), None) => {
            return Err(MslError::new(MslErrorKind::UserIdTokenUntrusted)
                .with_message_id(data.messageid)
                .with_entity(entity_identity));
        }
        (None, _) => None,
    };

    Ok(Header::Message(Box::new(MessageHeader {
        data,
        entity_identity,
        master_token,
        user_id_token,
        crypto_context,
    })))
}
