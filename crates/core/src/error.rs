//! The closed error taxonomy for the receive-side pipeline.
//!
//! Every failure the pipeline can produce is one of the [`MslErrorKind`]
//! variants, wrapped in an [`MslError`] that carries whatever identifying
//! context (message ID, entity, user) had already been resolved at the
//! point of failure.

use std::fmt;

/// The closed set of error kinds a receive-side pipeline can produce.
///
/// Grouped by the pipeline stage that raises them, matching spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MslErrorKind {
    /// The frame reader could not parse a well-formed textual object
    /// out of the remaining bytes.
    JsonParseError,
    /// A parsed object did not carry the fields required of a header
    /// or chunk.
    MessageFormatError,
    /// The entity identified by the entity auth data has been revoked.
    EntityRevoked,
    /// No entity auth factory is registered for the declared scheme.
    EntityAuthFactoryNotFound,
    /// The entity auth crypto context failed to verify the header
    /// signature.
    EntityAuthVerificationFailed,
    /// The master token could not be verified and no cached session
    /// context exists for it.
    MasterTokenUntrusted,
    /// The master token's identity has been revoked.
    MasterTokenIdentityRevoked,
    /// The master token itself has been revoked.
    MasterTokenRevoked,
    /// The user-ID token is not trusted (it does not attach to the
    /// header's master token, or no such binding can be verified).
    UserIdTokenUntrusted,
    /// The user-ID token has been revoked.
    UserIdTokenRevoked,
    /// No key exchange factory is registered for the scheme named by
    /// the key response data.
    KeyxFactoryNotFound,
    /// The key response data does not match any of the caller-supplied
    /// key request data.
    KeyxResponseRequestMismatch,
    /// The message (or its master token) has expired and cannot be
    /// accepted as-is.
    MessageExpired,
    /// The header claims to be a handshake but is missing the
    /// renewable flag or key request data that a handshake requires.
    HandshakeDataMissing,
    /// A non-replayable ID was present without a master token to scope
    /// it to.
    IncompleteNonReplayableMessage,
    /// The non-replayable ID is at or below the largest ID already
    /// seen for this master token.
    MessageReplayed,
    /// The non-replayable ID is ahead of the largest seen ID by more
    /// than the acceptance window; the receiver cannot safely advance.
    MessageReplayedUnrecoverable,
    /// A chunk's message ID does not match the header's message ID.
    PayloadMessageIdMismatch,
    /// A chunk's sequence number is not the expected next value.
    PayloadSequenceNumberMismatch,
    /// A chunk failed signature verification or decryption.
    PayloadVerificationFailed,
    /// An I/O-bearing operation did not complete before its timeout.
    Timeout,
    /// The caller misused the API (e.g. called `read` on a stream that
    /// carries only an error header).
    InternalException,
}

impl fmt::Display for MslErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::JsonParseError => "JSON_PARSE_ERROR",
            Self::MessageFormatError => "MESSAGE_FORMAT_ERROR",
            Self::EntityRevoked => "ENTITY_REVOKED",
            Self::EntityAuthFactoryNotFound => "ENTITYAUTH_FACTORY_NOT_FOUND",
            Self::EntityAuthVerificationFailed => "ENTITYAUTH_VERIFICATION_FAILED",
            Self::MasterTokenUntrusted => "MASTERTOKEN_UNTRUSTED",
            Self::MasterTokenIdentityRevoked => "MASTERTOKEN_IDENTITY_REVOKED",
            Self::MasterTokenRevoked => "MASTERTOKEN_REVOKED",
            Self::UserIdTokenUntrusted => "USERIDTOKEN_UNTRUSTED",
            Self::UserIdTokenRevoked => "USERIDTOKEN_REVOKED",
            Self::KeyxFactoryNotFound => "KEYX_FACTORY_NOT_FOUND",
            Self::KeyxResponseRequestMismatch => "KEYX_RESPONSE_REQUEST_MISMATCH",
            Self::MessageExpired => "MESSAGE_EXPIRED",
            Self::HandshakeDataMissing => "HANDSHAKE_DATA_MISSING",
            Self::IncompleteNonReplayableMessage => "INCOMPLETE_NONREPLAYABLE_MESSAGE",
            Self::MessageReplayed => "MESSAGE_REPLAYED",
            Self::MessageReplayedUnrecoverable => "MESSAGE_REPLAYED_UNRECOVERABLE",
            Self::PayloadMessageIdMismatch => "PAYLOAD_MESSAGE_ID_MISMATCH",
            Self::PayloadSequenceNumberMismatch => "PAYLOAD_SEQUENCE_NUMBER_MISMATCH",
            Self::PayloadVerificationFailed => "PAYLOAD_VERIFICATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::InternalException => "INTERNAL_EXCEPTION",
        };
        f.write_str(s)
    }
}

/// An error produced by the receive-side pipeline.
///
/// Carries the offending message ID, entity and user where they had
/// already been resolved at the point of failure, plus an optional
/// lower-level cause (a JSON parse error, an HMAC verification
/// failure, ...).
#[derive(Debug, thiserror::Error)]
pub struct MslError {
    kind: MslErrorKind,
    message_id: Option<i64>,
    entity: Option<String>,
    user: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MslError {
    /// Builds a bare error of the given kind, with no context attached
    /// yet. Use the `with_*` builders to attach context as it becomes
    /// known.
    pub fn new(kind: MslErrorKind) -> Self {
        MslError {
            kind,
            message_id: None,
            entity: None,
            user: None,
            source: None,
        }
    }

    /// Attaches the message ID the header had already declared, if
    /// parsing got that far.
    #[must_use]
    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Attaches the entity identity resolved so far.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Attaches the user identity resolved so far.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attaches a lower-level cause (e.g. a `serde_json::Error`).
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The taxonomized error kind.
    pub fn kind(&self) -> MslErrorKind {
        self.kind
    }

    /// The message ID of the offending message, if known.
    pub fn message_id(&self) -> Option<i64> {
        self.message_id
    }

    /// The entity identity involved, if known.
    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// The user identity involved, if known.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl fmt::Display for MslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(id) = self.message_id {
            write!(f, " (message_id={id})")?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (entity={entity})")?;
        }
        if let Some(user) = &self.user {
            write!(f, " (user={user})")?;
        }
        Ok(())
    }
}

/// Convenience alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, MslError>;

/// The three-outcome contract every I/O-bearing pipeline call returns
/// through (spec §5): a value, a timeout, or an error.
///
/// `Timeout` is kept distinct from `MslError` at the call-site level so
/// callers can retry without inspecting an error kind, even though it
/// is also representable as `MslErrorKind::Timeout` once flattened into
/// a plain `Result`.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation completed with a value.
    Ready(T),
    /// The operation did not complete before its timeout; stream state
    /// was not advanced and the caller may retry.
    TimedOut,
    /// The operation failed.
    Err(MslError),
}

impl<T> Outcome<T> {
    /// Collapses the three-outcome contract into a plain [`Result`],
    /// turning a timeout into [`MslErrorKind::Timeout`].
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Ready(v) => Ok(v),
            Outcome::TimedOut => Err(MslError::new(MslErrorKind::Timeout)),
            Outcome::Err(e) => Err(e),
        }
    }
}
