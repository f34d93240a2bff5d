//! Key Exchange Negotiation (spec §4.4): matches a header's key
//! response data against the key request data the caller is willing
//! to honor a response to, and derives the resulting crypto context.

use std::sync::Arc;

use crate::crypto::CryptoContext;
use crate::error::{MslError, MslErrorKind, Result};
use crate::factory::MslContext;
use crate::header::MessageHeader;

/// Matches `header`'s key response data (if any) against
/// `requests_sent`, looks up the key exchange factory for its scheme,
/// and derives the resulting crypto context.
///
/// `requests_sent` is the key request data the caller itself sent on
/// an earlier message in the exchange; a header carrying a key
/// response with no matching request is a protocol violation, not
/// silently ignored.
pub async fn resolve_key_exchange_crypto_context(
    header: &MessageHeader,
    requests_sent: &[crate::wire::KeyRequestData],
    ctx: &MslContext,
) -> Result<Option<Arc<dyn CryptoContext>>> {
    let response = match header.key_response_data() {
        Some(r) => r,
        None => return Ok(None),
    };

    let request = requests_sent
        .iter()
        .find(|r| r.scheme == response.scheme)
        .ok_or_else(|| {
            MslError::new(MslErrorKind::KeyxResponseRequestMismatch)
                .with_message_id(header.message_id())
                .with_entity(header.entity_identity().to_string())
        })?;

    let factory = ctx
        .key_exchange_factory(&response.scheme)
        .ok_or_else(|| {
            MslError::new(MslErrorKind::KeyxFactoryNotFound)
                .with_message_id(header.message_id())
                .with_entity(header.entity_identity().to_string())
        })?;

    let crypto = factory.derive_crypto_context(request, response).await?;
    Ok(Some(crypto))
}

/// Selects which crypto context governs a message's payload chunks,
/// per spec §4.4: in a trusted network deployment a successful key
/// exchange immediately supersedes the session context for this
/// message's payload; in a peer-to-peer deployment the session context
/// derived from the header's master token continues to govern the
/// payload, and the key exchange context is only retained for the
/// sender's own future messages.
pub fn select_payload_crypto_context(
    role: crate::factory::Role,
    session_context: Arc<dyn CryptoContext>,
    key_exchange_context: Option<Arc<dyn CryptoContext>>,
) -> Arc<dyn CryptoContext> {
    if !role.is_peer_to_peer() {
        if let Some(kx) = key_exchange_context {
            return kx;
        }
    }
    session_context
}
