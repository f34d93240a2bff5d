//! In-memory collaborator implementations for tests (spec §6, §9).
//!
//! None of these enforce anything beyond what their name promises:
//! [`InMemoryTokenFactory`] tracks revocation sets and the
//! largest-non-replayable-ID-seen table an application would normally
//! keep in a database; [`InMemoryMslStore`] is a [`HashMap`] behind a
//! mutex. They exist so pipeline tests can exercise real trust and
//! freshness logic without standing up a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::crypto::CryptoContext;
use crate::error::Result;
use crate::factory::{EntityAuthFactory, KeyExchangeFactory, MslStore, NonReplayableOutcome, TokenFactory};
use crate::freshness::{evaluate_non_replayable_id, FreshnessDecision};
use crate::tokens::{MasterToken, UserIdToken};
use crate::wire::{KeyRequestData, KeyResponseData};

/// An in-memory [`TokenFactory`]: revocation is whatever the test put
/// in the revoked sets, and the non-replayable-ID window is tracked
/// per master-token serial number.
#[derive(Default)]
pub struct InMemoryTokenFactory {
    revoked_entities: Mutex<HashSet<String>>,
    revoked_master_token_identities: Mutex<HashSet<String>>,
    revoked_master_tokens: Mutex<HashSet<i64>>,
    revoked_user_id_tokens: Mutex<HashSet<i64>>,
    largest_non_replayable_id: Mutex<HashMap<i64, i64>>,
}

impl InMemoryTokenFactory {
    /// An empty factory: nothing revoked, no IDs seen yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an entity identity as revoked.
    pub fn revoke_entity(&self, identity: impl Into<String>) {
        self.revoked_entities.lock().unwrap().insert(identity.into());
    }

    /// Marks a master token's identity as revoked.
    pub fn revoke_master_token_identity(&self, identity: impl Into<String>) {
        self.revoked_master_token_identities
            .lock()
            .unwrap()
            .insert(identity.into());
    }

    /// Marks a master token (by serial number) as revoked.
    pub fn revoke_master_token(&self, serial_number: i64) {
        self.revoked_master_tokens.lock().unwrap().insert(serial_number);
    }

    /// Marks a user-ID token (by serial number) as revoked.
    pub fn revoke_user_id_token(&self, serial_number: i64) {
        self.revoked_user_id_tokens
            .lock()
            .unwrap()
            .insert(serial_number);
    }

    /// Seeds the largest-seen non-replayable ID for a master token
    /// serial number, e.g. to test mid-window behavior without
    /// replaying a whole accept sequence first.
    pub fn seed_largest_non_replayable_id(&self, master_token_serial_number: i64, id: i64) {
        self.largest_non_replayable_id
            .lock()
            .unwrap()
            .insert(master_token_serial_number, id);
    }
}

#[async_trait]
impl TokenFactory for InMemoryTokenFactory {
    async fn is_entity_revoked(&self, identity: &str) -> Option<String> {
        self.revoked_entities
            .lock()
            .unwrap()
            .contains(identity)
            .then(|| format!("entity {identity} is revoked"))
    }

    async fn is_master_token_identity_revoked(&self, master: &MasterToken) -> Option<String> {
        self.revoked_master_token_identities
            .lock()
            .unwrap()
            .contains(master.identity())
            .then(|| format!("master token identity {} is revoked", master.identity()))
    }

    async fn is_master_token_revoked(&self, master: &MasterToken) -> Option<String> {
        self.revoked_master_tokens
            .lock()
            .unwrap()
            .contains(&master.serial_number())
            .then(|| format!("master token {} is revoked", master.serial_number()))
    }

    async fn is_user_id_token_revoked(
        &self,
        _master: &MasterToken,
        user: &UserIdToken,
    ) -> Option<String> {
        self.revoked_user_id_tokens
            .lock()
            .unwrap()
            .contains(&user.serial_number())
            .then(|| format!("user-ID token {} is revoked", user.serial_number()))
    }

    async fn accept_non_replayable_id(
        &self,
        master_token_serial_number: i64,
        id: i64,
    ) -> NonReplayableOutcome {
        let mut table = self.largest_non_replayable_id.lock().unwrap();
        let largest = *table.get(&master_token_serial_number).unwrap_or(&0);
        match evaluate_non_replayable_id(largest, id) {
            FreshnessDecision::Accepted => {
                table.insert(master_token_serial_number, id);
                NonReplayableOutcome::Accepted
            }
            FreshnessDecision::Replayed => NonReplayableOutcome::Replayed,
            FreshnessDecision::ReplayedUnrecoverable => NonReplayableOutcome::ReplayedUnrecoverable,
        }
    }
}

/// An in-memory [`MslStore`]: a mutex-guarded map from master token
/// serial number to cached session crypto context.
#[derive(Default)]
pub struct InMemoryMslStore {
    contexts: Mutex<HashMap<i64, Arc<dyn CryptoContext>>>,
}

impl InMemoryMslStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MslStore for InMemoryMslStore {
    async fn get_session_crypto_context(
        &self,
        serial_number: i64,
    ) -> Option<Arc<dyn CryptoContext>> {
        self.contexts.lock().unwrap().get(&serial_number).cloned()
    }

    async fn set_session_crypto_context(
        &self,
        serial_number: i64,
        context: Arc<dyn CryptoContext>,
    ) {
        self.contexts.lock().unwrap().insert(serial_number, context);
    }
}

/// An entity auth factory that hands back a fixed crypto context for
/// one scheme, reading the identity out of an `"identity"` field in
/// the entity auth data.
pub struct InMemoryEntityAuthFactory {
    scheme: String,
    crypto_context: Arc<dyn CryptoContext>,
}

impl InMemoryEntityAuthFactory {
    /// Builds a factory that answers for `scheme` with `crypto_context`.
    pub fn new(scheme: impl Into<String>, crypto_context: Arc<dyn CryptoContext>) -> Self {
        InMemoryEntityAuthFactory {
            scheme: scheme.into(),
            crypto_context,
        }
    }
}

#[async_trait]
impl EntityAuthFactory for InMemoryEntityAuthFactory {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn crypto_context(
        &self,
        _entity_auth_data: &serde_json::Value,
    ) -> Result<Arc<dyn CryptoContext>> {
        Ok(self.crypto_context.clone())
    }

    fn identity(&self, entity_auth_data: &serde_json::Value) -> Option<String> {
        entity_auth_data
            .get("identity")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// A key exchange factory that hands back a fixed crypto context for
/// one scheme, ignoring the request/response contents.
pub struct InMemoryKeyExchangeFactory {
    scheme: String,
    crypto_context: Arc<dyn CryptoContext>,
}

impl InMemoryKeyExchangeFactory {
    /// Builds a factory that answers for `scheme` with `crypto_context`.
    pub fn new(scheme: impl Into<String>, crypto_context: Arc<dyn CryptoContext>) -> Self {
        InMemoryKeyExchangeFactory {
            scheme: scheme.into(),
            crypto_context,
        }
    }
}

#[async_trait]
impl KeyExchangeFactory for InMemoryKeyExchangeFactory {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn derive_crypto_context(
        &self,
        _request: &KeyRequestData,
        _response: &KeyResponseData,
    ) -> Result<Arc<dyn CryptoContext>> {
        Ok(self.crypto_context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_ids_in_order() {
        let factory = InMemoryTokenFactory::new();
        assert_eq!(
            factory.accept_non_replayable_id(1, 1).await,
            NonReplayableOutcome::Accepted
        );
        assert_eq!(
            factory.accept_non_replayable_id(1, 2).await,
            NonReplayableOutcome::Accepted
        );
        assert_eq!(
            factory.accept_non_replayable_id(1, 2).await,
            NonReplayableOutcome::Replayed
        );
    }

    #[tokio::test]
    async fn revocation_checks_reflect_what_was_revoked() {
        let factory = InMemoryTokenFactory::new();
        assert!(factory.is_entity_revoked("entity-1").await.is_none());
        factory.revoke_entity("entity-1");
        assert!(factory.is_entity_revoked("entity-1").await.is_some());
    }

    #[tokio::test]
    async fn store_round_trips_a_context() {
        let store = InMemoryMslStore::new();
        assert!(store.get_session_crypto_context(7).await.is_none());
        let ctx: Arc<dyn CryptoContext> = Arc::new(crate::crypto::NullCryptoContext);
        store.set_session_crypto_context(7, ctx).await;
        assert!(store.get_session_crypto_context(7).await.is_some());
    }
}
