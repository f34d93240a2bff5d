//! Collaborator contracts the pipeline consumes but does not
//! implement (spec §6): the Token Factory, the Entity Auth Factory
//! registry, the Key Exchange Factory registry, and the MSL store.
//!
//! These are expressed as `#[async_trait]` traits since every method a
//! real deployment implements them with touches I/O (a database, a
//! revocation service) or another asynchronous collaborator, the same
//! reasoning that makes the teacher model its `TransactionPool`/
//! `IbcHost`-shaped collaborators as `#[async_trait]` traits even
//! though the teacher's own protocol code is not built on
//! `async_trait`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::CryptoContext;
use crate::time::Clock;
use crate::tokens::{MasterToken, UserIdToken};
use crate::wire::{KeyRequestData, KeyResponseData};

/// The deployment role, which changes whose master token governs the
/// payload crypto context when a key response is present (spec §4.4)
/// and which freshness rules apply (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A client talking to a trusted network server.
    TrustedNetworkClient,
    /// A trusted network server talking to clients.
    TrustedNetworkServer,
    /// A peer in a peer-to-peer deployment with no trusted network.
    PeerToPeer,
}

impl Role {
    /// True for [`Role::PeerToPeer`].
    pub fn is_peer_to_peer(&self) -> bool {
        matches!(self, Role::PeerToPeer)
    }

    /// True for [`Role::TrustedNetworkClient`].
    pub fn is_trusted_network_client(&self) -> bool {
        matches!(self, Role::TrustedNetworkClient)
    }
}

/// The result of presenting a non-replayable ID to the Token Factory
/// (spec §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonReplayableOutcome {
    /// Inside the acceptance window; the factory has advanced its
    /// largest-seen ID.
    Accepted,
    /// At or below the largest-seen ID.
    Replayed,
    /// More than the acceptance window ahead of the largest-seen ID.
    ReplayedUnrecoverable,
}

/// Trust, revocation, and non-replayable-ID policy (spec §4.3, §4.5).
#[async_trait]
pub trait TokenFactory: Send + Sync {
    /// `Some(reason)` if the entity identity is revoked.
    async fn is_entity_revoked(&self, identity: &str) -> Option<String>;

    /// `Some(reason)` if the master token's identity is revoked.
    async fn is_master_token_identity_revoked(&self, master: &MasterToken) -> Option<String>;

    /// `Some(reason)` if the master token itself is revoked.
    async fn is_master_token_revoked(&self, master: &MasterToken) -> Option<String>;

    /// `Some(reason)` if the user-ID token is revoked.
    async fn is_user_id_token_revoked(
        &self,
        master: &MasterToken,
        user: &UserIdToken,
    ) -> Option<String>;

    /// Presents a non-replayable ID for the given master token's
    /// serial number, advancing the factory's largest-seen ID on
    /// acceptance. Must be linearizable per serial number (spec §5).
    async fn accept_non_replayable_id(
        &self,
        master_token_serial_number: i64,
        id: i64,
    ) -> NonReplayableOutcome;
}

/// Builds a crypto context from entity authentication data for a given
/// scheme (spec §4.2).
#[async_trait]
pub trait EntityAuthFactory: Send + Sync {
    /// The scheme identifier this factory handles.
    fn scheme(&self) -> &str;

    /// Derives the entity auth crypto context from `entity_auth_data`.
    async fn crypto_context(
        &self,
        entity_auth_data: &serde_json::Value,
    ) -> crate::error::Result<Arc<dyn CryptoContext>>;

    /// The identity `entity_auth_data` asserts, used for spec
    /// invariant I4 and for Token Factory revocation checks.
    fn identity(&self, entity_auth_data: &serde_json::Value) -> Option<String>;
}

/// Derives a key-exchange crypto context from a matched
/// request/response pair (spec §4.4).
#[async_trait]
pub trait KeyExchangeFactory: Send + Sync {
    /// The scheme identifier this factory handles.
    fn scheme(&self) -> &str;

    /// Derives the crypto context from the matched request/response.
    async fn derive_crypto_context(
        &self,
        request: &KeyRequestData,
        response: &KeyResponseData,
    ) -> crate::error::Result<Arc<dyn CryptoContext>>;
}

/// Process-wide cache of session crypto contexts, keyed by master
/// token serial number (spec §4.2, §5).
#[async_trait]
pub trait MslStore: Send + Sync {
    /// Looks up a cached session context for `serial_number`.
    async fn get_session_crypto_context(
        &self,
        serial_number: i64,
    ) -> Option<Arc<dyn CryptoContext>>;

    /// Installs (or replaces) the cached session context for
    /// `serial_number`. Must be atomic with respect to concurrent
    /// readers (spec §5).
    async fn set_session_crypto_context(
        &self,
        serial_number: i64,
        context: Arc<dyn CryptoContext>,
    );
}

/// The process-wide collaborator bundle every stage of the pipeline is
/// constructed with (spec §4.2, §6).
pub struct MslContext {
    /// Seals and verifies master tokens.
    pub msl_crypto_context: Arc<dyn CryptoContext>,
    entity_auth_factories: HashMap<String, Arc<dyn EntityAuthFactory>>,
    keyx_factories: HashMap<String, Arc<dyn KeyExchangeFactory>>,
    /// Entity/token trust and revocation, and non-replayable-ID
    /// bookkeeping.
    pub token_factory: Arc<dyn TokenFactory>,
    /// Process-wide session crypto context cache.
    pub msl_store: Arc<dyn MslStore>,
    /// Which deployment role this side of the pipeline plays.
    pub role: Role,
    /// Source of "now", for freshness checks.
    pub clock: Arc<dyn Clock>,
}

impl MslContext {
    /// Builds a context from its collaborators.
    pub fn new(
        msl_crypto_context: Arc<dyn CryptoContext>,
        token_factory: Arc<dyn TokenFactory>,
        msl_store: Arc<dyn MslStore>,
        role: Role,
        clock: Arc<dyn Clock>,
    ) -> Self {
        MslContext {
            msl_crypto_context,
            entity_auth_factories: HashMap::new(),
            keyx_factories: HashMap::new(),
            token_factory,
            msl_store,
            role,
            clock,
        }
    }

    /// Registers an entity auth factory under its own
    /// [`EntityAuthFactory::scheme`].
    pub fn register_entity_auth_factory(&mut self, factory: Arc<dyn EntityAuthFactory>) {
        self.entity_auth_factories
            .insert(factory.scheme().to_string(), factory);
    }

    /// Registers a key exchange factory under its own
    /// [`KeyExchangeFactory::scheme`].
    pub fn register_key_exchange_factory(&mut self, factory: Arc<dyn KeyExchangeFactory>) {
        self.keyx_factories
            .insert(factory.scheme().to_string(), factory);
    }

    /// Looks up a registered entity auth factory by scheme.
    pub fn entity_auth_factory(&self, scheme: &str) -> Option<Arc<dyn EntityAuthFactory>> {
        self.entity_auth_factories.get(scheme).cloned()
    }

    /// Looks up a registered key exchange factory by scheme.
    pub fn key_exchange_factory(&self, scheme: &str) -> Option<Arc<dyn KeyExchangeFactory>> {
        self.keyx_factories.get(scheme).cloned()
    }
}
