//!
//! # msl-core
//!
//! Receive-side pipeline for the Message Security Layer.
//!
//! A stream of bytes is turned into a sequence of self-delimited JSON
//! objects ([`frame`]), the first of which is a signed envelope around
//! either a message header or an error header ([`header`]). A message
//! header's crypto context is resolved against a cached session
//! context or a fresh master token ([`tokens`]), its freshness is
//! enforced against an acceptance window ([`freshness`]), any key
//! exchange response is matched and derived ([`keyx`]), and the
//! result is exposed as a lazily-decrypting, seekable byte source
//! ([`stream`]).
//!
//! Concrete entity authentication schemes, concrete key exchange
//! schemes, and persistence of tokens/revocation state are supplied by
//! the host application through the collaborator traits in
//! [`factory`]; [`testutil`] has in-memory implementations suitable
//! for tests.
#![warn(missing_docs)]

pub mod crypto;
pub mod error;
pub mod factory;
pub mod freshness;
pub mod header;
pub mod keyx;
pub mod stream;
pub mod time;
pub mod tokens;
pub mod wire;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

mod frame;

pub use error::{MslError, MslErrorKind, Outcome, Result};
pub use factory::{MslContext, NonReplayableOutcome, Role};
pub use frame::FrameReader;
pub use header::{ErrorHeader, Header, MessageHeader};
pub use stream::MessageInputStream;
pub use tokens::{MasterToken, UserIdToken};
