//!
//! # msl
//!
//! An implementation of the receive side of the Message Security Layer
//! (MSL): a pipeline that turns a raw, ordered byte stream into a
//! validated header, a resolved identity, and a lazily-decrypted
//! sequence of application-level chunks.
//!
//! This crate is a thin facade over [`msl_core`], which contains the
//! pipeline itself (frame reading, header validation, credential
//! resolution, key-exchange negotiation, freshness/replay enforcement
//! and the chunk stream). Concrete entity/user authentication schemes,
//! concrete key exchange schemes, message persistence, and transport
//! I/O are deliberately not provided here; callers supply them through
//! the collaborator traits in [`msl_core::factory`].
//!
#![warn(missing_docs)]

pub use msl_core::*;
