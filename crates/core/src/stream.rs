//! The Chunk Stream and Message Input Stream (spec §4.6): lazily
//! authenticates/decrypts payload chunks on demand and exposes the
//! result as a seekable (mark/reset) byte source.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use log::warn;
use tokio::io::AsyncRead;

use crate::crypto::CryptoContext;
use crate::error::{MslError, MslErrorKind, Outcome, Result};
use crate::factory::MslContext;
use crate::frame::FrameReader;
use crate::freshness;
use crate::header::{self, ErrorHeader, Header, MessageHeader};
use crate::keyx;
use crate::wire::{ChunkData, ChunkEnvelope, KeyRequestData};

/// A growable byte buffer that supports a single outstanding
/// mark/reset pair (spec §4.6).
///
/// Bytes are only discarded once they are both consumed and not
/// behind an outstanding mark, so a caller that never marks pays no
/// memory cost beyond the current chunk's worth of backlog.
struct RewindBuffer {
    data: Vec<u8>,
    pos: usize,
    mark: Option<usize>,
}

impl RewindBuffer {
    fn new() -> Self {
        RewindBuffer {
            data: Vec::new(),
            pos: 0,
            mark: None,
        }
    }

    fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.compact();
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.compact();
        n
    }

    fn mark(&mut self) {
        self.mark = Some(self.pos);
    }

    fn reset(&mut self) -> Result<()> {
        match self.mark {
            Some(m) => {
                self.pos = m;
                Ok(())
            }
            None => Err(MslError::new(MslErrorKind::InternalException)),
        }
    }

    /// Drops bytes before the earliest of the current position and an
    /// outstanding mark; nothing still reachable by `read`/`reset` is
    /// ever discarded.
    fn compact(&mut self) {
        let keep_from = self.mark.unwrap_or(self.pos).min(self.pos);
        if keep_from > 0 {
            self.data.drain(0..keep_from);
            self.pos -= keep_from;
            if let Some(m) = self.mark.as_mut() {
                *m -= keep_from;
            }
        }
    }
}

/// A receive-side MSL message: a validated header plus, for message
/// headers, a lazily-decrypted stream of application bytes.
pub struct MessageInputStream<R> {
    frame_reader: FrameReader<R>,
    header: Header,
    payload_crypto_context: Option<Arc<dyn CryptoContext>>,
    key_exchange_crypto_context: Option<Arc<dyn CryptoContext>>,
    buffer: RewindBuffer,
    expected_sequence_number: i64,
    chunk_count: u64,
    inferred_handshake: bool,
    end_of_message: bool,
    closed: bool,
    /// Set once a chunk fails signature verification (spec §7: "Verify
    /// failures on the current chunk terminate the stream"), in
    /// contrast to a message-ID/sequence-number mismatch, which only
    /// fails the read that found it and leaves the stream able to pull
    /// the next chunk. Every subsequent `read` fails once this is set.
    poisoned: bool,
}

impl<R: AsyncRead + Unpin> MessageInputStream<R> {
    /// Reads the first envelope off `inner`, validates it, and
    /// resolves the crypto context that will govern any payload
    /// chunks (spec §4.2 through §4.5).
    ///
    /// `requests_sent` is the key request data the caller itself sent
    /// earlier in the exchange, used to match an incoming key
    /// response (spec §4.4). `now_millis` is the instant freshness is
    /// evaluated against. `timeout`, if given, bounds the whole
    /// operation (frame pull, crypto verify/decrypt, token-factory
    /// lookups); on elapse this reports [`MslErrorKind::Timeout`]
    /// without having installed any stream state (spec §5).
    pub async fn open(
        inner: R,
        ctx: &MslContext,
        requests_sent: &[KeyRequestData],
        now_millis: i64,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let fut = Self::open_inner(inner, ctx, requests_sent, now_millis);
        match timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result,
                Err(_) => Err(MslError::new(MslErrorKind::Timeout)),
            },
            None => fut.await,
        }
    }

    async fn open_inner(
        inner: R,
        ctx: &MslContext,
        requests_sent: &[KeyRequestData],
        now_millis: i64,
    ) -> Result<Self> {
        let mut frame_reader = FrameReader::new(inner);
        let first = frame_reader
            .next_frame()
            .await?
            .ok_or_else(|| MslError::new(MslErrorKind::MessageFormatError))?;
        let parsed = header::parse_header(first, ctx).await?;

        match parsed {
            Header::Error(error_header) => Ok(MessageInputStream {
                frame_reader,
                header: Header::Error(error_header),
                payload_crypto_context: None,
                key_exchange_crypto_context: None,
                buffer: RewindBuffer::new(),
                expected_sequence_number: 1,
                chunk_count: 0,
                inferred_handshake: false,
                end_of_message: true,
                closed: false,
                poisoned: false,
            }),
            Header::Message(message_header) => {
                freshness::check_freshness(&message_header, ctx, now_millis).await?;

                let key_exchange_crypto_context =
                    keyx::resolve_key_exchange_crypto_context(&message_header, requests_sent, ctx)
                        .await?;

                let session_context: Arc<dyn CryptoContext> = match message_header.master_token() {
                    Some(master) => Arc::new(master.session_crypto_context()?),
                    None => message_header.crypto_context.clone(),
                };
                let payload_crypto_context = keyx::select_payload_crypto_context(
                    ctx.role,
                    session_context,
                    key_exchange_crypto_context.clone(),
                );

                Ok(MessageInputStream {
                    frame_reader,
                    header: Header::Message(message_header),
                    payload_crypto_context: Some(payload_crypto_context),
                    key_exchange_crypto_context,
                    buffer: RewindBuffer::new(),
                    expected_sequence_number: 1,
                    chunk_count: 0,
                    inferred_handshake: false,
                    end_of_message: false,
                    closed: false,
                    poisoned: false,
                })
            }
        }
    }

    /// The validated message header, if this message carries one
    /// rather than an error header.
    pub fn message_header(&self) -> Option<&MessageHeader> {
        match &self.header {
            Header::Message(h) => Some(h),
            Header::Error(_) => None,
        }
    }

    /// The validated error header, if the peer sent one in place of a
    /// message header.
    pub fn error_header(&self) -> Option<&ErrorHeader> {
        match &self.header {
            Header::Message(_) => None,
            Header::Error(h) => Some(h),
        }
    }

    /// The sender's resolved entity identity.
    pub fn identity(&self) -> &str {
        match &self.header {
            Header::Message(h) => h.entity_identity(),
            Header::Error(h) => h.entity_identity(),
        }
    }

    /// The bound user-ID token's opaque user data, if a message header
    /// carried one.
    pub fn user(&self) -> Option<&serde_json::Value> {
        self.message_header()
            .and_then(|h| h.user_id_token())
            .map(|u| u.user_data())
    }

    /// The crypto context governing payload chunks, if this message
    /// carries any.
    pub fn payload_crypto_context(&self) -> Option<Arc<dyn CryptoContext>> {
        self.payload_crypto_context.clone()
    }

    /// The crypto context a successful key exchange on this message
    /// produced, if any (spec §4.4).
    pub fn key_exchange_crypto_context(&self) -> Option<Arc<dyn CryptoContext>> {
        self.key_exchange_crypto_context.clone()
    }

    /// Whether this message should be treated as a handshake message:
    /// either explicitly flagged in the header, or — under
    /// `legacy-handshake-inference` — inferred from having consisted
    /// of exactly one empty, end-of-message chunk.
    pub fn is_handshake(&self) -> bool {
        let explicit = self.message_header().map(|h| h.is_explicit_handshake()).unwrap_or(false);
        explicit || (cfg!(feature = "legacy-handshake-inference") && self.inferred_handshake)
    }

    /// Whether a call to [`Self::read`] can return data without
    /// pulling more chunks off the wire.
    ///
    /// This is not spec §4.6's `isReady` (header validation plus the
    /// §4.5 freshness checks, with the outcome cached): that work all
    /// happens inside [`Self::open`], since this design validates the
    /// header up front rather than lazily on first access. This method
    /// only reports buffered-bytes-available, for callers deciding
    /// whether to `read` now or wait for more chunks.
    pub fn has_buffered_data(&self) -> bool {
        self.buffer.available() > 0
    }

    /// Marks the current read position for a later [`Self::reset`].
    pub fn mark(&mut self) {
        self.buffer.mark();
    }

    /// Rewinds the read position to the last [`Self::mark`].
    ///
    /// Returns [`MslErrorKind::InternalException`] if no mark is
    /// outstanding.
    pub fn reset(&mut self) -> Result<()> {
        self.buffer.reset()
    }

    /// Closes the stream. Further reads return
    /// [`MslErrorKind::InternalException`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Reads up to `max_len` decrypted bytes, pulling and decrypting
    /// chunks off the wire as needed.
    ///
    /// Returns `Outcome::Ready(vec![])` once the end-of-message chunk
    /// has been consumed and the buffer is drained: ordinary
    /// end-of-stream, not an error. Calling `read` on a stream that
    /// carries only an error header is
    /// [`MslErrorKind::InternalException`], since there is no payload
    /// to read. `timeout`, if given, bounds the pull of whatever
    /// chunks this call needs; on elapse stream state is left exactly
    /// as it was before the call, and the caller may retry (spec §5).
    pub async fn read(&mut self, max_len: usize, timeout: Option<Duration>) -> Outcome<Vec<u8>> {
        if self.closed {
            return Outcome::Err(MslError::new(MslErrorKind::InternalException));
        }
        if self.error_header().is_some() {
            return Outcome::Err(MslError::new(MslErrorKind::InternalException));
        }
        if self.poisoned {
            return Outcome::Err(self.poisoned_error());
        }

        let fill_result = match timeout {
            Some(d) => match tokio::time::timeout(d, self.fill()).await {
                Ok(result) => result,
                Err(_) => return Outcome::TimedOut,
            },
            None => self.fill().await,
        };
        if let Err(e) = fill_result {
            return Outcome::Err(e);
        }

        let mut out = vec![0u8; max_len.min(self.buffer.available())];
        let n = self.buffer.read(&mut out);
        out.truncate(n);
        Outcome::Ready(out)
    }

    /// Rebuilds the error a poisoned stream keeps failing with, using
    /// whatever message ID/entity context is still available off the
    /// header (the original [`MslError`] isn't `Clone`, so it isn't
    /// kept around directly).
    fn poisoned_error(&self) -> MslError {
        let err = MslError::new(MslErrorKind::PayloadVerificationFailed);
        match self.message_header() {
            Some(h) => err
                .with_message_id(h.message_id())
                .with_entity(h.entity_identity().to_string()),
            None => err,
        }
    }

    /// Pulls and decrypts chunks until the buffer holds at least one
    /// byte, the end-of-message chunk has been consumed, or the
    /// stream closes.
    async fn fill(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(self.poisoned_error());
        }
        while self.buffer.available() == 0 && !self.end_of_message {
            let (message_id, entity) = match self.message_header() {
                Some(h) => (h.message_id(), h.entity_identity().to_string()),
                None => return Ok(()),
            };
            let crypto = self
                .payload_crypto_context
                .clone()
                .ok_or_else(|| MslError::new(MslErrorKind::InternalException))?;

            let value = self.frame_reader.next_frame().await?.ok_or_else(|| {
                MslError::new(MslErrorKind::MessageFormatError)
                    .with_message_id(message_id)
                    .with_entity(entity.clone())
            })?;
            let envelope: ChunkEnvelope = serde_json::from_value(value)
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

            let ciphertext = STANDARD
                .decode(&envelope.payload)
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;
            let signature = STANDARD
                .decode(&envelope.signature)
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

            if !crypto.verify(&ciphertext, &signature)? {
                // Unlike a message-ID/sequence mismatch below, a chunk
                // that fails verification can't be trusted enough to
                // even know whether skipping it is safe; the stream
                // dies here rather than risk resynchronizing onto
                // attacker-controlled framing (spec §7).
                self.poisoned = true;
                return Err(MslError::new(MslErrorKind::PayloadVerificationFailed)
                    .with_message_id(message_id)
                    .with_entity(entity));
            }
            let plaintext = crypto.decrypt(&ciphertext)?;
            let chunk: ChunkData = serde_json::from_slice(&plaintext)
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

            if chunk.messageid != message_id {
                warn!(
                    "message {message_id}: chunk message ID mismatch (got {}); skipping",
                    chunk.messageid
                );
                return Err(MslError::new(MslErrorKind::PayloadMessageIdMismatch)
                    .with_message_id(message_id)
                    .with_entity(entity));
            }
            if chunk.sequencenumber != self.expected_sequence_number {
                warn!(
                    "message {message_id}: chunk sequence number mismatch (expected {}, got {}); skipping",
                    self.expected_sequence_number, chunk.sequencenumber
                );
                return Err(MslError::new(MslErrorKind::PayloadSequenceNumberMismatch)
                    .with_message_id(message_id)
                    .with_entity(entity));
            }

            let data = STANDARD
                .decode(&chunk.data)
                .map_err(|e| MslError::new(MslErrorKind::MessageFormatError).with_source(e))?;

            self.chunk_count += 1;
            self.inferred_handshake = self.chunk_count == 1 && chunk.endofmsg && data.is_empty();
            self.expected_sequence_number += 1;

            self.buffer.append(&data);
            if chunk.endofmsg {
                // A well-behaved peer sends nothing after the
                // end-of-message chunk; bytes trailing it belong to
                // the next message on the stream, not this one, so
                // they are left unread rather than drained here.
                self.end_of_message = true;
            }
        }
        Ok(())
    }
}
