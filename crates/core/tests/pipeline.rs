use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use base64::{engine::general_purpose::STANDARD, Engine};
use msl_core::crypto::{CryptoContext, NullCryptoContext, RejectingCryptoContext, SessionCryptoContext};
use msl_core::error::{MslErrorKind, Outcome};
use msl_core::factory::{MslContext, Role};
use msl_core::stream::MessageInputStream;
use msl_core::testutil::{InMemoryMslStore, InMemoryTokenFactory};
use msl_core::time::FixedClock;
use msl_core::wire::{
    ChunkData, ChunkEnvelope, Capabilities, HeaderData, MasterTokenData, SealedMasterToken, SessionData,
    WireEnvelope,
};

const ENC_KEY: [u8; 16] = [0x11; 16];
const IV: [u8; 16] = [0x22; 16];
const HMAC_KEY: &[u8] = b"hmac-key-material";

fn init_logging() {
    let _ = env_logger::try_init();
}

fn session_context() -> SessionCryptoContext {
    SessionCryptoContext::new(ENC_KEY, IV, HMAC_KEY.to_vec())
}

fn master_token_data(serial_number: i64) -> MasterTokenData {
    let session = SessionData {
        encryptionkey: STANDARD.encode(ENC_KEY),
        hmackey: STANDARD.encode(HMAC_KEY),
        encryptioniv: STANDARD.encode(IV),
    };
    MasterTokenData {
        identity: "entity-1".into(),
        sequencenumber: 1,
        serialnumber: serial_number,
        renewalwindow: 1_000_000_000_000,
        expiration: 9_999_999_999_999,
        issuerdata: None,
        sessiondata: STANDARD.encode(serde_json::to_vec(&session).unwrap()),
    }
}

fn sealed_master_token(data: &MasterTokenData) -> SealedMasterToken {
    SealedMasterToken {
        tokendata: STANDARD.encode(serde_json::to_vec(data).unwrap()),
        signature: STANDARD.encode(b""),
    }
}

fn sealed_envelope(master: &SealedMasterToken, header: &HeaderData, session: &SessionCryptoContext) -> Vec<u8> {
    let plaintext = serde_json::to_vec(header).unwrap();
    let ciphertext = session.encrypt(&plaintext).unwrap();
    let signature = session.sign(&ciphertext).unwrap();
    let envelope = WireEnvelope {
        entityauthdata: None,
        mastertoken: Some(master.clone()),
        headerdata: Some(STANDARD.encode(&ciphertext)),
        errordata: None,
        signature: STANDARD.encode(&signature),
    };
    serde_json::to_vec(&envelope).unwrap()
}

fn chunk_envelope(chunk: &ChunkData, session: &SessionCryptoContext) -> ChunkEnvelope {
    let plaintext = serde_json::to_vec(chunk).unwrap();
    let ciphertext = session.encrypt(&plaintext).unwrap();
    let signature = session.sign(&ciphertext).unwrap();
    ChunkEnvelope {
        payload: STANDARD.encode(&ciphertext),
        signature: STANDARD.encode(&signature),
    }
}

fn chunk_bytes(chunk: &ChunkData, session: &SessionCryptoContext) -> Vec<u8> {
    serde_json::to_vec(&chunk_envelope(chunk, session)).unwrap()
}

fn base_header(message_id: i64, nonreplayableid: Option<i64>) -> HeaderData {
    HeaderData {
        messageid: message_id,
        nonreplayableid,
        renewable: false,
        handshake: false,
        capabilities: Capabilities::default(),
        keyrequestdata: Vec::new(),
        keyresponsedata: None,
        userauthdata: None,
        useridtoken: None,
        servicetokens: Vec::new(),
    }
}

fn new_context() -> MslContext {
    init_logging();
    MslContext::new(
        Arc::new(NullCryptoContext),
        Arc::new(InMemoryTokenFactory::new()),
        Arc::new(InMemoryMslStore::new()),
        Role::TrustedNetworkServer,
        Arc::new(FixedClock(0)),
    )
}

#[tokio::test]
async fn empty_message_reads_as_an_immediate_end_of_stream() {
    let ctx = new_context();
    let master_data = master_token_data(42);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b""),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    assert_eq!(stream.message_header().unwrap().message_id(), 1);
    // A single empty end-of-message chunk is inferred as a handshake
    // under the default-on legacy-handshake-inference feature.
    assert!(stream.is_handshake());

    let outcome = stream.read(1024, None).await;
    assert_matches!(outcome, Outcome::Ready(bytes) if bytes.is_empty());
}

#[tokio::test]
async fn data_message_round_trips_application_bytes() {
    let ctx = new_context();
    let master_data = master_token_data(43);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"hello world"),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    assert!(!stream.is_handshake());

    let first = stream.read(1024, None).await.into_result().unwrap();
    assert_eq!(first, b"hello world");

    let second = stream.read(1024, None).await.into_result().unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn data_split_across_multiple_chunks_is_delivered_in_order() {
    let ctx = new_context();
    let master_data = master_token_data(44);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let first_chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: false,
        compressionalgo: None,
        data: STANDARD.encode(b"hello "),
    };
    let second_chunk = ChunkData {
        sequencenumber: 2,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"world"),
    };
    wire.extend_from_slice(&chunk_bytes(&first_chunk, &session));
    wire.extend_from_slice(&chunk_bytes(&second_chunk, &session));

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    let mut collected = Vec::new();
    loop {
        let bytes = stream.read(1024, None).await.into_result().unwrap();
        if bytes.is_empty() {
            break;
        }
        collected.extend_from_slice(&bytes);
    }
    assert_eq!(collected, b"hello world");
}

#[tokio::test]
async fn bytes_after_the_end_of_message_chunk_are_left_unconsumed() {
    let ctx = new_context();
    let master_data = master_token_data(45);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"complete"),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));
    // Garbage trailing the end-of-message chunk: a well-behaved peer
    // never sends this, but a stream that tried to read past end-of-
    // message would trip over it.
    wire.extend_from_slice(b"not valid json");

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    let first = stream.read(1024, None).await.into_result().unwrap();
    assert_eq!(first, b"complete");
    let second = stream.read(1024, None).await.into_result().unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn a_repeated_non_replayable_id_is_rejected_as_replayed() {
    let ctx = new_context();
    let master_data = master_token_data(46);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();

    let header = base_header(1, Some(100));
    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b""),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));

    let _first = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();

    let header2 = base_header(2, Some(100));
    let mut wire2 = sealed_envelope(&sealed, &header2, &session);
    wire2.extend_from_slice(&chunk_bytes(&chunk, &session));

    let err = MessageInputStream::open(&wire2[..], &ctx, &[], 0, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MslErrorKind::MessageReplayed);
}

#[tokio::test]
async fn a_far_future_non_replayable_id_is_unrecoverable() {
    let ctx = new_context();
    let master_data = master_token_data(47);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();

    let header = base_header(1, Some(100));
    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b""),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));
    let _first = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();

    let header2 = base_header(2, Some(100 + 65536 + 1));
    let mut wire2 = sealed_envelope(&sealed, &header2, &session);
    wire2.extend_from_slice(&chunk_bytes(&chunk, &session));

    let err = MessageInputStream::open(&wire2[..], &ctx, &[], 0, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MslErrorKind::MessageReplayedUnrecoverable);
}

#[tokio::test]
async fn mark_and_reset_rewind_the_decrypted_byte_source() {
    let ctx = new_context();
    let master_data = master_token_data(48);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"rewindable"),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    stream.mark();
    let first = stream.read(4, None).await.into_result().unwrap();
    assert_eq!(first, b"rewi");
    stream.reset().unwrap();
    let replayed = stream.read(1024, None).await.into_result().unwrap();
    assert_eq!(replayed, b"rewindable");
}

#[tokio::test]
async fn tampered_chunk_signature_fails_verification() {
    let ctx = new_context();
    let master_data = master_token_data(49);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"data"),
    };
    let mut envelope = chunk_envelope(&chunk, &session);
    // Flip a character inside the base64 payload to corrupt the
    // ciphertext without disturbing the JSON framing.
    let flipped = envelope.payload.chars().next().map(|c| if c == 'A' { 'B' } else { 'A' }).unwrap();
    envelope.payload.replace_range(0..1, &flipped.to_string());
    wire.extend_from_slice(&serde_json::to_vec(&envelope).unwrap());

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    let err = stream.read(1024, None).await.into_result().unwrap_err();
    assert_eq!(err.kind(), MslErrorKind::PayloadVerificationFailed);

    // A chunk verify failure is terminal (spec §7): a second read must
    // keep failing the same way rather than trying to pull whatever
    // the wire has next.
    let err2 = stream.read(1024, None).await.into_result().unwrap_err();
    assert_eq!(err2.kind(), MslErrorKind::PayloadVerificationFailed);
}

#[tokio::test]
async fn a_mismatched_chunk_is_skipped_and_the_next_well_formed_chunk_still_reads() {
    let ctx = new_context();
    let master_data = master_token_data(51);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    // A chunk whose sequence number doesn't match what the stream
    // expects: a per-read failure, not a terminal one.
    let bad_chunk = ChunkData {
        sequencenumber: 7,
        messageid: 1,
        endofmsg: false,
        compressionalgo: None,
        data: STANDARD.encode(b"skip me"),
    };
    let good_chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"kept"),
    };
    wire.extend_from_slice(&chunk_bytes(&bad_chunk, &session));
    wire.extend_from_slice(&chunk_bytes(&good_chunk, &session));

    let mut stream = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();

    let err = stream.read(1024, None).await.into_result().unwrap_err();
    assert_eq!(err.kind(), MslErrorKind::PayloadSequenceNumberMismatch);

    // The stream is not poisoned by a mismatch; the next read resumes
    // from the chunk after the bad one.
    let ok = stream.read(1024, None).await.into_result().unwrap();
    assert_eq!(ok, b"kept");
}

#[tokio::test]
async fn a_master_token_with_a_cached_session_context_is_trusted_even_if_its_signature_no_longer_verifies() {
    let ctx = new_context();
    let master_data = master_token_data(52);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: true,
        compressionalgo: None,
        data: STANDARD.encode(b"cached path"),
    };
    wire.extend_from_slice(&chunk_bytes(&chunk, &session));

    // First message: no cache entry yet, the MSL crypto context (a
    // no-op `NullCryptoContext`) verifies fine and the session context
    // gets cached under this serial number.
    let mut first = MessageInputStream::open(&wire[..], &ctx, &[], 0, None).await.unwrap();
    assert_eq!(
        first.read(1024, None).await.into_result().unwrap(),
        b"cached path"
    );

    // Swap in an MSL crypto context whose signature verification
    // always fails. A second message with the same serial number must
    // still resolve via the cached session context rather than being
    // rejected MASTERTOKEN_UNTRUSTED, since the spec only fails that
    // way when the cache misses *and* verification fails (spec §4.2
    // step 2).
    let ctx2 = MslContext::new(
        Arc::new(RejectingCryptoContext),
        ctx.token_factory.clone(),
        ctx.msl_store.clone(),
        Role::TrustedNetworkServer,
        Arc::new(FixedClock(0)),
    );
    let header2 = base_header(2, Some(2));
    let mut wire2 = sealed_envelope(&sealed, &header2, &session);
    wire2.extend_from_slice(&chunk_bytes(&chunk, &session));

    let mut second = MessageInputStream::open(&wire2[..], &ctx2, &[], 0, None)
        .await
        .unwrap();
    assert_eq!(
        second.read(1024, None).await.into_result().unwrap(),
        b"cached path"
    );
}

#[tokio::test]
async fn read_times_out_when_the_next_chunk_never_arrives() {
    struct StallsAfterFirstChunk {
        data: Vec<u8>,
        pos: usize,
    }

    impl tokio::io::AsyncRead for StallsAfterFirstChunk {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.pos < self.data.len() {
                let n = (self.data.len() - self.pos).min(buf.remaining());
                let end = self.pos + n;
                buf.put_slice(&self.data[self.pos..end]);
                self.pos = end;
                std::task::Poll::Ready(Ok(()))
            } else {
                // The peer never sends more and never closes either;
                // stands in for a stalled connection.
                std::task::Poll::Pending
            }
        }
    }

    let ctx = new_context();
    let master_data = master_token_data(50);
    let sealed = sealed_master_token(&master_data);
    let session = session_context();
    let header = base_header(1, Some(1));

    let mut wire = sealed_envelope(&sealed, &header, &session);
    let first_chunk = ChunkData {
        sequencenumber: 1,
        messageid: 1,
        endofmsg: false,
        compressionalgo: None,
        data: STANDARD.encode(b"partial"),
    };
    wire.extend_from_slice(&chunk_bytes(&first_chunk, &session));

    let source = StallsAfterFirstChunk { data: wire, pos: 0 };
    let mut stream = MessageInputStream::open(source, &ctx, &[], 0, None)
        .await
        .unwrap();

    let first = stream.read(1024, None).await.into_result().unwrap();
    assert_eq!(first, b"partial");

    assert_matches!(
        stream.read(1024, Some(Duration::from_millis(20))).await,
        Outcome::TimedOut
    );
}
