//! Freshness & Anti-Replay Enforcement (spec §4.5): message expiration
//! against the master token, and the non-replayable-ID acceptance
//! window.
//!
//! IDs live in `[0, 2^63)` and wrap; [`evaluate_non_replayable_id`] is
//! the pure arithmetic a [`crate::factory::TokenFactory`] bookkeeps
//! around (it alone holds the largest-ID-seen state, per master
//! token). It is kept free of any I/O or trait so the window math
//! itself is exhaustively unit-testable.

use crate::error::{MslError, MslErrorKind, Result};
use crate::factory::{MslContext, NonReplayableOutcome};
use crate::header::MessageHeader;

/// IDs are taken modulo 2^63; this is the modulus, not a sentinel
/// value.
const MODULUS: u64 = 1u64 << 63;

/// How far ahead of (or behind) the largest seen ID a candidate may be
/// and still be considered fresh (spec §4.5).
pub const ACCEPTANCE_WINDOW: u64 = 65536;

/// The result of comparing a candidate non-replayable ID against the
/// largest one already accepted for the same master token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    /// `candidate` is ahead of `largest_seen` by at most
    /// [`ACCEPTANCE_WINDOW`]; the receiver should advance its
    /// largest-seen ID to `candidate`.
    Accepted,
    /// `candidate` equals `largest_seen`, or is behind it by at most
    /// [`ACCEPTANCE_WINDOW`] — already seen, recoverable (the sender
    /// is retransmitting, not attacking).
    Replayed,
    /// `candidate` is neither within the forward window nor the
    /// backward window of `largest_seen`; too far off to trust in
    /// either direction.
    ReplayedUnrecoverable,
}

fn reduce(id: i64) -> u64 {
    (id as u64) & (MODULUS - 1)
}

/// Forward distance from `from` to `to`, both already reduced mod
/// [`MODULUS`]: how many increments of `from` reach `to`, wrapping
/// around the modulus.
fn forward_distance(from: u64, to: u64) -> u64 {
    to.wrapping_sub(from) & (MODULUS - 1)
}

/// Compares `candidate` against `largest_seen`, both non-replayable
/// IDs for the same master token (spec §4.5).
pub fn evaluate_non_replayable_id(largest_seen: i64, candidate: i64) -> FreshnessDecision {
    let largest = reduce(largest_seen);
    let cand = reduce(candidate);
    let ahead = forward_distance(largest, cand);

    if ahead == 0 {
        FreshnessDecision::Replayed
    } else if ahead <= ACCEPTANCE_WINDOW {
        FreshnessDecision::Accepted
    } else if ahead >= MODULUS - ACCEPTANCE_WINDOW {
        FreshnessDecision::Replayed
    } else {
        FreshnessDecision::ReplayedUnrecoverable
    }
}

/// Enforces message expiration and non-replayable-ID freshness for a
/// validated header (spec §4.5).
///
/// A header with no master token carries no replay protection and no
/// expiration of its own; this is a no-op for it (spec Non-goals:
/// entity auth schemes that need their own freshness story supply it
/// themselves).
pub async fn check_freshness(
    header: &MessageHeader,
    ctx: &MslContext,
    now_millis: i64,
) -> Result<()> {
    let master = match header.master_token() {
        Some(m) => m,
        None => return Ok(()),
    };

    if master.is_expired(now_millis) {
        let has_key_request_data = !header.key_request_data().is_empty();
        let tolerated = (header.is_renewable() && has_key_request_data)
            || ctx.role.is_trusted_network_client();
        if !tolerated {
            return Err(MslError::new(MslErrorKind::MessageExpired)
                .with_message_id(header.message_id())
                .with_entity(header.entity_identity().to_string()));
        }
    }

    let candidate = match header.non_replayable_id() {
        Some(id) => id,
        None => return Ok(()),
    };

    match ctx
        .token_factory
        .accept_non_replayable_id(master.serial_number(), candidate)
        .await
    {
        NonReplayableOutcome::Accepted => Ok(()),
        NonReplayableOutcome::Replayed => Err(MslError::new(MslErrorKind::MessageReplayed)
            .with_message_id(header.message_id())
            .with_entity(header.entity_identity().to_string())),
        NonReplayableOutcome::ReplayedUnrecoverable => {
            Err(MslError::new(MslErrorKind::MessageReplayedUnrecoverable)
                .with_message_id(header.message_id())
                .with_entity(header.entity_identity().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_in_sequence_is_accepted() {
        assert_eq!(
            evaluate_non_replayable_id(100, 101),
            FreshnessDecision::Accepted
        );
    }

    #[test]
    fn exact_repeat_is_replayed() {
        assert_eq!(
            evaluate_non_replayable_id(100, 100),
            FreshnessDecision::Replayed
        );
    }

    #[test]
    fn id_at_edge_of_forward_window_is_accepted() {
        assert_eq!(
            evaluate_non_replayable_id(100, 100 + ACCEPTANCE_WINDOW as i64),
            FreshnessDecision::Accepted
        );
    }

    #[test]
    fn id_just_past_forward_window_is_unrecoverable() {
        assert_eq!(
            evaluate_non_replayable_id(100, 100 + ACCEPTANCE_WINDOW as i64 + 1),
            FreshnessDecision::ReplayedUnrecoverable
        );
    }

    #[test]
    fn slightly_out_of_order_id_is_replayed_not_unrecoverable() {
        assert_eq!(
            evaluate_non_replayable_id(1_000, 999),
            FreshnessDecision::Replayed
        );
    }

    #[test]
    fn acceptance_window_wraps_past_the_modulus() {
        let largest = (1i64 << 63) - 1;
        let wrapped_candidate = 0i64;
        assert_eq!(
            evaluate_non_replayable_id(largest, wrapped_candidate),
            FreshnessDecision::Accepted
        );
    }

    #[test]
    fn replay_window_wraps_past_the_modulus() {
        let largest = 0i64;
        let wrapped_candidate = (1i64 << 63) - 1;
        assert_eq!(
            evaluate_non_replayable_id(largest, wrapped_candidate),
            FreshnessDecision::Replayed
        );
    }
}
