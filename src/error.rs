//! Centralised error handling for the auction service.
//!
//! Every variant is an *expected, recoverable-by-caller* condition, not a
//! crash. Validation failures are returned synchronously as typed results;
//! exceptions are never used for control flow across the service boundary.
//!
//! Variants are intentionally few. Fine-grained detail rides in the variant
//! payloads (`minimum`, `expected`) so callers can build a precise retry —
//! a rejected bid always learns the exact amount that would be accepted.

use thiserror::Error;

use crate::types::Amount;

/// A convenient `Result` alias tied to [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Top-level error for all engine operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// Listing (or proxy) does not exist.
    #[error("listing not found")]
    NotFound,

    /// The auction deadline has passed; bidding is over.
    #[error("auction has ended")]
    AuctionClosed,

    /// Seller attempting to bid on, or buy, their own listing.
    #[error("seller cannot bid on their own listing")]
    SelfBidForbidden,

    /// Amount below the required minimum; `minimum` is the exact amount
    /// that would currently be accepted.
    #[error("bid too low: minimum accepted amount is {minimum}")]
    BidTooLow { minimum: Amount },

    /// Buy-now amount does not equal the listing's buy-now price
    /// (protects against stale client-side price display).
    #[error("price mismatch: buy-now price is {expected:?}")]
    PriceMismatch { expected: Option<Amount> },

    /// A purchase already exists for the listing (race lost).
    #[error("listing already sold")]
    AlreadySold,

    /// The per-listing critical section could not be acquired within the
    /// configured wait bound. Transient; safe to retry.
    #[error("timed out waiting for the listing's critical section")]
    ConcurrencyTimeout,

    /// Durable persistence of a bid/purchase failed; the whole operation
    /// was aborted (no partial commit).
    #[error("storage error: {0}")]
    Storage(String),

    /// Listing construction parameters failed validation.
    #[error("invalid listing: {0}")]
    InvalidListing(String),
}
