//! Canonical domain types for the auction service.
//!
//! This module is **dependency-light** and safe to import from every layer:
//! storage adapters, the admission engine, event consumers and handler
//! façades all share these definitions.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary amount in the platform's smallest denomination (e.g. cents).
pub type Amount = u64;

// ----------------------------------------------------------------------------
// Id newtypes
// ----------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a listing open for sale.
    ListingId
);
uuid_id!(
    /// Identifier of a user (seller or bidder).
    UserId
);
uuid_id!(
    /// Identifier of an accepted bid.
    BidId
);
uuid_id!(
    /// Identifier of a purchase record.
    PurchaseId
);

// ----------------------------------------------------------------------------
// Listing
// ----------------------------------------------------------------------------

/// The mutable auction record for one item.
///
/// `sold` is monotonic: it flips `false → true` exactly once, at the moment
/// the finalizer creates the listing's [`Purchase`]. Once set, no further
/// bids or purchases are admitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: UserId,
    /// Starting/minimum price; immutable after creation.
    pub floor_price: Amount,
    /// Optional fixed price that ends the auction immediately when paid.
    pub buy_now_price: Option<Amount>,
    /// `None` means no auction semantics (pure buy-now item).
    pub auction_end: Option<DateTime<Utc>>,
    /// Timestamp of the most recent accepted bid.
    pub last_bid_at: Option<DateTime<Utc>>,
    pub sold: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Whether the auction deadline (if any) has passed.
    pub fn is_ended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.auction_end, Some(end) if now >= end)
    }

    /// Whether the listing can still admit bids at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.sold && !self.is_ended(now)
    }

    /// Whether the periodic sweep should finalize this listing.
    pub fn is_due_for_finalize(&self, now: DateTime<Utc>) -> bool {
        !self.sold && self.is_ended(now)
    }
}

/// Immutable listing parameters used for construction.
#[derive(Clone, Debug)]
pub struct CreateListing {
    pub seller: UserId,
    pub floor_price: Amount,
    pub buy_now_price: Option<Amount>,
    /// How long the auction should stay open; `None` for pure buy-now items.
    pub auction_duration: Option<Duration>,
}

// ----------------------------------------------------------------------------
// Bid
// ----------------------------------------------------------------------------

/// An accepted bid. Immutable once created.
///
/// Within one listing, amounts are strictly increasing in ledger order; the
/// highest amount at any time is the floor for the next admission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub listing_id: ListingId,
    pub bidder: UserId,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

// ----------------------------------------------------------------------------
// ProxyBid
// ----------------------------------------------------------------------------

/// A bidder-authorized ceiling the engine escalates automatically.
///
/// At most one per (listing, bidder); re-submission updates `max_amount`
/// and `updated_at` but keeps `created_at`, which serves as the tie-break
/// key when two proxies carry equal ceilings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyBid {
    pub listing_id: ListingId,
    pub bidder: UserId,
    /// Private ceiling; never exceeded by a generated bid.
    pub max_amount: Amount,
    /// Amount this proxy has actually placed as a real bid so far.
    pub current_bid: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ----------------------------------------------------------------------------
// Purchase
// ----------------------------------------------------------------------------

/// The single, immutable record of a completed sale.
///
/// Creating it is the moment the listing transitions to `sold`; the pair
/// (listing, purchase) is 1:1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub listing_id: ListingId,
    pub buyer: UserId,
    /// The actual clearing price.
    pub price: Amount,
    pub created_at: DateTime<Utc>,
}

// ----------------------------------------------------------------------------
// Operation outcomes
// ----------------------------------------------------------------------------

/// Result of a successful [`place_bid`](crate::engine::AuctionEngine::place_bid).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BidOutcome {
    /// The amount now standing as the highest bid.
    pub accepted_amount: Amount,
    /// Owner of the standing bid (may differ from the manual bidder when a
    /// competing proxy overrode them).
    pub leading_bidder: UserId,
    /// Whether the anti-snipe rule pushed `auction_end` forward.
    pub extended: bool,
    /// Number of proxy-generated bids appended during this admission.
    pub auto_triggered: u32,
}

/// Result of a successful [`set_proxy_bid`](crate::engine::AuctionEngine::set_proxy_bid).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyOutcome {
    /// The bid currently standing for this proxy's owner, if any.
    /// `None` for an accepted-but-inert proxy that generated nothing.
    pub standing_bid: Option<Amount>,
}

/// Result of a successful [`buy_now`](crate::engine::AuctionEngine::buy_now).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuyNowOutcome {
    pub purchase_id: PurchaseId,
    pub price: Amount,
}

/// Result of [`finalize`](crate::engine::AuctionEngine::finalize).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizeOutcome {
    /// A purchase was created for the winning bidder.
    Finalized(PurchaseId),
    /// A purchase already existed; nothing was done (idempotent success).
    AlreadyFinalized(PurchaseId),
    /// The deadline passed with zero bids; the listing closed unsold.
    ClosedUnsold,
    /// No closing condition holds yet; nothing was done.
    NotDue,
}

/// Result of one [`sweep_expired_auctions`](crate::engine::AuctionEngine::sweep_expired_auctions) pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Listings converted into a purchase during this pass.
    pub finalized: u32,
    /// Listings that closed with no bids during this pass.
    pub closed_unsold: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_liveness_predicates() {
        let now = Utc::now();
        let mut listing = Listing {
            id: ListingId::new(),
            seller: UserId::new(),
            floor_price: 100,
            buy_now_price: None,
            auction_end: Some(now + Duration::hours(1)),
            last_bid_at: None,
            sold: false,
            created_at: now,
        };

        assert!(listing.is_open(now));
        assert!(!listing.is_due_for_finalize(now));

        listing.auction_end = Some(now - Duration::seconds(1));
        assert!(!listing.is_open(now));
        assert!(listing.is_due_for_finalize(now));

        listing.sold = true;
        assert!(!listing.is_due_for_finalize(now));
    }

    #[test]
    fn pure_buy_now_listing_never_ends_by_time() {
        let now = Utc::now();
        let listing = Listing {
            id: ListingId::new(),
            seller: UserId::new(),
            floor_price: 50,
            buy_now_price: Some(500),
            auction_end: None,
            last_bid_at: None,
            sold: false,
            created_at: now - Duration::days(30),
        };
        assert!(listing.is_open(now));
        assert!(!listing.is_due_for_finalize(now));
    }
}
