//! Storage abstraction for listings, bids, proxies and purchases.
//!
//! The engine talks to persistence exclusively through [`ListingStore`], so
//! any durable backend (Postgres, RocksDB, …) can be plugged in. All writes
//! are issued from inside the caller's per-listing critical section (see
//! [`crate::engine`]), so the store itself does not need to serialize
//! mutations of one listing — it only needs to be internally consistent.
//!
//! Out of the box we ship [`MemoryStore`], an in-memory implementation that
//! is perfect for unit tests and local dev environments, *not* production.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::types::{Bid, Listing, ListingId, ProxyBid, Purchase, UserId};

/// Storage seam between the admission engine and persistence.
///
/// A failure from any write method aborts the enclosing operation; the
/// engine never commits a bid or purchase it could not persist.
#[async_trait]
pub trait ListingStore: Send + Sync + 'static {
    async fn insert_listing(&self, listing: Listing) -> Result<()>;
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>>;
    async fn update_listing(&self, listing: &Listing) -> Result<()>;

    /// Append an accepted bid to the listing's ledger.
    async fn insert_bid(&self, bid: Bid) -> Result<()>;
    /// The listing's ledger in admission order.
    async fn bids_for_listing(&self, id: ListingId) -> Result<Vec<Bid>>;
    /// Current highest bid, if any.
    async fn highest_bid(&self, id: ListingId) -> Result<Option<Bid>>;

    /// Create or replace the (listing, bidder) proxy record.
    async fn upsert_proxy(&self, proxy: ProxyBid) -> Result<()>;
    async fn proxy_for(&self, id: ListingId, bidder: UserId) -> Result<Option<ProxyBid>>;
    async fn proxies_for_listing(&self, id: ListingId) -> Result<Vec<ProxyBid>>;

    async fn insert_purchase(&self, purchase: Purchase) -> Result<()>;
    async fn purchase_for_listing(&self, id: ListingId) -> Result<Option<Purchase>>;

    /// Listings whose deadline has passed and that are not yet sold.
    async fn listings_due_for_finalize(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>>;
}

// ----------------------------------------------------------------------------
// In-memory implementation
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    listings: HashMap<ListingId, Listing>,
    /// Ledger per listing, in admission order.
    bids: HashMap<ListingId, Vec<Bid>>,
    /// One proxy per (listing, bidder).
    proxies: HashMap<ListingId, HashMap<UserId, ProxyBid>>,
    purchases: HashMap<ListingId, Purchase>,
}

/// Thread-safe in-memory store backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn insert_listing(&self, listing: Listing) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.listings.insert(listing.id, listing);
        Ok(())
    }

    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        let inner = self.inner.read().await;
        Ok(inner.listings.get(&id).cloned())
    }

    async fn update_listing(&self, listing: &Listing) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.listings.get_mut(&listing.id) {
            Some(slot) => {
                *slot = listing.clone();
                Ok(())
            }
            None => Err(EngineError::NotFound),
        }
    }

    async fn insert_bid(&self, bid: Bid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.bids.entry(bid.listing_id).or_default().push(bid);
        Ok(())
    }

    async fn bids_for_listing(&self, id: ListingId) -> Result<Vec<Bid>> {
        let inner = self.inner.read().await;
        Ok(inner.bids.get(&id).cloned().unwrap_or_default())
    }

    async fn highest_bid(&self, id: ListingId) -> Result<Option<Bid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .bids
            .get(&id)
            .and_then(|bids| bids.iter().max_by_key(|b| b.amount).cloned()))
    }

    async fn upsert_proxy(&self, proxy: ProxyBid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .proxies
            .entry(proxy.listing_id)
            .or_default()
            .insert(proxy.bidder, proxy);
        Ok(())
    }

    async fn proxy_for(&self, id: ListingId, bidder: UserId) -> Result<Option<ProxyBid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .proxies
            .get(&id)
            .and_then(|per_bidder| per_bidder.get(&bidder).cloned()))
    }

    async fn proxies_for_listing(&self, id: ListingId) -> Result<Vec<ProxyBid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .proxies
            .get(&id)
            .map(|per_bidder| per_bidder.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_purchase(&self, purchase: Purchase) -> Result<()> {
        let mut inner = self.inner.write().await;
        // The engine re-checks under its lock; this guard is the store's own
        // last line of defence for the 1:1 listing/purchase invariant.
        if inner.purchases.contains_key(&purchase.listing_id) {
            return Err(EngineError::AlreadySold);
        }
        inner.purchases.insert(purchase.listing_id, purchase);
        Ok(())
    }

    async fn purchase_for_listing(&self, id: ListingId) -> Result<Option<Purchase>> {
        let inner = self.inner.read().await;
        Ok(inner.purchases.get(&id).cloned())
    }

    async fn listings_due_for_finalize(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .listings
            .values()
            .filter(|l| l.is_due_for_finalize(now))
            .map(|l| l.id)
            .collect())
    }
}
