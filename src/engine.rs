//! The bid-admission and auction-closing engine.
//!
//! Responsibilities
//! ----------------
//! 1. Validate and admit manual bids, resolving proxy competition.
//! 2. Enforce floor, minimum-increment and anti-sniping rules.
//! 3. Serialize every mutation of one listing's bidding state behind a
//!    per-listing critical section, so no bid is ever admitted against a
//!    stale read and no listing is ever sold twice.
//! 4. Convert closing conditions (buy-now, deadline with bids) into exactly
//!    one immutable [`Purchase`], directly or via the periodic sweep.
//!
//! The engine is designed for dependency-injection: any persistent storage
//! implementing [`ListingStore`] can be plugged in; [`MemoryStore`] serves
//! unit tests and local dev environments.
//!
//! Concurrency
//! -----------
//! Contention is scoped per listing id. A lock table hands out one async
//! mutex per listing; all five mutating operations acquire it with a bounded
//! wait ([`EngineError::ConcurrencyTimeout`] on expiry). Distinct listings
//! proceed fully in parallel. Events are published only after the critical
//! section has committed, so notification and invoicing latency can never
//! block or roll back a bidding outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::escalation::{escalate, StandingBid};
use crate::events::AuctionEvent;
use crate::store::ListingStore;
use crate::types::{
    Amount, Bid, BidId, BidOutcome, BuyNowOutcome, CreateListing, FinalizeOutcome, Listing,
    ListingId, ProxyBid, ProxyOutcome, Purchase, PurchaseId, SweepReport, UserId,
};

/// One async mutex per listing. Entries are a few machine words and are
/// kept for the lifetime of the engine; stale entries for closed listings
/// are harmless.
type LockTable = Arc<Mutex<HashMap<ListingId, Arc<AsyncMutex<()>>>>>;

/// The auction engine. Cheap to clone; clones share the store, the lock
/// table and the event channel.
pub struct AuctionEngine<S: ListingStore> {
    store: Arc<S>,
    config: EngineConfig,
    locks: LockTable,
    event_tx: broadcast::Sender<AuctionEvent>,
}

impl<S: ListingStore> Clone for AuctionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            locks: Arc::clone(&self.locks),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<S: ListingStore> AuctionEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            store: Arc::new(store),
            config,
            locks: Arc::default(),
            event_tx,
        }
    }

    /// Subscribe to committed-mutation events (see [`crate::events`]).
    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Listing lifecycle
    // ------------------------------------------------------------------

    /// Create a listing open for bidding and/or buy-now.
    #[instrument(skip(self, params), fields(seller = %params.seller))]
    pub async fn create_listing(&self, params: CreateListing) -> Result<ListingId> {
        if params.floor_price == 0 {
            return Err(EngineError::InvalidListing(
                "floor price must be positive".into(),
            ));
        }
        if let Some(buy_now) = params.buy_now_price {
            if buy_now < params.floor_price {
                return Err(EngineError::InvalidListing(
                    "buy-now price below floor price".into(),
                ));
            }
        }
        if matches!(params.auction_duration, Some(d) if d <= chrono::Duration::zero()) {
            return Err(EngineError::InvalidListing(
                "auction duration must be positive".into(),
            ));
        }

        let now = Utc::now();
        let listing = Listing {
            id: ListingId::new(),
            seller: params.seller,
            floor_price: params.floor_price,
            buy_now_price: params.buy_now_price,
            auction_end: params.auction_duration.map(|d| now + d),
            last_bid_at: None,
            sold: false,
            created_at: now,
        };
        let id = listing.id;
        let event = AuctionEvent::ListingCreated {
            listing_id: id,
            seller: listing.seller,
            floor_price: listing.floor_price,
        };
        self.store.insert_listing(listing).await?;
        info!(listing_id = %id, "listing created");
        self.publish(event);
        Ok(id)
    }

    /// Read one listing.
    pub async fn listing(&self, id: ListingId) -> Result<Listing> {
        self.store.get_listing(id).await?.ok_or(EngineError::NotFound)
    }

    /// The listing's accepted bids in admission order.
    pub async fn bid_history(&self, id: ListingId) -> Result<Vec<Bid>> {
        self.listing(id).await?;
        self.store.bids_for_listing(id).await
    }

    /// Current highest bid, if any.
    pub async fn highest_bid(&self, id: ListingId) -> Result<Option<Bid>> {
        self.listing(id).await?;
        self.store.highest_bid(id).await
    }

    // ------------------------------------------------------------------
    // Bid admission
    // ------------------------------------------------------------------

    /// Admit a manual bid.
    ///
    /// Validates against the serialized current state, resolves proxy
    /// competition, appends the admitted bid(s), and applies the anti-snipe
    /// extension. The manual bid is always recorded for audit even when a
    /// competing proxy immediately overrides it.
    #[instrument(skip(self), fields(%listing_id, %bidder, amount))]
    pub async fn place_bid(
        &self,
        listing_id: ListingId,
        bidder: UserId,
        amount: Amount,
    ) -> Result<BidOutcome> {
        let _guard = self.lock_listing(listing_id).await?;
        let now = Utc::now();

        let mut listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if listing.sold || self.store.purchase_for_listing(listing_id).await?.is_some() {
            return Err(EngineError::AlreadySold);
        }
        if listing.is_ended(now) {
            return Err(EngineError::AuctionClosed);
        }
        if bidder == listing.seller {
            return Err(EngineError::SelfBidForbidden);
        }

        let previous = self.store.highest_bid(listing_id).await?;
        let min_bid = match &previous {
            Some(high) => high.amount.saturating_add(self.config.bid_increment),
            None => listing.floor_price,
        };
        if amount < min_bid {
            return Err(EngineError::BidTooLow { minimum: min_bid });
        }

        // A fresh manual bid is a floor for the bidder's own proxy: raise its
        // current standing, never its ceiling.
        if let Some(mut own) = self.store.proxy_for(listing_id, bidder).await? {
            if amount > own.current_bid {
                own.current_bid = amount;
                own.updated_at = now;
                self.store.upsert_proxy(own).await?;
            }
        }

        self.store
            .insert_bid(Bid {
                id: BidId::new(),
                listing_id,
                bidder,
                amount,
                created_at: now,
            })
            .await?;

        // The manual bidder's own ceiling sits this contest out.
        let proxies = self.store.proxies_for_listing(listing_id).await?;
        let contest = escalate(
            Some(StandingBid { bidder, amount }),
            listing.floor_price,
            self.config.bid_increment,
            &proxies,
            Some(bidder),
        );
        self.apply_generated_bids(&listing, &contest.generated, now)
            .await?;

        listing.last_bid_at = Some(now);
        let extended = self.apply_extension(&mut listing, now);
        self.store.update_listing(&listing).await?;

        let standing = contest
            .standing
            .unwrap_or(StandingBid { bidder, amount });
        debug!(
            accepted = standing.amount,
            auto = contest.generated.len(),
            extended,
            "bid admitted"
        );

        let mut events = vec![AuctionEvent::BidPlaced {
            listing_id,
            seller: listing.seller,
            bidder,
            amount,
            auto: false,
        }];
        for generated in &contest.generated {
            events.push(AuctionEvent::BidPlaced {
                listing_id,
                seller: listing.seller,
                bidder: generated.bidder,
                amount: generated.amount,
                auto: true,
            });
        }
        if let Some(prev) = previous {
            if prev.bidder != standing.bidder {
                events.push(AuctionEvent::Outbid {
                    listing_id,
                    previous_leader: prev.bidder,
                    new_amount: standing.amount,
                });
            }
        }
        if extended {
            if let Some(new_end) = listing.auction_end {
                events.push(AuctionEvent::AuctionExtended {
                    listing_id,
                    new_end,
                });
            }
        }

        drop(_guard);
        for event in events {
            self.publish(event);
        }

        Ok(BidOutcome {
            accepted_amount: standing.amount,
            leading_bidder: standing.bidder,
            extended,
            auto_triggered: contest.generated.len() as u32,
        })
    }

    /// Create or raise the bidder's private ceiling for a listing.
    ///
    /// A ceiling below the current floor is accepted but inert. An
    /// immediately-actionable ceiling competes right away: it opens at the
    /// floor on a bid-less listing, otherwise escalates from the current
    /// highest bid.
    #[instrument(skip(self), fields(%listing_id, %bidder, max_amount))]
    pub async fn set_proxy_bid(
        &self,
        listing_id: ListingId,
        bidder: UserId,
        max_amount: Amount,
    ) -> Result<ProxyOutcome> {
        let _guard = self.lock_listing(listing_id).await?;
        let now = Utc::now();

        let mut listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if listing.sold || self.store.purchase_for_listing(listing_id).await?.is_some() {
            return Err(EngineError::AlreadySold);
        }
        if listing.is_ended(now) {
            return Err(EngineError::AuctionClosed);
        }
        if bidder == listing.seller {
            return Err(EngineError::SelfBidForbidden);
        }
        if max_amount == 0 {
            return Err(EngineError::BidTooLow {
                minimum: listing.floor_price,
            });
        }

        let proxy = match self.store.proxy_for(listing_id, bidder).await? {
            Some(mut existing) => {
                existing.max_amount = max_amount;
                existing.updated_at = now;
                existing
            }
            None => ProxyBid {
                listing_id,
                bidder,
                max_amount,
                current_bid: 0,
                created_at: now,
                updated_at: now,
            },
        };
        self.store.upsert_proxy(proxy).await?;

        let previous = self.store.highest_bid(listing_id).await?;
        let standing = previous.as_ref().map(|h| StandingBid {
            bidder: h.bidder,
            amount: h.amount,
        });
        let proxies = self.store.proxies_for_listing(listing_id).await?;
        let contest = escalate(
            standing,
            listing.floor_price,
            self.config.bid_increment,
            &proxies,
            None,
        );
        self.apply_generated_bids(&listing, &contest.generated, now)
            .await?;

        let mut extended = false;
        if !contest.generated.is_empty() {
            listing.last_bid_at = Some(now);
            extended = self.apply_extension(&mut listing, now);
            self.store.update_listing(&listing).await?;
        }

        let mut events = vec![AuctionEvent::ProxyUpdated { listing_id, bidder }];
        for generated in &contest.generated {
            events.push(AuctionEvent::BidPlaced {
                listing_id,
                seller: listing.seller,
                bidder: generated.bidder,
                amount: generated.amount,
                auto: true,
            });
        }
        if let (Some(prev), Some(new_standing)) = (&previous, &contest.standing) {
            if prev.bidder != new_standing.bidder {
                events.push(AuctionEvent::Outbid {
                    listing_id,
                    previous_leader: prev.bidder,
                    new_amount: new_standing.amount,
                });
            }
        }
        if extended {
            if let Some(new_end) = listing.auction_end {
                events.push(AuctionEvent::AuctionExtended {
                    listing_id,
                    new_end,
                });
            }
        }

        let standing_bid = self
            .store
            .proxy_for(listing_id, bidder)
            .await?
            .map(|p| p.current_bid)
            .filter(|&current| current > 0);

        drop(_guard);
        for event in events {
            self.publish(event);
        }

        Ok(ProxyOutcome { standing_bid })
    }

    /// Purchase the listing at its fixed buy-now price, ending any ongoing
    /// auction immediately. Races against bidding and finalization on the
    /// same listing are settled by the critical section: exactly one buyer
    /// can ever win.
    #[instrument(skip(self), fields(%listing_id, %buyer, amount))]
    pub async fn buy_now(
        &self,
        listing_id: ListingId,
        buyer: UserId,
        amount: Amount,
    ) -> Result<BuyNowOutcome> {
        let _guard = self.lock_listing(listing_id).await?;
        let now = Utc::now();

        let mut listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if listing.sold || self.store.purchase_for_listing(listing_id).await?.is_some() {
            return Err(EngineError::AlreadySold);
        }
        if listing.is_ended(now) {
            return Err(EngineError::AuctionClosed);
        }
        if buyer == listing.seller {
            return Err(EngineError::SelfBidForbidden);
        }
        let price = match listing.buy_now_price {
            Some(price) if price == amount => price,
            expected => return Err(EngineError::PriceMismatch { expected }),
        };

        // Terminal bid, then the purchase, all inside the same section.
        self.store
            .insert_bid(Bid {
                id: BidId::new(),
                listing_id,
                bidder: buyer,
                amount: price,
                created_at: now,
            })
            .await?;

        let purchase = Purchase {
            id: PurchaseId::new(),
            listing_id,
            buyer,
            price,
            created_at: now,
        };
        let purchase_id = purchase.id;
        self.store.insert_purchase(purchase).await?;

        listing.auction_end = Some(now);
        listing.last_bid_at = Some(now);
        listing.sold = true;
        self.store.update_listing(&listing).await?;

        info!(%listing_id, %purchase_id, price, "listing bought now");

        let events = [
            AuctionEvent::BidPlaced {
                listing_id,
                seller: listing.seller,
                bidder: buyer,
                amount: price,
                auto: false,
            },
            AuctionEvent::ListingSold {
                listing_id,
                purchase_id,
                seller: listing.seller,
                buyer,
                price,
            },
        ];

        drop(_guard);
        for event in events {
            self.publish(event);
        }

        Ok(BuyNowOutcome { purchase_id, price })
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Convert a closing condition into exactly one purchase.
    ///
    /// Idempotent: once a purchase exists, later calls observe it and
    /// report [`FinalizeOutcome::AlreadyFinalized`] without side effects,
    /// which makes at-least-once invocation from schedulers safe.
    #[instrument(skip(self), fields(%listing_id))]
    pub async fn finalize(&self, listing_id: ListingId) -> Result<FinalizeOutcome> {
        let _guard = self.lock_listing(listing_id).await?;
        let now = Utc::now();

        let mut listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if let Some(existing) = self.store.purchase_for_listing(listing_id).await? {
            return Ok(FinalizeOutcome::AlreadyFinalized(existing.id));
        }
        if !listing.is_ended(now) {
            return Ok(FinalizeOutcome::NotDue);
        }

        let winning = match self.store.highest_bid(listing_id).await? {
            Some(bid) => bid,
            None => {
                debug!(%listing_id, "deadline passed with no bids; closed unsold");
                return Ok(FinalizeOutcome::ClosedUnsold);
            }
        };

        let purchase = Purchase {
            id: PurchaseId::new(),
            listing_id,
            buyer: winning.bidder,
            price: winning.amount,
            created_at: now,
        };
        let purchase_id = purchase.id;
        self.store.insert_purchase(purchase).await?;
        listing.sold = true;
        self.store.update_listing(&listing).await?;

        info!(%listing_id, %purchase_id, price = winning.amount, "auction finalized");

        let event = AuctionEvent::ListingSold {
            listing_id,
            purchase_id,
            seller: listing.seller,
            buyer: winning.bidder,
            price: winning.amount,
        };

        drop(_guard);
        self.publish(event);

        Ok(FinalizeOutcome::Finalized(purchase_id))
    }

    /// One pass over every listing whose deadline has passed unsold.
    /// Best-effort: a failing listing is logged and skipped.
    #[instrument(skip(self))]
    pub async fn sweep_expired_auctions(&self) -> Result<SweepReport> {
        let due = self.store.listings_due_for_finalize(Utc::now()).await?;
        let mut report = SweepReport::default();
        for listing_id in due {
            match self.finalize(listing_id).await {
                Ok(FinalizeOutcome::Finalized(_)) => report.finalized += 1,
                Ok(FinalizeOutcome::ClosedUnsold) => report.closed_unsold += 1,
                Ok(_) => {}
                Err(error) => {
                    warn!(%listing_id, %error, "failed to finalize expired auction");
                }
            }
        }
        Ok(report)
    }

    /// Spawn a Tokio task that periodically finalizes expired auctions.
    pub fn spawn_sweep_loop(self, interval: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_expired_auctions().await {
                    Ok(report) if report.finalized > 0 || report.closed_unsold > 0 => {
                        info!(
                            finalized = report.finalized,
                            closed_unsold = report.closed_unsold,
                            "sweep pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "sweep pass failed"),
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Acquire the listing's critical section within the configured bound.
    async fn lock_listing(&self, id: ListingId) -> Result<OwnedMutexGuard<()>> {
        let mutex = {
            let mut table = self.locks.lock();
            Arc::clone(table.entry(id).or_default())
        };
        timeout(self.config.lock_wait(), mutex.lock_owned())
            .await
            .map_err(|_| EngineError::ConcurrencyTimeout)
    }

    /// Append the contest's automatic bids and fold each into its proxy's
    /// standing amount.
    async fn apply_generated_bids(
        &self,
        listing: &Listing,
        generated: &[crate::escalation::GeneratedBid],
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        for bid in generated {
            self.store
                .insert_bid(Bid {
                    id: BidId::new(),
                    listing_id: listing.id,
                    bidder: bid.bidder,
                    amount: bid.amount,
                    created_at: now,
                })
                .await?;
            if let Some(mut proxy) = self.store.proxy_for(listing.id, bid.bidder).await? {
                proxy.current_bid = bid.amount;
                proxy.updated_at = now;
                self.store.upsert_proxy(proxy).await?;
            }
        }
        Ok(())
    }

    /// Anti-snipe rule: a bid landing inside the extension window pushes the
    /// deadline to `now + window`. Forward only, once per accepted admission.
    fn apply_extension(&self, listing: &mut Listing, now: chrono::DateTime<Utc>) -> bool {
        match listing.auction_end {
            Some(end) if end - now <= self.config.extension_window() => {
                listing.auction_end = Some(now + self.config.extension_window());
                true
            }
            _ => false,
        }
    }

    /// Fire-and-forget event publication. `send` only fails when nobody is
    /// subscribed, which is a valid deployment (e.g. tests).
    fn publish(&self, event: AuctionEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn engine() -> AuctionEngine<MemoryStore> {
        AuctionEngine::new(MemoryStore::new(), EngineConfig::default())
    }

    #[tokio::test]
    async fn create_listing_validates_prices() {
        let engine = engine();
        let seller = UserId::new();

        let err = engine
            .create_listing(CreateListing {
                seller,
                floor_price: 0,
                buy_now_price: None,
                auction_duration: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidListing(_)));

        let err = engine
            .create_listing(CreateListing {
                seller,
                floor_price: 100,
                buy_now_price: Some(50),
                auction_duration: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidListing(_)));
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let engine = engine();
        let err = engine
            .place_bid(ListingId::new(), UserId::new(), 100)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotFound);
    }

    #[tokio::test]
    async fn lock_contention_times_out() {
        let mut config = EngineConfig::default();
        config.lock_wait_ms = 50;
        let engine = AuctionEngine::new(MemoryStore::new(), config);

        let listing_id = engine
            .create_listing(CreateListing {
                seller: UserId::new(),
                floor_price: 100,
                buy_now_price: None,
                auction_duration: Some(chrono::Duration::hours(1)),
            })
            .await
            .unwrap();

        // Hold the critical section directly, then watch a bid bounce.
        let _held = engine.lock_listing(listing_id).await.unwrap();
        let err = engine
            .place_bid(listing_id, UserId::new(), 100)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::ConcurrencyTimeout);
    }
}
