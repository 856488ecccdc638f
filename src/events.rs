//! Outbound events and fire-and-forget collaborator dispatch.
//!
//! The engine publishes an [`AuctionEvent`] on a `tokio::sync::broadcast`
//! channel *after* a listing's critical section has committed. Downstream
//! collaborators — the notification dispatcher and the invoice trigger —
//! consume the stream asynchronously via [`spawn_dispatch_loop`]. Their
//! failures are logged and swallowed: by the time they run, the bid or sale
//! is already durable, and core correctness never blocks on notification
//! latency or failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{Amount, ListingId, PurchaseId, UserId};

/// Domain events published after a committed mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    ListingCreated {
        listing_id: ListingId,
        seller: UserId,
        floor_price: Amount,
    },
    /// A bid was admitted. `auto` marks proxy-generated bids.
    BidPlaced {
        listing_id: ListingId,
        seller: UserId,
        bidder: UserId,
        amount: Amount,
        auto: bool,
    },
    /// A previously leading bidder lost the top spot.
    Outbid {
        listing_id: ListingId,
        previous_leader: UserId,
        new_amount: Amount,
    },
    /// The anti-snipe rule pushed the deadline forward.
    AuctionExtended {
        listing_id: ListingId,
        new_end: DateTime<Utc>,
    },
    /// A proxy ceiling was created or raised.
    ProxyUpdated {
        listing_id: ListingId,
        bidder: UserId,
    },
    /// The listing was sold, by auction close or buy-now.
    ListingSold {
        listing_id: ListingId,
        purchase_id: PurchaseId,
        seller: UserId,
        buyer: UserId,
        price: Amount,
    },
}

/// Sends user-facing notifications ("you were outbid", "your item sold").
///
/// Implementations should return quickly and must tolerate at-least-once
/// delivery; errors are logged by the dispatch loop and never propagated
/// into the engine.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync + 'static {
    async fn notify_seller_of_bid(
        &self,
        seller: UserId,
        listing_id: ListingId,
        amount: Amount,
    ) -> Result<(), String>;

    async fn notify_outbid(
        &self,
        bidder: UserId,
        listing_id: ListingId,
        new_amount: Amount,
    ) -> Result<(), String>;

    async fn notify_sale(
        &self,
        seller: UserId,
        buyer: UserId,
        listing_id: ListingId,
        price: Amount,
    ) -> Result<(), String>;
}

/// Kicks off invoicing/payment capture for a completed sale.
///
/// Invoked once per sale from the dispatch loop; the downstream side is
/// assumed idempotent, so redelivery after a crash is harmless.
#[async_trait]
pub trait InvoiceTrigger: Send + Sync + 'static {
    async fn create_invoice(
        &self,
        listing_id: ListingId,
        purchase_id: PurchaseId,
        buyer: UserId,
        seller: UserId,
        price: Amount,
    ) -> Result<(), String>;
}

/// Dev/test collaborator that only logs. Useful until real email/payment
/// integrations are wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingCollaborator;

#[async_trait]
impl NotificationDispatcher for LoggingCollaborator {
    async fn notify_seller_of_bid(
        &self,
        seller: UserId,
        listing_id: ListingId,
        amount: Amount,
    ) -> Result<(), String> {
        debug!(%seller, %listing_id, amount, "notify: new bid on listing");
        Ok(())
    }

    async fn notify_outbid(
        &self,
        bidder: UserId,
        listing_id: ListingId,
        new_amount: Amount,
    ) -> Result<(), String> {
        debug!(%bidder, %listing_id, new_amount, "notify: outbid");
        Ok(())
    }

    async fn notify_sale(
        &self,
        seller: UserId,
        buyer: UserId,
        listing_id: ListingId,
        price: Amount,
    ) -> Result<(), String> {
        debug!(%seller, %buyer, %listing_id, price, "notify: listing sold");
        Ok(())
    }
}

#[async_trait]
impl InvoiceTrigger for LoggingCollaborator {
    async fn create_invoice(
        &self,
        listing_id: ListingId,
        purchase_id: PurchaseId,
        buyer: UserId,
        seller: UserId,
        price: Amount,
    ) -> Result<(), String> {
        debug!(%listing_id, %purchase_id, %buyer, %seller, price, "invoice: sale");
        Ok(())
    }
}

/// Spawn the background task that fans committed events out to the
/// collaborators. Collaborator failures are warned about, never retried
/// here and never surfaced to bidders. A lagged subscriber skips ahead.
///
/// The task runs until the engine (the channel sender) is dropped.
pub fn spawn_dispatch_loop<N, I>(
    mut events: broadcast::Receiver<AuctionEvent>,
    notifier: Arc<N>,
    invoicer: Arc<I>,
) -> JoinHandle<()>
where
    N: NotificationDispatcher,
    I: InvoiceTrigger,
{
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event dispatch lagged; skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                AuctionEvent::BidPlaced {
                    listing_id,
                    seller,
                    amount,
                    ..
                } => {
                    if let Err(reason) = notifier
                        .notify_seller_of_bid(seller, listing_id, amount)
                        .await
                    {
                        warn!(%listing_id, reason, "seller notification failed");
                    }
                }
                AuctionEvent::Outbid {
                    listing_id,
                    previous_leader,
                    new_amount,
                } => {
                    if let Err(reason) = notifier
                        .notify_outbid(previous_leader, listing_id, new_amount)
                        .await
                    {
                        warn!(%listing_id, reason, "outbid notification failed");
                    }
                }
                AuctionEvent::ListingSold {
                    listing_id,
                    purchase_id,
                    seller,
                    buyer,
                    price,
                } => {
                    if let Err(reason) = notifier
                        .notify_sale(seller, buyer, listing_id, price)
                        .await
                    {
                        warn!(%listing_id, reason, "sale notification failed");
                    }
                    if let Err(reason) = invoicer
                        .create_invoice(listing_id, purchase_id, buyer, seller, price)
                        .await
                    {
                        warn!(%listing_id, %purchase_id, reason, "invoice trigger failed");
                    }
                }
                AuctionEvent::ListingCreated { .. }
                | AuctionEvent::AuctionExtended { .. }
                | AuctionEvent::ProxyUpdated { .. } => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingCollaborator {
        invoices: AtomicU32,
        sale_notices: AtomicU32,
    }

    #[async_trait]
    impl NotificationDispatcher for CountingCollaborator {
        async fn notify_seller_of_bid(
            &self,
            _seller: UserId,
            _listing_id: ListingId,
            _amount: Amount,
        ) -> Result<(), String> {
            Ok(())
        }

        async fn notify_outbid(
            &self,
            _bidder: UserId,
            _listing_id: ListingId,
            _new_amount: Amount,
        ) -> Result<(), String> {
            Err("smtp down".into())
        }

        async fn notify_sale(
            &self,
            _seller: UserId,
            _buyer: UserId,
            _listing_id: ListingId,
            _price: Amount,
        ) -> Result<(), String> {
            self.sale_notices.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl InvoiceTrigger for CountingCollaborator {
        async fn create_invoice(
            &self,
            _listing_id: ListingId,
            _purchase_id: PurchaseId,
            _buyer: UserId,
            _seller: UserId,
            _price: Amount,
        ) -> Result<(), String> {
            self.invoices.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sale_event_reaches_notifier_and_invoicer() {
        let (tx, rx) = broadcast::channel(16);
        let collaborator = Arc::new(CountingCollaborator::default());

        let handle = spawn_dispatch_loop(rx, collaborator.clone(), collaborator.clone());

        tx.send(AuctionEvent::ListingSold {
            listing_id: ListingId::new(),
            purchase_id: PurchaseId::new(),
            seller: UserId::new(),
            buyer: UserId::new(),
            price: 1_000,
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(collaborator.sale_notices.load(Ordering::SeqCst), 1);
        assert_eq!(collaborator.invoices.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn collaborator_failure_is_swallowed() {
        let (tx, rx) = broadcast::channel(16);
        let collaborator = Arc::new(CountingCollaborator::default());

        let handle = spawn_dispatch_loop(rx, collaborator.clone(), collaborator.clone());

        // notify_outbid errors; the loop must keep running and process the
        // sale that follows.
        tx.send(AuctionEvent::Outbid {
            listing_id: ListingId::new(),
            previous_leader: UserId::new(),
            new_amount: 500,
        })
        .unwrap();
        tx.send(AuctionEvent::ListingSold {
            listing_id: ListingId::new(),
            purchase_id: PurchaseId::new(),
            seller: UserId::new(),
            buyer: UserId::new(),
            price: 2_000,
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(collaborator.invoices.load(Ordering::SeqCst), 1);
    }
}
