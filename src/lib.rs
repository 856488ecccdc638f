//! Marketplace bid-admission and auction-closing engine.
//!
//! This crate is the core of a marketplace auction system: it decides
//! whether an incoming bid is valid, escalates competing proxy (maximum)
//! bids against each other, extends an auction's deadline against
//! last-second sniping, and guarantees that a listing is sold to exactly
//! one buyer exactly once — whether by competitive bidding or immediate
//! buy-now purchase.
//!
//! Storage, notification delivery and invoicing are external collaborators
//! behind seams ([`store::ListingStore`], [`events::NotificationDispatcher`],
//! [`events::InvoiceTrigger`]); the engine owns only the race-prone bidding
//! state, serialized per listing.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use auction_service::{
//!     config::EngineConfig,
//!     engine::AuctionEngine,
//!     events::{spawn_dispatch_loop, LoggingCollaborator},
//!     store::MemoryStore,
//!     types::CreateListing,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), auction_service::error::EngineError> {
//! let engine = AuctionEngine::new(MemoryStore::new(), EngineConfig::default());
//!
//! let collaborator = Arc::new(LoggingCollaborator);
//! spawn_dispatch_loop(engine.subscribe(), collaborator.clone(), collaborator);
//! engine.clone().spawn_sweep_loop(engine.config().sweep_interval());
//!
//! let seller = auction_service::types::UserId::new();
//! let listing_id = engine
//!     .create_listing(CreateListing {
//!         seller,
//!         floor_price: 100,
//!         buy_now_price: Some(1_000),
//!         auction_duration: Some(chrono::Duration::hours(24)),
//!     })
//!     .await?;
//!
//! let bidder = auction_service::types::UserId::new();
//! let outcome = engine.place_bid(listing_id, bidder, 100).await?;
//! assert_eq!(outcome.accepted_amount, 100);
//! # Ok(()) }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod events;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::AuctionEngine;
pub use error::{EngineError, Result};
pub use events::AuctionEvent;
pub use store::{ListingStore, MemoryStore};
pub use types::{
    Bid, BidOutcome, BuyNowOutcome, CreateListing, FinalizeOutcome, Listing, ListingId,
    ProxyBid, ProxyOutcome, Purchase, PurchaseId, SweepReport, UserId,
};
