//! Configuration for the auction engine.
//!
//! Runtime behaviour is tuned through a hierarchical, multi-source
//! configuration backed by the `config` crate.
//!
//! Priority (lowest → highest):
//! 1. Compile-time defaults (`impl Default`).
//! 2. An optional TOML/YAML/JSON file passed at start-up (or
//!    `auction.{toml,yaml,json}` probed in the working directory).
//! 3. Environment variables with `AUCTION__` prefix:
//!
//!        AUCTION__BID_INCREMENT=5
//!        AUCTION__EXTENSION_WINDOW_SECS=180
//!
//! The deserialized [`EngineConfig`] is validated before use and then
//! passed to [`AuctionEngine::new`](crate::engine::AuctionEngine::new) by
//! value; the engine never re-reads it.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::types::Amount;

/// Well-known file stems probed when no explicit path is given.
const CONFIG_FILE_STEMS: &[&str] = &["auction.toml", "auction.yaml", "auction.json"];

/// Tunables of the bid-admission engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed minimum step between the current highest bid and the next
    /// admissible one, in the smallest currency unit. Never zero.
    pub bid_increment: Amount,
    /// Anti-snipe window: a bid arriving within this many seconds of
    /// `auction_end` pushes the end to `now + extension_window_secs`.
    pub extension_window_secs: u64,
    /// Upper bound on the wait for a listing's critical section before
    /// the operation is rejected with `ConcurrencyTimeout`.
    pub lock_wait_ms: u64,
    /// Ring-buffer capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Period of the background sweep loop.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bid_increment: 1,
            extension_window_secs: 180,
            lock_wait_ms: 3_000,
            event_capacity: 1_024,
            sweep_interval_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the
    /// environment, then validate it.
    pub fn load(config_path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("bid_increment", defaults.bid_increment)?
            .set_default("extension_window_secs", defaults.extension_window_secs)?
            .set_default("lock_wait_ms", defaults.lock_wait_ms)?
            .set_default("event_capacity", defaults.event_capacity as u64)?
            .set_default("sweep_interval_secs", defaults.sweep_interval_secs)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.as_ref()).required(true));
        } else {
            for stem in CONFIG_FILE_STEMS {
                if Path::new(stem).exists() {
                    builder = builder.add_source(File::with_name(stem).required(false));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AUCTION")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate().map_err(ConfigError::Message)?;
        Ok(cfg)
    }

    /// Sanity checks that cannot be expressed through serde alone.
    pub fn validate(&self) -> Result<(), String> {
        if self.bid_increment == 0 {
            return Err("bid_increment must be non-zero".into());
        }
        if self.extension_window_secs == 0 {
            return Err("extension_window_secs must be non-zero".into());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be non-zero".into());
        }
        Ok(())
    }

    /// Anti-snipe window as a chrono duration.
    pub fn extension_window(&self) -> Duration {
        Duration::seconds(self.extension_window_secs as i64)
    }

    /// Critical-section wait bound as a std duration (for `tokio::time`).
    pub fn lock_wait(&self) -> StdDuration {
        StdDuration::from_millis(self.lock_wait_ms)
    }

    /// Sweep period as a std duration (for `tokio::time::interval`).
    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bid_increment, 1);
        assert_eq!(cfg.extension_window(), Duration::seconds(180));
    }

    #[test]
    fn zero_increment_is_rejected() {
        let cfg = EngineConfig {
            bid_increment: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
