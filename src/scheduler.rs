//! Refresh scheduler background task
//!
//! Runs one scrape cycle per interval and installs each successful Reading
//! in the snapshot cache. Failed cycles leave the cache untouched.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::scrape::Scraper;
use crate::snapshot::SnapshotCache;

/// Configuration for the refresh scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between scrape cycles (default: 300)
    pub refresh_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { refresh_secs: 300 }
    }
}

pub struct RefreshScheduler {
    scraper: Scraper,
    cache: SnapshotCache,
    config: SchedulerConfig,
}

impl RefreshScheduler {
    pub fn new(scraper: Scraper, cache: SnapshotCache, config: SchedulerConfig) -> Self {
        Self {
            scraper,
            cache,
            config,
        }
    }

    /// Run the scheduler loop
    ///
    /// The first cycle fires immediately. A cycle that outlasts the interval
    /// delays the next tick instead of overlapping it.
    pub async fn run(&self) {
        tracing::info!(
            "Refresh scheduler started (interval: {}s)",
            self.config.refresh_secs
        );

        let mut interval = interval(Duration::from_secs(self.config.refresh_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.refresh_once().await;
        }
    }

    /// Run a single cycle; returns whether the cache was replaced.
    pub async fn refresh_once(&self) -> bool {
        let previous = self.cache.current();

        let reading = match self.scraper.run_cycle(&previous.reading).await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(
                    kind = e.kind(),
                    error = %e,
                    "scrape cycle failed; keeping previous snapshot"
                );
                return false;
            }
        };

        match self.cache.replace(reading) {
            Ok(snapshot) => {
                tracing::info!(
                    instant_power = %snapshot.reading.instant_power,
                    life_meter = %snapshot.reading.life_meter,
                    last_update = snapshot.reading.last_update,
                    "snapshot refreshed"
                );
                true
            }
            Err(e) => {
                tracing::error!("Failed to encode reading: {}", e);
                false
            }
        }
    }
}
