//! Pipeline orchestrator: ties scraper → metrics → storage together.
//!
//! One `run()` handles exactly one (period, segment):
//!   1. Fetch the ranking page (fatal on failure, nothing is written)
//!   2. Extract rows leniently; zero rows returns 0 without touching the store
//!   3. Read the prior month of the same segment for rank movement
//!   4. Compute batch metrics and swap the partition in one transaction
//!
//! Re-running the same (period, segment) replaces the stored batch wholesale.

use crate::error::ScrapeError;
use crate::metrics::{self, Batch};
use crate::models::{Period, ScrapeRun, Segment};
use crate::scraper::{parsers::extract_rows, RankingSource};
use crate::storage::SalesStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

// ── In-flight guard ───────────────────────────────────────────────────────────

/// Keys currently being scraped. A second run for a live key is refused.
#[derive(Default, Clone)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<(Period, Segment)>>>,
}

pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<(Period, Segment)>>>,
    key: (Period, Segment),
}

impl InFlight {
    pub fn try_acquire(&self, period: Period, segment: Segment) -> Option<InFlightGuard> {
        let mut keys = self.keys.lock().unwrap_or_else(|p| p.into_inner());
        keys.insert((period, segment)).then(|| InFlightGuard {
            keys: Arc::clone(&self.keys),
            key: (period, segment),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    source: Arc<dyn RankingSource>,
    store: Arc<dyn SalesStore>,
    in_flight: InFlight,
}

impl Pipeline {
    pub fn new(source: Arc<dyn RankingSource>, store: Arc<dyn SalesStore>) -> Self {
        Self {
            source,
            store,
            in_flight: InFlight::default(),
        }
    }

    /// Scrape, score and persist one (period, segment). Returns rows written.
    pub async fn run(&self, period: Period, segment: Segment) -> Result<usize, ScrapeError> {
        let Some(_guard) = self.in_flight.try_acquire(period, segment) else {
            warn!("{} {}: scrape already in flight, refusing", period, segment);
            return Err(ScrapeError::AlreadyRunning { period, segment });
        };

        let started_at = Utc::now().naive_utc();
        let outcome = self.run_unguarded(period, segment).await;

        let run = ScrapeRun {
            period,
            segment,
            started_at,
            finished_at: Utc::now().naive_utc(),
            records_written: *outcome.as_ref().unwrap_or(&0),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        if let Err(e) = self.store.record_run(&run) {
            warn!("{} {}: could not record scrape run: {}", period, segment, e);
        }

        outcome
    }

    async fn run_unguarded(&self, period: Period, segment: Segment) -> Result<usize, ScrapeError> {
        let html = self.source.fetch(period, segment).await?;

        let rows = extract_rows(&html, self.source.base_url());
        if rows.is_empty() {
            warn!("{} {}: no ranking rows recognised, nothing to update", period, segment);
            return Ok(0);
        }
        info!("{} {}: {} rows extracted", period, segment, rows.len());

        let prior = self.store.read_prior_period(period, segment)?;
        if prior.is_empty() {
            info!("{} {}: no {} data, rank deltas default to 0", period, segment, period.previous());
        }

        let batch = Batch {
            period,
            segment,
            scraped_at: Utc::now().naive_utc(),
        };
        let records = metrics::compute(&rows, &prior, batch);
        let written = self.store.replace_period(&records)?;

        info!("{} {}: {} records written", period, segment, written);
        Ok(written)
    }

    /// Runs each segment in turn and sums the counts. Stops at the first failure.
    pub async fn run_segments(&self, period: Period, segments: &[Segment]) -> Result<usize, ScrapeError> {
        let mut total = 0usize;
        for &segment in segments {
            match self.run(period, segment).await {
                Ok(n) => total += n,
                Err(e) => {
                    error!("{} {}: {}", period, segment, e);
                    return Err(e);
                }
            }
        }
        Ok(total)
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub period: Period,
    pub processed: usize,
}
