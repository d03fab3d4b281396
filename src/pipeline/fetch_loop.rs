// src/pipeline/fetch_loop.rs

//! Timed producer of fetch results.
//!
//! Every cycle walks the regions that currently have subscribers, fetches
//! and parses each page in turn and hands the result to the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Region, Warning};
use crate::pipeline::dispatcher::DispatcherHandle;
use crate::pipeline::registry::SubscriberRegistry;
use crate::services::{PageSource, WarningParser};

/// Summary of one fetch cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Regions with subscribers at cycle start
    pub regions: usize,
    /// Results handed to the dispatcher
    pub events: usize,
    pub failures: usize,
    /// Total warnings across all results
    pub warnings: usize,
    pub elapsed: Duration,
}

pub struct FetchLoop {
    registry: Arc<SubscriberRegistry>,
    source: Arc<dyn PageSource>,
    parser: WarningParser,
    dispatcher: DispatcherHandle,
    interval: Duration,
}

impl FetchLoop {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        source: Arc<dyn PageSource>,
        parser: WarningParser,
        dispatcher: DispatcherHandle,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            parser,
            dispatcher,
            interval,
        }
    }

    /// Fetch and parse a single region.
    pub async fn fetch_region(&self, region: &Region) -> Result<Vec<Warning>> {
        let html = self.source.fetch_page(region).await?;
        self.parser.parse(&html)
    }

    /// Run one cycle over all active regions.
    ///
    /// Returns `None` once the dispatcher no longer accepts results.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let regions = self.registry.active_regions();

        let mut events = 0;
        let mut failures = 0;
        let mut warnings = 0;

        for region in &regions {
            let found = match self.fetch_region(region).await {
                Ok(found) => found,
                Err(e) if e.is_retryable() => {
                    log::warn!("Skipping {} this cycle: {}", region, e);
                    failures += 1;
                    continue;
                }
                Err(e) => {
                    log::error!("Skipping {} this cycle: {}", region, e);
                    failures += 1;
                    continue;
                }
            };

            log::debug!("{}: {} warnings", region, found.len());
            warnings += found.len();
            if !self.dispatcher.on_fetch_result(region.clone(), found) {
                log::info!("Dispatcher closed, stopping fetch loop");
                return None;
            }
            events += 1;
        }

        let report = CycleReport {
            started_at,
            regions: regions.len(),
            events,
            failures,
            warnings,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Cycle started {}: {} regions, {} results, {} warnings, {} failures in {:.2?}",
            report.started_at.format("%H:%M:%S"),
            report.regions,
            report.events,
            report.warnings,
            report.failures,
            report.elapsed
        );
        Some(report)
    }

    /// Run cycles forever, sleeping `interval` after each one.
    pub async fn run(self) {
        log::info!("Fetch loop started, interval {:?}", self.interval);
        while self.run_cycle().await.is_some() {
            tokio::time::sleep(self.interval).await;
        }
    }
}
