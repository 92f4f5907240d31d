// nicehash_exporter - Prometheus metrics exporter for NiceHash mining rigs
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::{ClientError, FleetSource};
use crate::metrics::{ExporterMetrics, FleetMetrics};
use crate::report::CycleReport;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Level};

const BATCH_RIGS: &str = "mining_rigs";
const BATCH_WALLET: &str = "wallet";
const BATCH_RATES: &str = "exchange_rates";

/// Periodically fetches rigs, wallet, and exchange rates and applies them to metrics.
///
/// At most one refresh runs at a time. A refresh requested while another is still
/// in progress is dropped rather than queued.
#[derive(Debug)]
pub struct Refresher<S> {
    source: S,
    fleet: FleetMetrics,
    exporter: ExporterMetrics,
    timeout: Duration,
    in_flight: AtomicBool,
}

impl<S> Refresher<S>
where
    S: FleetSource + 'static,
{
    pub fn new(source: S, fleet: FleetMetrics, exporter: ExporterMetrics, timeout: Duration) -> Self {
        Refresher {
            source,
            fleet,
            exporter,
            timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Refresh immediately and then every `period` until the process exits.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let refresher = Arc::clone(&self);
            tokio::spawn(
                async move {
                    refresher.refresh().await;
                }
                .instrument(tracing::span!(Level::DEBUG, "nicehash_refresh")),
            );
        }
    }

    /// Fetch all three batches and apply the ones that succeeded to metrics.
    ///
    /// Returns `None` without doing anything if another refresh is in progress.
    pub async fn refresh(&self) -> Option<CycleReport> {
        let _guard = match InFlight::acquire(&self.in_flight) {
            Some(g) => g,
            None => {
                tracing::warn!(message = "previous refresh still in progress, skipping");
                return None;
            }
        };

        let (rigs, wallet, rates) = tokio::join!(
            self.fetch(BATCH_RIGS, self.source.mining_rigs()),
            self.fetch(BATCH_WALLET, self.source.wallet()),
            self.fetch(BATCH_RATES, self.source.exchange_rates()),
        );

        let report = CycleReport {
            mining_rigs: rigs.map(|r| self.fleet.mining_rigs(&r)),
            wallet: wallet.map(|w| self.fleet.wallet(&w)),
            exchange_rates: rates.map(|r| self.fleet.exchange_rates(&r)),
        };

        report.log();
        self.exporter.cycle_complete(&report);
        Some(report)
    }

    async fn fetch<T, F>(&self, batch: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let res = match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        };

        match res {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(message = "failed to fetch batch", batch = batch, error = %e);
                self.exporter.fetch_failed(batch);
                None
            }
        }
    }
}

/// Marks a refresh as running until dropped.
struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { flag })
    }
}

impl<'a> Drop for InFlight<'a> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
