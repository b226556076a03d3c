//! Batch Executor - One Pass of the Random Walk
//!
//! Splits the symbol snapshot into consecutive chunks of at most
//! `batch_size`, fans out the writes of one chunk concurrently, waits for
//! all of them, then consults the backpressure gate before moving on.
//! Outstanding writes are therefore bounded by the chunk size no matter
//! how large the symbol universe grows.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, instrument, warn};

use crate::domain::exclusion::ExclusionSet;
use crate::domain::feed::TickReport;
use crate::domain::price::{PriceRecord, RandomSource, change_pct, mutate};
use crate::ports::price_store::StoreConnection;

/// Moves larger than this (in percent) are logged at debug level.
const NOTABLE_MOVE_PCT: f64 = 5.0;

/// Parameters fixed for the duration of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickPlan {
    pub variation_fraction: f64,
    pub batch_size: usize,
}

/// Consulted after every chunk; may pause before the next one.
#[async_trait]
pub trait Backpressure: Send + Sync {
    async fn after_chunk(&self);
}

/// Gate that never pauses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackpressure;

#[async_trait]
impl Backpressure for NoBackpressure {
    async fn after_chunk(&self) {}
}

/// Applies the mutation engine to a price snapshot.
pub struct BatchExecutor {
    rng: Arc<dyn RandomSource>,
}

impl BatchExecutor {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self { rng }
    }

    /// Run one tick over `records`.
    ///
    /// Per-symbol write failures are logged and counted; they never abort
    /// the chunk or the tick. An empty snapshot is a trivial 0/0 success.
    #[instrument(skip_all, fields(symbols = records.len(), batch_size = plan.batch_size))]
    pub async fn run_one_tick(
        &self,
        connection: &dyn StoreConnection,
        records: &[PriceRecord],
        exclusions: &ExclusionSet,
        plan: &TickPlan,
        gate: &dyn Backpressure,
    ) -> TickReport {
        let mut report = TickReport {
            total: records.len(),
            ..TickReport::default()
        };

        for chunk in records.chunks(plan.batch_size.max(1)) {
            report.chunks += 1;

            let mut writes = Vec::with_capacity(chunk.len());
            for record in chunk {
                if exclusions.contains(&record.symbol) {
                    report.excluded += 1;
                    continue;
                }
                let next = mutate(record.price, plan.variation_fraction, self.rng.as_ref());
                writes.push(async move {
                    let result = connection.set_price(&record.symbol, next).await;
                    (record, next, result)
                });
            }

            report.attempted += writes.len();

            for (record, next, result) in join_all(writes).await {
                match result {
                    Ok(()) => {
                        report.succeeded += 1;
                        let pct = change_pct(record.price, next);
                        if pct.abs() > NOTABLE_MOVE_PCT {
                            debug!(
                                symbol = %record.symbol,
                                from = record.price,
                                to = next,
                                change_pct = pct,
                                "Notable price move"
                            );
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            symbol = %record.symbol,
                            price = next,
                            error = %e,
                            "Price write failed, skipping symbol"
                        );
                    }
                }
            }

            gate.after_chunk().await;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::price::FixedRandom;

    /// Records every write; fails for configured symbols.
    #[derive(Default)]
    struct RecordingConnection {
        writes: Mutex<Vec<(String, u64)>>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl StoreConnection for RecordingConnection {
        async fn list_all_symbol_prices(&self) -> anyhow::Result<Vec<PriceRecord>> {
            Ok(Vec::new())
        }

        async fn set_price(&self, symbol: &str, price: u64) -> anyhow::Result<()> {
            if self.failing.contains(symbol) {
                anyhow::bail!("symbol {symbol} vanished");
            }
            self.writes.lock().unwrap().push((symbol.to_string(), price));
            Ok(())
        }

        async fn flush(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    #[derive(Default)]
    struct CountingGate(AtomicUsize);

    #[async_trait]
    impl Backpressure for CountingGate {
        async fn after_chunk(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn records(n: usize) -> Vec<PriceRecord> {
        (0..n)
            .map(|i| PriceRecord::new(format!("S{i}"), 1000 + i as u64))
            .collect()
    }

    fn executor(u: f64) -> BatchExecutor {
        BatchExecutor::new(Arc::new(FixedRandom::new(u)))
    }

    #[tokio::test]
    async fn test_five_symbols_batch_two_makes_three_chunks() {
        let conn = RecordingConnection::default();
        let gate = CountingGate::default();
        let plan = TickPlan { variation_fraction: 0.05, batch_size: 2 };

        let report = executor(0.5)
            .run_one_tick(&conn, &records(5), &ExclusionSet::new(), &plan, &gate)
            .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(gate.0.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 5);

        let writes = conn.writes.lock().unwrap();
        let per_symbol: BTreeMap<_, usize> =
            writes.iter().fold(BTreeMap::new(), |mut acc, (s, _)| {
                *acc.entry(s.clone()).or_default() += 1;
                acc
            });
        assert_eq!(per_symbol.len(), 5);
        assert!(per_symbol.values().all(|&n| n == 1));
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_trivial_success() {
        let conn = RecordingConnection::default();
        let plan = TickPlan { variation_fraction: 0.05, batch_size: 500 };

        let report = executor(0.5)
            .run_one_tick(&conn, &[], &ExclusionSet::new(), &plan, &NoBackpressure)
            .await;

        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn test_excluded_symbols_are_not_written() {
        let conn = RecordingConnection::default();
        let mut exclusions = ExclusionSet::new();
        exclusions.exclude("S1");
        let plan = TickPlan { variation_fraction: 0.05, batch_size: 10 };

        let report = executor(0.0)
            .run_one_tick(&conn, &records(3), &exclusions, &plan, &NoBackpressure)
            .await;

        assert_eq!(report.excluded, 1);
        assert_eq!(report.attempted, 2);
        let writes = conn.writes.lock().unwrap();
        assert!(writes.iter().all(|(s, _)| s != "S1"));
        // u = 0 -> multiplier 0.95
        assert!(writes.contains(&("S0".to_string(), 950)));
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_fatal() {
        let conn = RecordingConnection {
            failing: HashSet::from(["S2".to_string()]),
            ..RecordingConnection::default()
        };
        let plan = TickPlan { variation_fraction: 0.05, batch_size: 2 };

        let report = executor(0.5)
            .run_one_tick(&conn, &records(5), &ExclusionSet::new(), &plan, &NoBackpressure)
            .await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(conn.writes.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_treated_as_one() {
        let conn = RecordingConnection::default();
        let plan = TickPlan { variation_fraction: 0.05, batch_size: 0 };

        let report = executor(0.5)
            .run_one_tick(&conn, &records(3), &ExclusionSet::new(), &plan, &NoBackpressure)
            .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(report.succeeded, 3);
    }
}
