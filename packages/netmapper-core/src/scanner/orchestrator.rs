//! Scan sessions: range enumeration, bounded dispatch and result delivery

use super::{HostRecord, ScanError, host::HostScanner, range::NetworkRange};
use crate::config::ScanConfig;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Consumer of scan results.
///
/// Calls are made from a single delivery loop, one at a time, so
/// `completed` grows by exactly one per call.
pub trait ResultSink: Send + Sync {
    /// Discard everything delivered by a previous session
    fn on_reset(&self);

    /// One finished address, in completion order
    fn on_host_scanned(&self, record: HostRecord, completed: u32, total: u32);
}

/// Outcome of one session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub range: NetworkRange,
    pub total: u32,
    pub completed: u32,
    pub alive: u32,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Runs scan sessions over a range with a fixed number of slots.
///
/// Only one session runs at a time; a second `run` while one is active is
/// rejected with [`ScanError::ScanInProgress`].
pub struct ScanOrchestrator {
    scanner: Arc<HostScanner>,
    concurrency_limit: usize,
    max_addresses: u32,
    active: Mutex<Option<CancellationToken>>,
}

/// Clears the active session when `run` returns or is dropped
struct ActiveSession<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanOrchestrator {
    pub fn new(scanner: HostScanner, concurrency_limit: usize, max_addresses: u32) -> Self {
        Self {
            scanner: Arc::new(scanner),
            concurrency_limit: concurrency_limit.max(1),
            max_addresses,
            active: Mutex::new(None),
        }
    }

    /// Orchestrator using the system probes
    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self::new(
            HostScanner::from_config(config),
            config.concurrency_limit,
            config.max_addresses,
        ))
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Stop dispatching new addresses in the active session. In-flight
    /// hosts finish and are still delivered. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(token) => {
                tracing::info!("Scan cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of addresses a session over `range` will scan
    pub fn total_for(&self, range: &NetworkRange) -> u32 {
        range.address_count().min(u64::from(self.max_addresses)) as u32
    }

    /// Scan every usable address of `range` (up to the address cap) and
    /// deliver each record to `sink` as it completes.
    pub async fn run(
        &self,
        range: &NetworkRange,
        sink: &dyn ResultSink,
    ) -> Result<ScanSummary, ScanError> {
        let cancel = CancellationToken::new();
        let _session = {
            let mut active = lock(&self.active);
            if active.is_some() {
                return Err(ScanError::ScanInProgress);
            }
            *active = Some(cancel.clone());
            ActiveSession { slot: &self.active }
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let total = self.total_for(range);

        sink.on_reset();

        if range.address_count() > u64::from(total) {
            tracing::warn!(
                "Range {} has {} addresses; scanning the first {}",
                range,
                range.address_count(),
                total
            );
        }
        tracing::info!(
            "Scanning {} addresses in {} with {} slots",
            total,
            range,
            self.concurrency_limit
        );

        let (tx, mut rx) = mpsc::channel::<HostRecord>(self.concurrency_limit);

        let dispatch = dispatch_units(
            self.scanner.clone(),
            range.addresses().take(total as usize),
            self.concurrency_limit,
            cancel.clone(),
            tx,
        );

        let deliver = async {
            let mut completed = 0u32;
            let mut alive = 0u32;
            while let Some(record) = rx.recv().await {
                completed += 1;
                if record.is_alive() {
                    alive += 1;
                }
                sink.on_host_scanned(record, completed, total);
            }
            (completed, alive)
        };

        let (dispatched, (completed, alive)) = tokio::join!(dispatch, deliver);
        debug_assert_eq!(dispatched, completed);

        let summary = ScanSummary {
            range: *range,
            total,
            completed,
            alive,
            cancelled: cancel.is_cancelled(),
            started_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        tracing::info!(
            "Scan {}: {}/{} addresses, {} alive in {:.1}s",
            if summary.cancelled { "cancelled" } else { "complete" },
            summary.completed,
            summary.total,
            summary.alive,
            summary.elapsed_secs
        );

        Ok(summary)
    }
}

/// Walk `addresses`, taking a slot before each one. Returns how many units
/// were started; all of them have finished when this returns.
async fn dispatch_units<I>(
    scanner: Arc<HostScanner>,
    addresses: I,
    limit: usize,
    cancel: CancellationToken,
    tx: mpsc::Sender<HostRecord>,
) -> u32
where
    I: Iterator<Item = Ipv4Addr> + Send,
{
    let slots = Arc::new(Semaphore::new(limit));
    let mut units = JoinSet::new();
    let mut dispatched = 0u32;

    for address in addresses {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Dispatch stopped after {} addresses", dispatched);
                break;
            }
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let scanner = scanner.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        units.spawn(async move {
            let record = scan_contained(&scanner, address, &cancel).await;
            // The slot is held until the record is queued for delivery
            let _ = tx.send(record).await;
            drop(permit);
        });
        dispatched += 1;

        while let Some(result) = units.try_join_next() {
            log_unit_failure(result);
        }
    }

    drop(tx);
    while let Some(result) = units.join_next().await {
        log_unit_failure(result);
    }

    dispatched
}

/// A panicking probe must not lose the address: it is reported dead.
async fn scan_contained(
    scanner: &HostScanner,
    address: Ipv4Addr,
    cancel: &CancellationToken,
) -> HostRecord {
    match AssertUnwindSafe(scanner.scan(address, cancel))
        .catch_unwind()
        .await
    {
        Ok(record) => record,
        Err(_) => {
            tracing::warn!("Scan of {} panicked; reporting it as dead", address);
            HostRecord::dead(address)
        }
    }
}

fn log_unit_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::warn!("Scan unit failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ProbeSet, ProbeSettings};
    use std::time::Duration;

    struct NullSink;

    impl ResultSink for NullSink {
        fn on_reset(&self) {}
        fn on_host_scanned(&self, _record: HostRecord, _completed: u32, _total: u32) {}
    }

    fn orchestrator(limit: usize, max_addresses: u32) -> ScanOrchestrator {
        let scanner = HostScanner::new(
            ProbeSet::system(Duration::from_millis(10)),
            ProbeSettings {
                liveness_timeout: Duration::from_millis(10),
                port_timeout: Duration::from_millis(10),
                ports: Vec::new(),
            },
        );
        ScanOrchestrator::new(scanner, limit, max_addresses)
    }

    #[test]
    fn test_limit_is_at_least_one() {
        assert_eq!(orchestrator(0, 10).concurrency_limit(), 1);
    }

    #[test]
    fn test_total_is_capped() {
        let range = NetworkRange::from_cidr("10.0.0.0/16").unwrap();
        assert_eq!(orchestrator(4, 1000).total_for(&range), 1000);
        assert_eq!(orchestrator(4, 65536).total_for(&range), 65534);
    }

    #[test]
    fn test_cancel_when_idle() {
        let orchestrator = orchestrator(4, 10);
        assert!(!orchestrator.is_scanning());
        assert!(!orchestrator.cancel());
    }

    #[test]
    fn test_from_config_validates() {
        let config = ScanConfig {
            concurrency_limit: 0,
            ..ScanConfig::default()
        };
        assert!(matches!(
            ScanOrchestrator::from_config(&config),
            Err(ScanError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_session_slot_is_released() {
        let orchestrator = orchestrator(4, 10);
        let range = NetworkRange::from_range_str("127.0.0.1-127.0.0.1").unwrap();
        let summary = orchestrator.run(&range, &NullSink).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.completed, 1);
        assert!(!orchestrator.is_scanning());
    }
}
