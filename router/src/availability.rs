//! TTL-cached backend health
//!
//! Each registered backend owns one slot holding its latest
//! [`AvailabilityRecord`]. Records are immutable and replaced wholesale by
//! swapping an `Arc`, so readers never see a half-updated record.
//!
//! # Cache policy
//!
//! ```text
//! is_available(b)
//!   ├─ record fresh (age <= ttl)          → cached value, no probe
//!   ├─ stale, refresh already in flight   → previous value (stale-but-available)
//!   ├─ missing, first probe in flight     → wait for that probe's record
//!   └─ stale or missing                   → probe (bounded by probe_timeout), swap, return
//! ```
//!
//! Each slot has one refresh lock, so a backend sees at most one probe in
//! flight at a time. Slots are independent: probing one backend never waits
//! on another.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::events::{RouterEvent, SharedEventBus};
use crate::registry::{BackendRegistry, ProbeReport, SharedBackend};
use crate::types::BackendId;

/// Default lifetime of a cached availability record
pub const DEFAULT_AVAILABILITY_TTL: Duration = Duration::from_secs(60);

/// Default upper bound on a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of the most recent probe of one backend
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityRecord {
    pub backend: BackendId,
    pub available: bool,
    pub latency_ms: u64,
    /// Monotonic probe time, used for TTL checks
    pub checked_at: Instant,
    /// Wall-clock probe time, for display
    pub checked_at_utc: DateTime<Utc>,
}

impl AvailabilityRecord {
    fn from_report(backend: BackendId, report: ProbeReport) -> Self {
        Self {
            backend,
            available: report.available,
            latency_ms: report.latency_ms,
            checked_at: Instant::now(),
            checked_at_utc: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.checked_at)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

/// Serializable view of a slot for status output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityStatus {
    pub backend: BackendId,
    /// `None` until the first probe completes
    pub available: Option<bool>,
    pub latency_ms: Option<u64>,
    pub checked_at: Option<DateTime<Utc>>,
    pub probes: u64,
}

/// Why a probe reported the backend down
#[derive(Debug)]
enum ProbeFailure {
    Timeout(Duration),
    Backend(BackendError),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(d) => write!(f, "probe timed out after {:?}", d),
            Self::Backend(e) => write!(f, "{}", e),
        }
    }
}

struct Slot {
    backend: SharedBackend,
    record: RwLock<Option<Arc<AvailabilityRecord>>>,
    /// Held for the duration of a probe
    refresh: Mutex<()>,
    probes: AtomicU64,
}

impl Slot {
    fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            record: RwLock::new(None),
            refresh: Mutex::new(()),
            probes: AtomicU64::new(0),
        }
    }

    fn current(&self) -> Option<Arc<AvailabilityRecord>> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `record`, returning the one it replaced
    fn swap(&self, record: Arc<AvailabilityRecord>) -> Option<Arc<AvailabilityRecord>> {
        self.record
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(record)
    }

    fn clear(&self) {
        self.record
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Per-backend cached availability with TTL
pub struct AvailabilityTracker {
    slots: HashMap<BackendId, Slot>,
    ttl: Duration,
    probe_timeout: Duration,
    events: SharedEventBus,
}

impl AvailabilityTracker {
    pub fn new(
        registry: &BackendRegistry,
        ttl: Duration,
        probe_timeout: Duration,
        events: SharedEventBus,
    ) -> Self {
        let slots = registry
            .ids()
            .into_iter()
            .filter_map(|id| registry.get(id).map(|b| (id, Slot::new(b.clone()))))
            .collect();
        Self {
            slots,
            ttl,
            probe_timeout,
            events,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached availability, probing when the record is missing or stale.
    ///
    /// Unregistered backends are always unavailable and never probed.
    pub async fn is_available(&self, backend: BackendId) -> bool {
        let Some(slot) = self.slots.get(&backend) else {
            debug!(backend = %backend, "Backend not registered, treating as unavailable");
            return false;
        };

        let previous = slot.current();
        if let Some(record) = &previous {
            if record.is_fresh(self.ttl) {
                debug!(
                    backend = %backend,
                    available = record.available,
                    age_ms = record.age().as_millis() as u64,
                    "Availability cache hit"
                );
                return record.available;
            }
        }

        match slot.refresh.try_lock() {
            Ok(_guard) => {
                // Another caller may have finished a refresh since `previous` was read
                if let Some(record) = slot.current() {
                    if record.is_fresh(self.ttl) {
                        return record.available;
                    }
                }
                self.refresh_slot(backend, slot).await.available
            }
            Err(_) => match previous {
                Some(record) => {
                    debug!(
                        backend = %backend,
                        available = record.available,
                        "Refresh in flight, serving previous record"
                    );
                    record.available
                }
                None => self.join_refresh(backend, slot).await.available,
            },
        }
    }

    /// Probe every registered backend concurrently.
    ///
    /// A probe that errors or times out marks only its own backend down.
    pub async fn refresh_all(&self) -> Vec<Arc<AvailabilityRecord>> {
        let refreshes = self
            .slots
            .iter()
            .map(|(&id, slot)| self.claim_and_refresh(id, slot));
        let mut records = join_all(refreshes).await;
        records.sort_by_key(|r| r.backend);

        let up = records.iter().filter(|r| r.available).count();
        info!(up, total = records.len(), "Refreshed backend availability");
        records
    }

    /// Latest cached record, without probing
    pub fn record(&self, backend: BackendId) -> Option<Arc<AvailabilityRecord>> {
        self.slots.get(&backend).and_then(Slot::current)
    }

    /// Drop a cached record so the next check probes
    pub fn invalidate(&self, backend: BackendId) {
        if let Some(slot) = self.slots.get(&backend) {
            slot.clear();
            debug!(backend = %backend, "Availability record invalidated");
        }
    }

    /// Probes issued for `backend` since construction
    pub fn probe_count(&self, backend: BackendId) -> u64 {
        self.slots
            .get(&backend)
            .map(|s| s.probes.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Status of every registered backend, in id order
    pub fn statuses(&self) -> Vec<AvailabilityStatus> {
        let mut ids: Vec<BackendId> = self.slots.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let slot = self.slots.get(&id)?;
                let record = slot.current();
                Some(AvailabilityStatus {
                    backend: id,
                    available: record.as_ref().map(|r| r.available),
                    latency_ms: record.as_ref().map(|r| r.latency_ms),
                    checked_at: record.as_ref().map(|r| r.checked_at_utc),
                    probes: slot.probes.load(Ordering::Relaxed),
                })
            })
            .collect()
    }

    /// Probe under the slot lock, or reuse the result of a probe already in flight
    async fn claim_and_refresh(&self, backend: BackendId, slot: &Slot) -> Arc<AvailabilityRecord> {
        match slot.refresh.try_lock() {
            Ok(_guard) => self.refresh_slot(backend, slot).await,
            Err(_) => self.join_refresh(backend, slot).await,
        }
    }

    /// Wait for the in-flight probe and return its record. Probes again if
    /// that refresh was cancelled before storing anything newer.
    async fn join_refresh(&self, backend: BackendId, slot: &Slot) -> Arc<AvailabilityRecord> {
        let since = Instant::now();
        let _guard = slot.refresh.lock().await;
        match slot.current() {
            Some(record) if record.checked_at >= since => {
                debug!(backend = %backend, "Joined in-flight probe");
                record
            }
            _ => self.refresh_slot(backend, slot).await,
        }
    }

    /// Caller must hold `slot.refresh`
    async fn refresh_slot(&self, backend: BackendId, slot: &Slot) -> Arc<AvailabilityRecord> {
        let report = self.probe(backend, slot).await;
        let record = Arc::new(AvailabilityRecord::from_report(backend, report));
        let previous = slot.swap(record.clone());

        match previous {
            Some(prev) if prev.available != record.available => {
                info!(
                    backend = %backend,
                    from = prev.available,
                    to = record.available,
                    latency_ms = record.latency_ms,
                    "Backend availability changed"
                );
                self.events.publish(RouterEvent::AvailabilityChanged {
                    backend,
                    available: record.available,
                    latency_ms: record.latency_ms,
                    timestamp: record.checked_at_utc,
                });
            }
            Some(_) => {}
            None => debug!(
                backend = %backend,
                available = record.available,
                "Initial availability recorded"
            ),
        }

        record
    }

    async fn probe(&self, backend: BackendId, slot: &Slot) -> ProbeReport {
        slot.probes.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let failure = match tokio::time::timeout(self.probe_timeout, slot.backend.probe()).await {
            Ok(Ok(report)) => return report,
            Ok(Err(e)) => ProbeFailure::Backend(e),
            Err(_) => ProbeFailure::Timeout(self.probe_timeout),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(backend = %backend, latency_ms, error = %failure, "Probe failed, marking unavailable");
        ProbeReport::down(latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventBusExt, EventFilter};
    use crate::registry::Backend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct Probe {
        down: AtomicBool,
        fail: AtomicBool,
        delay_ms: AtomicU64,
        calls: AtomicUsize,
    }

    struct FakeBackend {
        id: BackendId,
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn id(&self) -> BackendId {
            self.id
        }

        async fn probe(&self) -> Result<ProbeReport, BackendError> {
            self.probe.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.probe.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.probe.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Request("connection refused".into()));
            }
            Ok(ProbeReport {
                available: !self.probe.down.load(Ordering::SeqCst),
                latency_ms: delay,
            })
        }
    }

    fn tracker_with(backends: &[(BackendId, Arc<Probe>)]) -> (AvailabilityTracker, SharedEventBus) {
        let mut registry = BackendRegistry::new();
        for (id, probe) in backends {
            registry.register(Arc::new(FakeBackend {
                id: *id,
                probe: probe.clone(),
            }));
        }
        let bus = EventBus::new().shared();
        let tracker = AvailabilityTracker::new(
            &registry,
            DEFAULT_AVAILABILITY_TTL,
            DEFAULT_PROBE_TIMEOUT,
            bus.clone(),
        );
        (tracker, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_within_ttl() {
        let probe = Arc::new(Probe::default());
        let (tracker, _) = tracker_with(&[(BackendId::HostedLlm, probe.clone())]);

        assert!(tracker.is_available(BackendId::HostedLlm).await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.is_available(BackendId::HostedLlm).await);

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.probe_count(BackendId::HostedLlm), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprobe_after_ttl_expires() {
        let probe = Arc::new(Probe::default());
        let (tracker, _) = tracker_with(&[(BackendId::HostedLlm, probe.clone())]);

        assert!(tracker.is_available(BackendId::HostedLlm).await);
        probe.down.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!tracker.is_available(BackendId::HostedLlm).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_marks_unavailable() {
        let probe = Arc::new(Probe::default());
        probe.delay_ms.store(60_000, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[(BackendId::VisionModel, probe)]);

        assert!(!tracker.is_available(BackendId::VisionModel).await);
        let record = tracker.record(BackendId::VisionModel).unwrap();
        assert!(!record.available);
        assert!(record.latency_ms >= DEFAULT_PROBE_TIMEOUT.as_millis() as u64);
    }

    #[tokio::test]
    async fn test_probe_error_marks_unavailable() {
        let probe = Arc::new(Probe::default());
        probe.fail.store(true, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[(BackendId::AnalysisModel, probe)]);
        assert!(!tracker.is_available(BackendId::AnalysisModel).await);
    }

    #[tokio::test]
    async fn test_unregistered_backend_unavailable_without_probe() {
        let (tracker, _) = tracker_with(&[]);
        assert!(!tracker.is_available(BackendId::ClassifierModel).await);
        assert_eq!(tracker.probe_count(BackendId::ClassifierModel), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_probes_concurrently() {
        let a = Arc::new(Probe::default());
        let b = Arc::new(Probe::default());
        a.delay_ms.store(1_000, Ordering::SeqCst);
        b.delay_ms.store(1_000, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[
            (BackendId::AnalysisModel, a),
            (BackendId::ClassifierModel, b),
        ]);

        let start = Instant::now();
        let records = tracker.refresh_all().await;
        assert_eq!(records.len(), 2);
        assert!(start.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_survives_one_failure() {
        let ok = Arc::new(Probe::default());
        let broken = Arc::new(Probe::default());
        let hung = Arc::new(Probe::default());
        broken.fail.store(true, Ordering::SeqCst);
        hung.delay_ms.store(60_000, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[
            (BackendId::HostedLlm, ok.clone()),
            (BackendId::AnalysisModel, broken.clone()),
            (BackendId::VisionModel, hung.clone()),
        ]);

        let records = tracker.refresh_all().await;
        let by_id: HashMap<BackendId, bool> =
            records.iter().map(|r| (r.backend, r.available)).collect();

        assert!(by_id[&BackendId::HostedLlm]);
        assert!(!by_id[&BackendId::AnalysisModel]);
        assert!(!by_id[&BackendId::VisionModel]);
        for p in [&ok, &broken, &hung] {
            assert_eq!(p.calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_transition_emits_event() {
        let probe = Arc::new(Probe::default());
        let (tracker, bus) = tracker_with(&[(BackendId::HostedLlm, probe.clone())]);
        let mut rx = bus.subscribe_filtered(EventFilter::new().types(vec!["availability_changed"]));

        tracker.refresh_all().await;
        assert!(rx.drain().is_empty(), "first probe is not a transition");

        probe.down.store(true, Ordering::SeqCst);
        tracker.refresh_all().await;
        let events = rx.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            RouterEvent::AvailabilityChanged {
                backend: BackendId::HostedLlm,
                available: false,
                ..
            }
        ));

        tracker.refresh_all().await;
        assert!(rx.drain().is_empty(), "no flip, no event");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_record_served_while_refresh_in_flight() {
        let probe = Arc::new(Probe::default());
        let (tracker, _) = tracker_with(&[(BackendId::AnalysisModel, probe.clone())]);
        let tracker = Arc::new(tracker);

        assert!(tracker.is_available(BackendId::AnalysisModel).await);
        tokio::time::advance(Duration::from_secs(61)).await;

        probe.down.store(true, Ordering::SeqCst);
        probe.delay_ms.store(1_000, Ordering::SeqCst);

        let refreshing = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.is_available(BackendId::AnalysisModel).await })
        };
        // Let the spawned refresh claim the slot and park in its probe
        while probe.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        assert!(tracker.is_available(BackendId::AnalysisModel).await);
        assert!(!refreshing.await.unwrap());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_checks_share_one_health_check() {
        let probe = Arc::new(Probe::default());
        probe.delay_ms.store(500, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[(BackendId::HostedLlm, probe.clone())]);
        let tracker = Arc::new(tracker);

        let checks: Vec<_> = (0..5)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.is_available(BackendId::HostedLlm).await })
            })
            .collect();
        for check in checks {
            assert!(check.await.unwrap());
        }

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.probe_count(BackendId::HostedLlm), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_all_joins_check_in_flight() {
        let probe = Arc::new(Probe::default());
        probe.delay_ms.store(500, Ordering::SeqCst);
        let (tracker, _) = tracker_with(&[(BackendId::VisionModel, probe.clone())]);
        let tracker = Arc::new(tracker);

        let first = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.is_available(BackendId::VisionModel).await })
        };
        while probe.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        let records = tracker.refresh_all().await;
        assert!(first.await.unwrap());
        assert!(records[0].available);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_probe() {
        let probe = Arc::new(Probe::default());
        let (tracker, _) = tracker_with(&[(BackendId::HostedLlm, probe.clone())]);

        tracker.is_available(BackendId::HostedLlm).await;
        tracker.invalidate(BackendId::HostedLlm);
        assert!(tracker.record(BackendId::HostedLlm).is_none());
        tracker.is_available(BackendId::HostedLlm).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_statuses_before_and_after_probe() {
        let probe = Arc::new(Probe::default());
        let (tracker, _) = tracker_with(&[(BackendId::HostedLlm, probe)]);

        let before = tracker.statuses();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].available, None);

        tracker.refresh_all().await;
        let after = tracker.statuses();
        assert_eq!(after[0].available, Some(true));
        assert_eq!(after[0].probes, 1);
    }
}
