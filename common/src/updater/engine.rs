// Cycle driver: runs the full per-type pipeline on a fixed wall-clock period
// and owns the cross-cycle watermark.

use crate::db::EntityStore;
use crate::errors::DatastoreError;
use crate::models::{DispatchItem, DueEntity, SupplementalEvent};
use crate::queue::TaskPublisher;
use crate::schedule::TypeSchedule;
use crate::sidechannel::SupplementalSource;
use crate::updater::clock::Clock;
use crate::updater::dispatch::RateLimitedDispatcher;
use crate::updater::lifecycle;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{gauge, histogram};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the updater engine
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Wall-clock period between cycles (in seconds)
    pub cycle_period_seconds: u64,
    /// Dispatch throughput cap (items per second)
    pub dispatch_rate_per_second: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            cycle_period_seconds: 600,
            dispatch_rate_per_second: 100,
        }
    }
}

/// Counts from one full cycle, logged and asserted on by tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub candidates: usize,
    pub published: usize,
    pub deletes: usize,
    pub failed: usize,
}

/// The periodic lifecycle updater.
///
/// One cycle runs to completion before the next is considered; cycles never
/// overlap, which is what makes the watermark safe to read at the start of a
/// cycle and advance at its end without locking discipline beyond the mutex.
pub struct UpdaterEngine {
    config: UpdaterConfig,
    schedules: Vec<TypeSchedule>,
    entity_types: BTreeSet<String>,
    store: Arc<dyn EntityStore>,
    dispatcher: RateLimitedDispatcher,
    supplemental: Arc<dyn SupplementalSource>,
    clock: Arc<dyn Clock>,
    /// Cross-cycle cutoff: entities with `last_regular_update` at or before
    /// `watermark − cadence` have already been considered. Advanced only
    /// after a cycle drains every type.
    watermark: Mutex<DateTime<Utc>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UpdaterEngine {
    pub fn new(
        config: UpdaterConfig,
        schedules: Vec<TypeSchedule>,
        store: Arc<dyn EntityStore>,
        publisher: Arc<dyn TaskPublisher>,
        supplemental: Arc<dyn SupplementalSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let entity_types = schedules
            .iter()
            .map(|s| s.entity_type.clone())
            .collect::<BTreeSet<_>>();
        let dispatcher = RateLimitedDispatcher::new(
            publisher,
            clock.clone(),
            config.dispatch_rate_per_second,
        );

        Self {
            config,
            schedules,
            entity_types,
            store,
            dispatcher,
            supplemental,
            clock,
            watermark: Mutex::new(DateTime::<Utc>::UNIX_EPOCH),
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run cycles on the fixed period until a shutdown signal arrives.
    ///
    /// The shutdown check happens only between cycles: a cycle already in
    /// flight runs to completion.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            cycle_period_seconds = self.config.cycle_period_seconds,
            dispatch_rate_per_second = self.config.dispatch_rate_per_second,
            entity_types = self.entity_types.len(),
            "Starting updater engine"
        );

        let mut cycle_interval = interval(Duration::from_secs(self.config.cycle_period_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    let summary = self.run_cycle().await;
                    if summary.candidates > 0 {
                        info!(
                            candidates = summary.candidates,
                            published = summary.published,
                            deletes = summary.deletes,
                            failed = summary.failed,
                            "Cycle complete"
                        );
                    } else {
                        debug!("Cycle complete, no entities due");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping updater engine");
                    break;
                }
            }
        }

        info!("Updater engine stopped");
    }

    /// Request a stop after the current cycle.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run one full pass over all entity types.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let cycle_start = self.clock.now();
        let previous_watermark = *self.watermark.lock().await;

        // The side channel is re-read every cycle so operator edits take
        // effect without a restart.
        let supplemental = self.supplemental.read(&self.entity_types, cycle_start);
        if !supplemental.is_empty() {
            debug!(count = supplemental.len(), "Loaded supplemental events");
        }

        let mut summary = CycleSummary::default();
        let mut all_drained = true;

        for schedule in &self.schedules {
            match self
                .process_type(schedule, cycle_start, previous_watermark, &supplemental)
                .await
            {
                Ok(type_summary) => {
                    summary.candidates += type_summary.candidates;
                    summary.published += type_summary.published;
                    summary.deletes += type_summary.deletes;
                    summary.failed += type_summary.failed;
                }
                Err(e) => {
                    error!(
                        entity_type = %schedule.entity_type,
                        error = %e,
                        "Failed to fetch candidates, type left for next cycle"
                    );
                    all_drained = false;
                }
            }
        }

        if all_drained {
            *self.watermark.lock().await = cycle_start;
        } else {
            warn!("Watermark not advanced: at least one entity type was not drained");
        }

        gauge!("updater_watermark_lag_seconds")
            .set((cycle_start - previous_watermark).num_seconds() as f64);
        histogram!("updater_cycle_duration_seconds")
            .record((self.clock.now() - cycle_start).num_milliseconds() as f64 / 1000.0);

        summary
    }

    /// Pipeline for one entity type: cadence, window fetch, per-entity
    /// evaluation, rate-limited dispatch. Per-entity errors are isolated;
    /// only the fetch itself can fail the type.
    async fn process_type(
        &self,
        schedule: &TypeSchedule,
        cycle_start: DateTime<Utc>,
        previous_watermark: DateTime<Utc>,
        supplemental: &[SupplementalEvent],
    ) -> Result<CycleSummary, DatastoreError> {
        let Some(cadence) = schedule.cadence_minutes() else {
            debug!(entity_type = %schedule.entity_type, "No configured cadence, skipping type");
            return Ok(CycleSummary::default());
        };

        let cadence_span = ChronoDuration::minutes(cadence as i64);
        let before = cycle_start - cadence_span;
        let after = previous_watermark - cadence_span;

        let candidates = self
            .store
            .fetch_due(&schedule.entity_type, before, after)
            .await?;

        debug!(
            entity_type = %schedule.entity_type,
            cadence_minutes = cadence,
            candidates = candidates.len(),
            "Evaluating due entities"
        );

        let mut items: Vec<DispatchItem> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self
                .plan_entity(schedule, cadence, candidate, supplemental, cycle_start)
                .await
            {
                Ok(item) => items.push(item),
                Err(e) => {
                    // One malformed record must not abort the batch.
                    error!(
                        entity_type = %schedule.entity_type,
                        entity_key = %candidate.entity_key,
                        error = %e,
                        "Skipping entity"
                    );
                }
            }
            metrics::counter!(
                "updater_entities_evaluated_total",
                "entity_type" => schedule.entity_type.clone()
            )
            .increment(1);
        }

        let deletes = items.iter().filter(|i| i.delete).count();
        let outcome = self.dispatcher.dispatch(&items).await;

        Ok(CycleSummary {
            candidates: candidates.len(),
            published: outcome.published,
            deletes,
            failed: outcome.failed,
        })
    }

    async fn plan_entity(
        &self,
        schedule: &TypeSchedule,
        cadence: u64,
        candidate: &DueEntity,
        supplemental: &[SupplementalEvent],
        now: DateTime<Utc>,
    ) -> Result<DispatchItem, DatastoreError> {
        let leases = self
            .store
            .get_leases(&schedule.entity_type, &candidate.entity_key)
            .await?;

        Ok(lifecycle::plan_entity(
            schedule, cadence, candidate, &leases, supplemental, now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryEntityStore;
    use crate::errors::QueueError;
    use crate::models::EntityRecord;
    use crate::schedule::LeaseTerm;
    use crate::sidechannel::MemorySupplementalSource;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    struct ManualClock {
        now: StdMutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn at(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: StdMutex::new(start),
            })
        }

        fn advance_minutes(&self, minutes: i64) {
            let mut now = self.now.lock().unwrap();
            *now += ChronoDuration::minutes(minutes);
        }
    }

    #[async_trait::async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += ChronoDuration::from_std(duration).unwrap_or_default();
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        items: StdMutex<Vec<DispatchItem>>,
    }

    impl RecordingPublisher {
        fn items(&self) -> Vec<DispatchItem> {
            self.items.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TaskPublisher for RecordingPublisher {
        async fn publish(&self, item: &DispatchItem) -> Result<(), QueueError> {
            self.items.lock().unwrap().push(item.clone());
            Ok(())
        }

        async fn publish_with_retry(
            &self,
            item: &DispatchItem,
            _max_retries: u32,
        ) -> Result<(), QueueError> {
            self.publish(item).await
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn hourly_ip_schedule() -> TypeSchedule {
        TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::from([("regular_update".to_string(), 60)]),
            leases: BTreeMap::new(),
        }
    }

    fn engine_with(
        schedules: Vec<TypeSchedule>,
        store: Arc<MemoryEntityStore>,
        clock: Arc<ManualClock>,
    ) -> (UpdaterEngine, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = UpdaterEngine::new(
            UpdaterConfig::default(),
            schedules,
            store,
            publisher.clone(),
            Arc::new(MemorySupplementalSource::default()),
            clock,
        );
        (engine, publisher)
    }

    #[tokio::test]
    async fn test_cycle_fires_due_event_once() {
        let store = Arc::new(MemoryEntityStore::new(vec![EntityRecord {
            entity_type: "ip".to_string(),
            entity_key: "1.2.3.4".to_string(),
            ts_added: t0(),
            last_regular_update: t0(),
            leases: BTreeMap::new(),
        }]));
        let clock = ManualClock::at(t0() + ChronoDuration::minutes(120));
        let (engine, publisher) = engine_with(vec![hourly_ip_schedule()], store, clock);

        let summary = engine.run_cycle().await;

        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.published, 1);
        let items = publisher.items();
        assert_eq!(items[0].events, vec!["regular_update".to_string()]);
        assert!(!items[0].delete);
    }

    #[tokio::test]
    async fn test_consecutive_cycles_are_idempotent() {
        let store = Arc::new(MemoryEntityStore::new(vec![EntityRecord {
            entity_type: "ip".to_string(),
            entity_key: "1.2.3.4".to_string(),
            ts_added: t0(),
            last_regular_update: t0(),
            leases: BTreeMap::new(),
        }]));
        let clock = ManualClock::at(t0() + ChronoDuration::minutes(120));
        let (engine, publisher) =
            engine_with(vec![hourly_ip_schedule()], store.clone(), clock.clone());

        let first = engine.run_cycle().await;
        assert_eq!(first.published, 1);

        // Ten minutes later, with nothing newly due, the watermark window
        // excludes the already-considered entity.
        clock.advance_minutes(10);
        let second = engine.run_cycle().await;
        assert_eq!(second.candidates, 0);
        assert_eq!(second.published, 0);
        assert_eq!(publisher.items().len(), 1);

        // Once the worker applies the quantized timestamp and another full
        // interval passes, the entity becomes due again.
        store
            .set_last_regular_update("ip", "1.2.3.4", t0() + ChronoDuration::minutes(120))
            .await;
        clock.advance_minutes(120);
        let third = engine.run_cycle().await;
        assert_eq!(third.candidates, 1);
        assert_eq!(publisher.items().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_deletes_entity_with_expired_leases() {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::from([("regular_update".to_string(), 60)]),
            leases: BTreeMap::from([("default".to_string(), LeaseTerm::Finite(20160))]),
        };
        let store = Arc::new(MemoryEntityStore::new(vec![EntityRecord {
            entity_type: "ip".to_string(),
            entity_key: "1.2.3.4".to_string(),
            ts_added: t0(),
            last_regular_update: t0(),
            leases: BTreeMap::from([("default".to_string(), t0())]),
        }]));
        // 15 days out the two-week lease has expired.
        let clock = ManualClock::at(t0() + ChronoDuration::days(15));
        let (engine, publisher) = engine_with(vec![schedule], store, clock);

        let summary = engine.run_cycle().await;

        assert_eq!(summary.deletes, 1);
        let items = publisher.items();
        assert_eq!(items.len(), 1);
        assert!(items[0].delete);
    }

    #[tokio::test]
    async fn test_type_without_cadence_is_skipped() {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::new(),
            leases: BTreeMap::from([("manual".to_string(), LeaseTerm::Indefinite)]),
        };
        let store = Arc::new(MemoryEntityStore::new(vec![EntityRecord {
            entity_type: "ip".to_string(),
            entity_key: "1.2.3.4".to_string(),
            ts_added: t0(),
            last_regular_update: t0(),
            leases: BTreeMap::from([("manual".to_string(), t0())]),
        }]));
        let clock = ManualClock::at(t0() + ChronoDuration::days(30));
        let (engine, publisher) = engine_with(vec![schedule], store, clock);

        let summary = engine.run_cycle().await;
        assert_eq!(summary.candidates, 0);
        assert!(publisher.items().is_empty());
    }

    #[tokio::test]
    async fn test_supplemental_event_reaches_dispatch() {
        let store = Arc::new(MemoryEntityStore::new(vec![EntityRecord {
            entity_type: "ip".to_string(),
            entity_key: "1.2.3.4".to_string(),
            ts_added: t0(),
            last_regular_update: t0(),
            leases: BTreeMap::new(),
        }]));
        let clock = ManualClock::at(t0() + ChronoDuration::days(2));
        let publisher = Arc::new(RecordingPublisher::default());
        let supplemental = MemorySupplementalSource::new(vec![SupplementalEvent {
            entity_type: "ip".to_string(),
            event_name: "reprocess".to_string(),
            expires_at: t0() + ChronoDuration::days(365),
        }]);
        let engine = UpdaterEngine::new(
            UpdaterConfig::default(),
            vec![hourly_ip_schedule()],
            store,
            publisher.clone(),
            Arc::new(supplemental),
            clock,
        );

        engine.run_cycle().await;

        let items = publisher.items();
        assert_eq!(items.len(), 1);
        assert!(items[0].events.contains(&"reprocess".to_string()));
        assert!(items[0].events.contains(&"regular_update".to_string()));
    }
}
