// Per-entity lifecycle evaluation: lease state machine and event determination
//
// Pure functions; the engine feeds them the candidate, its current leases and
// the cycle's supplemental events, and gets back the single dispatch item for
// the entity.

use crate::models::{AttributeUpdate, DispatchItem, DueEntity, SupplementalEvent};
use crate::schedule::{LeaseTerm, TypeSchedule};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// Supplemental events fire on a fixed daily cadence.
const SUPPLEMENTAL_INTERVAL_MINUTES: u64 = 1440;

/// Result of the lease state machine for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseOutcome {
    /// True when every retention lease is gone and the entity is terminal.
    pub delete: bool,
    /// Leases carried into the next period (expired and unknown ones dropped,
    /// indefinite ones renewed under their own name).
    pub surviving: BTreeMap<String, DateTime<Utc>>,
}

/// Evaluate the entity's leases against the type's configuration.
///
/// A type with no configured leases never deletes entities, but leases left
/// on records by earlier configurations are still dropped. Otherwise the
/// entity survives while at least one lease is unexpired or indefinite;
/// leases whose name is absent from configuration are dropped and reported
/// as a configuration mismatch.
pub fn evaluate_leases(
    schedule: &TypeSchedule,
    current: &BTreeMap<String, DateTime<Utc>>,
    entity_key: &str,
    now: DateTime<Utc>,
) -> LeaseOutcome {
    if schedule.leases.is_empty() {
        for name in current.keys() {
            warn!(
                entity_type = %schedule.entity_type,
                entity_key = entity_key,
                lease = %name,
                "Dropping lease of a type with no lease configuration"
            );
        }
        return LeaseOutcome {
            delete: false,
            surviving: BTreeMap::new(),
        };
    }

    let mut delete = true;
    let mut surviving = BTreeMap::new();

    for (name, created_at) in current {
        match schedule.leases.get(name) {
            None => {
                warn!(
                    entity_type = %schedule.entity_type,
                    entity_key = entity_key,
                    lease = %name,
                    "Dropping lease absent from current configuration"
                );
            }
            Some(LeaseTerm::Indefinite) => {
                delete = false;
                // Renew under the lease's own name.
                surviving.insert(name.clone(), now);
            }
            Some(LeaseTerm::Finite(minutes)) => {
                if *created_at + Duration::minutes(*minutes as i64) > now {
                    delete = false;
                    surviving.insert(name.clone(), *created_at);
                }
                // Expired leases drop silently.
            }
        }
    }

    LeaseOutcome { delete, surviving }
}

/// How many whole intervals of `interval_minutes` have elapsed since `from`.
fn elapsed_count(from: DateTime<Utc>, to: DateTime<Utc>, interval_minutes: u64) -> i64 {
    (to - from).num_minutes() / interval_minutes as i64
}

/// Decide which events have newly become due since the entity's last
/// evaluation. An event fires when its elapsed-interval count increased,
/// and fires exactly once no matter how many interval boundaries were
/// crossed: the downstream worker recomputes current state rather than
/// replaying missed periods.
pub fn determine_events(
    schedule: &TypeSchedule,
    candidate: &DueEntity,
    supplemental: &[SupplementalEvent],
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut fired = Vec::new();

    for (event_name, interval) in &schedule.events {
        let old_count = elapsed_count(candidate.ts_added, candidate.last_regular_update, *interval);
        let new_count = elapsed_count(candidate.ts_added, now, *interval);
        if new_count > old_count {
            fired.push(event_name.clone());
        }
    }

    for event in supplemental {
        if event.entity_type != schedule.entity_type || event.expires_at <= now {
            continue;
        }
        let old_count = elapsed_count(
            candidate.ts_added,
            candidate.last_regular_update,
            SUPPLEMENTAL_INTERVAL_MINUTES,
        );
        let new_count = elapsed_count(candidate.ts_added, now, SUPPLEMENTAL_INTERVAL_MINUTES);
        if new_count > old_count {
            fired.push(event.event_name.clone());
        }
    }

    fired
}

/// New `last_regular_update`, quantized to the type's cadence grid so that
/// later elapsed-count comparisons stay consistent regardless of when within
/// a cadence window the cycle actually ran.
pub fn quantize_last_update(
    ts_added: DateTime<Utc>,
    now: DateTime<Utc>,
    cadence_minutes: u64,
) -> DateTime<Utc> {
    let periods = elapsed_count(ts_added, now, cadence_minutes);
    ts_added + Duration::minutes(periods * cadence_minutes as i64)
}

/// Full per-entity evaluation: lease state machine, then event determination
/// for survivors, merged into the single dispatch item for the entity.
pub fn plan_entity(
    schedule: &TypeSchedule,
    cadence_minutes: u64,
    candidate: &DueEntity,
    current_leases: &BTreeMap<String, DateTime<Utc>>,
    supplemental: &[SupplementalEvent],
    now: DateTime<Utc>,
) -> DispatchItem {
    let outcome = evaluate_leases(schedule, current_leases, &candidate.entity_key, now);

    if outcome.delete {
        return DispatchItem::delete(&schedule.entity_type, &candidate.entity_key);
    }

    let events = determine_events(schedule, candidate, supplemental, now);

    let mut attribute_updates = Vec::new();
    if !schedule.leases.is_empty() || !current_leases.is_empty() {
        attribute_updates.push(AttributeUpdate::set(
            "leases",
            lease_map_value(&outcome.surviving),
        ));
    }
    attribute_updates.push(AttributeUpdate::set(
        "last_regular_update",
        serde_json::Value::String(
            quantize_last_update(candidate.ts_added, now, cadence_minutes)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ));

    DispatchItem::update(
        &schedule.entity_type,
        &candidate.entity_key,
        events,
        attribute_updates,
    )
}

fn lease_map_value(leases: &BTreeMap<String, DateTime<Utc>>) -> serde_json::Value {
    serde_json::Value::Object(
        leases
            .iter()
            .map(|(name, created_at)| {
                (
                    name.clone(),
                    serde_json::Value::String(created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                )
            })
            .collect(),
    )
}
