// Schedule parsing and cadence calculation module
//
// Converts the operator-written schedule document (per-type event intervals
// and lease terms) into strongly-typed per-type schedules with intervals
// pre-resolved to integer minutes, and derives each type's re-check cadence.

use crate::errors::ScheduleError;
use config::{Config, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Minutes per interval unit suffix.
const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 1440;
const MINUTES_PER_WEEK: u64 = 10080;
const MINUTES_PER_YEAR: u64 = 525600;

/// A lease term: either a finite interval in minutes or indefinite (`*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseTerm {
    Finite(u64),
    Indefinite,
}

/// Resolved schedule for one entity type; immutable within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchedule {
    pub entity_type: String,
    /// Periodic events, name -> interval in minutes.
    pub events: BTreeMap<String, u64>,
    /// Retention leases, name -> term.
    pub leases: BTreeMap<String, LeaseTerm>,
}

impl TypeSchedule {
    /// Coarsest re-check period for this type: the GCD of every event
    /// interval and every finite lease interval, in minutes. `None` when no
    /// finite interval is configured, in which case the type is skipped for
    /// the cycle.
    pub fn cadence_minutes(&self) -> Option<u64> {
        let finite_leases = self.leases.values().filter_map(|term| match term {
            LeaseTerm::Finite(minutes) => Some(*minutes),
            LeaseTerm::Indefinite => None,
        });

        self.events
            .values()
            .copied()
            .chain(finite_leases)
            .reduce(gcd)
    }
}

/// Parse an interval string of the form `<positive-integer><unit>` where the
/// unit is one of `m`, `h`, `d`, `w`, `y`. Returns the interval in minutes.
///
/// Pure and side-effect-free.
pub fn parse_interval(value: &str) -> Result<u64, ScheduleError> {
    let invalid = |reason: &str| ScheduleError::InvalidInterval {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty interval"));
    }

    let digits_end = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());

    let (digits, unit) = trimmed.split_at(digits_end);
    let amount: u64 = digits
        .parse()
        .map_err(|_| invalid("missing leading integer"))?;
    if amount == 0 {
        return Err(invalid("interval must be positive"));
    }

    let factor = match unit {
        "m" => 1,
        "h" => MINUTES_PER_HOUR,
        "d" => MINUTES_PER_DAY,
        "w" => MINUTES_PER_WEEK,
        "y" => MINUTES_PER_YEAR,
        _ => return Err(invalid("unrecognized unit (expected m, h, d, w or y)")),
    };

    Ok(amount * factor)
}

/// Parse a lease term: an interval string, or the literal `*` for indefinite.
pub fn parse_lease_term(value: &str) -> Result<LeaseTerm, ScheduleError> {
    if value.trim() == "*" {
        Ok(LeaseTerm::Indefinite)
    } else {
        parse_interval(value).map(LeaseTerm::Finite)
    }
}

/// Raw schedule document as written by operators: two top-level mappings of
/// entity type to interval strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleDocument {
    #[serde(default)]
    pub events: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub leases: BTreeMap<String, BTreeMap<String, String>>,
}

impl ScheduleDocument {
    /// Resolve the document into per-type schedules, rejecting malformed
    /// interval strings eagerly. Entity types appearing only under `leases`
    /// still get a schedule (with no events).
    pub fn build(&self) -> Result<Vec<TypeSchedule>, ScheduleError> {
        let mut entity_types: Vec<&String> = self.events.keys().collect();
        for etype in self.leases.keys() {
            if !self.events.contains_key(etype) {
                entity_types.push(etype);
            }
        }
        entity_types.sort();

        let mut schedules = Vec::with_capacity(entity_types.len());
        for etype in entity_types {
            let mut events = BTreeMap::new();
            if let Some(raw_events) = self.events.get(etype) {
                for (name, interval) in raw_events {
                    // The indefinite sentinel is only meaningful for leases.
                    if interval.trim() == "*" {
                        return Err(ScheduleError::IndefiniteEventInterval {
                            entity_type: etype.clone(),
                            event: name.clone(),
                        });
                    }
                    events.insert(name.clone(), parse_interval(interval)?);
                }
            }

            let mut leases = BTreeMap::new();
            if let Some(raw_leases) = self.leases.get(etype) {
                for (name, term) in raw_leases {
                    leases.insert(name.clone(), parse_lease_term(term)?);
                }
            }

            schedules.push(TypeSchedule {
                entity_type: etype.clone(),
                events,
                leases,
            });
        }

        Ok(schedules)
    }
}

/// Load and resolve the schedule document from a TOML file.
pub fn load_schedules<P: AsRef<Path>>(path: P) -> Result<Vec<TypeSchedule>, ScheduleError> {
    let document: ScheduleDocument = Config::builder()
        .add_source(File::from(path.as_ref().to_path_buf()))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| ScheduleError::InvalidDocument(e.to_string()))?;

    document.build()
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("10m").unwrap(), 10);
        assert_eq!(parse_interval("2h").unwrap(), 120);
        assert_eq!(parse_interval("1d").unwrap(), 1440);
        assert_eq!(parse_interval("1w").unwrap(), 10080);
        assert_eq!(parse_interval("1y").unwrap(), 525600);
    }

    #[test]
    fn test_parse_interval_rejects_malformed() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("h").is_err());
        assert!(parse_interval("*").is_err());
        assert!(parse_interval("0d").is_err());
    }

    #[test]
    fn test_parse_lease_term_indefinite() {
        assert_eq!(parse_lease_term("*").unwrap(), LeaseTerm::Indefinite);
        assert_eq!(parse_lease_term("2w").unwrap(), LeaseTerm::Finite(20160));
    }

    #[test]
    fn test_cadence_gcd() {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::from([
                ("hourly".to_string(), 60),
                ("daily".to_string(), 1440),
            ]),
            leases: BTreeMap::new(),
        };
        assert_eq!(schedule.cadence_minutes(), Some(60));

        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::from([
                ("a".to_string(), 45),
                ("b".to_string(), 90),
                ("c".to_string(), 15),
            ]),
            leases: BTreeMap::new(),
        };
        assert_eq!(schedule.cadence_minutes(), Some(15));
    }

    #[test]
    fn test_cadence_ignores_indefinite_leases() {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::from([("daily".to_string(), 1440)]),
            leases: BTreeMap::from([
                ("default".to_string(), LeaseTerm::Finite(20160)),
                ("manual".to_string(), LeaseTerm::Indefinite),
            ]),
        };
        assert_eq!(schedule.cadence_minutes(), Some(1440));
    }

    #[test]
    fn test_cadence_empty_schedule() {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::new(),
            leases: BTreeMap::from([("manual".to_string(), LeaseTerm::Indefinite)]),
        };
        assert_eq!(schedule.cadence_minutes(), None);
    }

    #[test]
    fn test_document_build_resolves_intervals() {
        let document = ScheduleDocument {
            events: BTreeMap::from([(
                "ip".to_string(),
                BTreeMap::from([("regular_update".to_string(), "1d".to_string())]),
            )]),
            leases: BTreeMap::from([
                (
                    "ip".to_string(),
                    BTreeMap::from([("default".to_string(), "2w".to_string())]),
                ),
                (
                    "asn".to_string(),
                    BTreeMap::from([("manual".to_string(), "*".to_string())]),
                ),
            ]),
        };

        let schedules = document.build().unwrap();
        assert_eq!(schedules.len(), 2);

        let asn = &schedules[0];
        assert_eq!(asn.entity_type, "asn");
        assert!(asn.events.is_empty());
        assert_eq!(asn.leases["manual"], LeaseTerm::Indefinite);

        let ip = &schedules[1];
        assert_eq!(ip.entity_type, "ip");
        assert_eq!(ip.events["regular_update"], 1440);
        assert_eq!(ip.leases["default"], LeaseTerm::Finite(20160));
    }

    #[test]
    fn test_document_rejects_indefinite_event() {
        let document = ScheduleDocument {
            events: BTreeMap::from([(
                "ip".to_string(),
                BTreeMap::from([("broken".to_string(), "*".to_string())]),
            )]),
            leases: BTreeMap::new(),
        };
        assert!(matches!(
            document.build(),
            Err(ScheduleError::IndefiniteEventInterval { .. })
        ));
    }
}
