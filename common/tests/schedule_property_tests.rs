// Property-based tests for schedule parsing and cadence reduction

use common::schedule::{parse_interval, parse_lease_term, LeaseTerm, TypeSchedule};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn unit_factor() -> impl Strategy<Value = (char, u64)> {
    prop_oneof![
        Just(('m', 1u64)),
        Just(('h', 60)),
        Just(('d', 1440)),
        Just(('w', 10080)),
        Just(('y', 525600)),
    ]
}

/// *For any* positive amount and known unit, parsing `<amount><unit>` yields
/// `amount * factor` minutes.
#[test]
fn property_interval_parsing_matches_unit_factor() {
    proptest!(|(amount in 1u64..100_000u64, unit in unit_factor())| {
        let (suffix, factor) = unit;
        let parsed = parse_interval(&format!("{}{}", amount, suffix)).unwrap();
        prop_assert_eq!(parsed, amount * factor);
    });
}

/// *For any* string with an unrecognized unit suffix, parsing fails instead
/// of guessing.
#[test]
fn property_unknown_unit_is_rejected() {
    proptest!(|(amount in 1u64..1000u64, suffix in "[a-z]")| {
        prop_assume!(!"mhdwy".contains(&suffix));
        let input = format!("{}{}", amount, suffix);
        prop_assert!(parse_interval(&input).is_err());
    });
}

/// *For any* string without a leading integer, parsing fails.
#[test]
fn property_missing_integer_is_rejected() {
    proptest!(|(body in "[a-z*]{0,8}")| {
        prop_assert!(parse_interval(&body).is_err());
    });
}

/// *For any* lease term, `*` maps to the indefinite sentinel and everything
/// else behaves like a plain interval.
#[test]
fn property_lease_term_star_is_indefinite() {
    proptest!(|(amount in 1u64..1000u64)| {
        prop_assert_eq!(parse_lease_term("*").unwrap(), LeaseTerm::Indefinite);
        prop_assert_eq!(
            parse_lease_term(&format!("{}h", amount)).unwrap(),
            LeaseTerm::Finite(amount * 60)
        );
    });
}

/// *For any* non-empty set of finite intervals, the derived cadence divides
/// every interval exactly: no configured boundary is ever missed.
#[test]
fn property_cadence_divides_every_interval() {
    proptest!(|(intervals in prop::collection::vec(1u64..10_000u64, 1..8))| {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: intervals
                .iter()
                .enumerate()
                .map(|(i, minutes)| (format!("event_{}", i), *minutes))
                .collect(),
            leases: BTreeMap::new(),
        };

        let cadence = schedule.cadence_minutes().unwrap();
        prop_assert!(cadence >= 1);
        for minutes in &intervals {
            prop_assert_eq!(minutes % cadence, 0);
        }
    });
}

/// *For any* schedule whose only lease is indefinite, there is no cadence:
/// the type is skipped rather than re-checked on an arbitrary period.
#[test]
fn property_indefinite_only_schedule_has_no_cadence() {
    proptest!(|(name in "[a-z]{1,12}")| {
        let schedule = TypeSchedule {
            entity_type: "ip".to_string(),
            events: BTreeMap::new(),
            leases: BTreeMap::from([(name, LeaseTerm::Indefinite)]),
        };
        prop_assert_eq!(schedule.cadence_minutes(), None);
    });
}
