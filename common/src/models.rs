use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Entity Models
// ============================================================================

/// EntityRecord is the datastore's view of a tracked entity.
///
/// The updater reads `last_regular_update`, `ts_added` and the lease mapping,
/// and writes back only through dispatched work items. Invariant:
/// `last_regular_update >= ts_added`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub entity_key: String,
    pub ts_added: DateTime<Utc>,
    pub last_regular_update: DateTime<Utc>,
    /// Named retention leases, keyed by lease name, valued by creation time.
    #[serde(default)]
    pub leases: BTreeMap<String, DateTime<Utc>>,
}

/// A candidate returned by the due-entity window query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEntity {
    pub entity_key: String,
    pub last_regular_update: DateTime<Utc>,
    pub ts_added: DateTime<Utc>,
}

// ============================================================================
// Dispatch Models
// ============================================================================

/// Operation applied to a single attribute by the downstream worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOp {
    Set,
}

/// One attribute write carried by a dispatch item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeUpdate {
    pub op: UpdateOp,
    pub attribute: String,
    pub value: serde_json::Value,
}

impl AttributeUpdate {
    pub fn set(attribute: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: UpdateOp::Set,
            attribute: attribute.into(),
            value,
        }
    }
}

/// Work item handed to the task queue; terminal once published.
///
/// Wire shape consumed by the downstream worker:
/// `{entity_type, entity_key, events, attribute_updates, delete, source}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchItem {
    pub entity_type: String,
    pub entity_key: String,
    pub events: Vec<String>,
    pub attribute_updates: Vec<AttributeUpdate>,
    pub delete: bool,
    pub source: String,
}

impl DispatchItem {
    /// Build an update item carrying fired events and attribute writes.
    pub fn update(
        entity_type: impl Into<String>,
        entity_key: impl Into<String>,
        events: Vec<String>,
        attribute_updates: Vec<AttributeUpdate>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_key: entity_key.into(),
            events,
            attribute_updates,
            delete: false,
            source: "updater".to_string(),
        }
    }

    /// Build a terminal delete item. Carries no events or attribute writes.
    pub fn delete(entity_type: impl Into<String>, entity_key: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_key: entity_key.into(),
            events: Vec::new(),
            attribute_updates: Vec::new(),
            delete: true,
            source: "updater".to_string(),
        }
    }
}

// ============================================================================
// Supplemental Events
// ============================================================================

/// Operator-supplied ad-hoc event, valid until its expiry. Reloaded from the
/// side channel every cycle and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplementalEvent {
    pub entity_type: String,
    pub event_name: String,
    pub expires_at: DateTime<Utc>,
}
