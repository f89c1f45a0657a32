// In-memory entity store used by engine and cycle tests

use crate::errors::DatastoreError;
use crate::models::{DueEntity, EntityRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::entity::EntityStore;

/// [`EntityStore`] backed by a mutex-guarded vector of records.
#[derive(Default)]
pub struct MemoryEntityStore {
    records: Mutex<Vec<EntityRecord>>,
}

impl MemoryEntityStore {
    pub fn new(records: Vec<EntityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Overwrite an entity's `last_regular_update`, as the downstream worker
    /// would after applying a dispatched attribute update.
    pub async fn set_last_regular_update(
        &self,
        entity_type: &str,
        entity_key: &str,
        value: DateTime<Utc>,
    ) {
        let mut records = self.records.lock().await;
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.entity_type == entity_type && r.entity_key == entity_key)
        {
            record.last_regular_update = value;
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn fetch_due(
        &self,
        entity_type: &str,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
    ) -> Result<Vec<DueEntity>, DatastoreError> {
        let records = self.records.lock().await;
        let mut due: Vec<DueEntity> = records
            .iter()
            .filter(|r| {
                r.entity_type == entity_type
                    && r.last_regular_update > after
                    && r.last_regular_update <= before
            })
            .map(|r| DueEntity {
                entity_key: r.entity_key.clone(),
                last_regular_update: r.last_regular_update,
                ts_added: r.ts_added,
            })
            .collect();
        due.sort_by_key(|d| d.last_regular_update);
        Ok(due)
    }

    async fn get_leases(
        &self,
        entity_type: &str,
        entity_key: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, DatastoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| r.entity_type == entity_type && r.entity_key == entity_key)
            .map(|r| r.leases.clone())
            .unwrap_or_default())
    }
}
