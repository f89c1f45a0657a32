// Entity repository: the datastore side of the candidate-fetch contract

use crate::db::DbPool;
use crate::errors::DatastoreError;
use crate::models::DueEntity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::instrument;

/// Datastore contract used by the cycle driver.
///
/// `fetch_due` must return every entity of the type whose
/// `last_regular_update` lies in the half-open window `(after, before]`.
/// Together with the driver's watermark discipline this guarantees each
/// entity is considered exactly once across consecutive cycles, regardless
/// of cycle-timing jitter.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch_due(
        &self,
        entity_type: &str,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
    ) -> Result<Vec<DueEntity>, DatastoreError>;

    /// Current lease mapping of one entity: lease name -> creation time.
    async fn get_leases(
        &self,
        entity_type: &str,
        entity_key: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, DatastoreError>;
}

/// PostgreSQL implementation of [`EntityStore`].
pub struct EntityRepository {
    pool: DbPool,
}

impl EntityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for EntityRepository {
    #[instrument(skip(self))]
    async fn fetch_due(
        &self,
        entity_type: &str,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
    ) -> Result<Vec<DueEntity>, DatastoreError> {
        let rows = sqlx::query(
            r#"
            SELECT entity_key, last_regular_update, ts_added
            FROM entity_records
            WHERE entity_type = $1
              AND last_regular_update > $2
              AND last_regular_update <= $3
            ORDER BY last_regular_update
            "#,
        )
        .bind(entity_type)
        .bind(after)
        .bind(before)
        .fetch_all(self.pool.pool())
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push(DueEntity {
                entity_key: row.try_get("entity_key")?,
                last_regular_update: row.try_get("last_regular_update")?,
                ts_added: row.try_get("ts_added")?,
            });
        }

        tracing::debug!(count = candidates.len(), "Fetched due entities");
        Ok(candidates)
    }

    #[instrument(skip(self))]
    async fn get_leases(
        &self,
        entity_type: &str,
        entity_key: &str,
    ) -> Result<BTreeMap<String, DateTime<Utc>>, DatastoreError> {
        let row = sqlx::query(
            r#"
            SELECT leases
            FROM entity_records
            WHERE entity_type = $1 AND entity_key = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_key)
        .fetch_optional(self.pool.pool())
        .await?;

        // Entity vanished between fetch and lease lookup: treat as no leases.
        let Some(row) = row else {
            return Ok(BTreeMap::new());
        };

        let leases_json: serde_json::Value = row.try_get("leases")?;
        if leases_json.is_null() {
            return Ok(BTreeMap::new());
        }
        let raw: BTreeMap<String, String> =
            serde_json::from_value(leases_json).map_err(|e| DatastoreError::MalformedRecord {
                entity_key: entity_key.to_string(),
                reason: format!("lease mapping is not a string map: {}", e),
            })?;

        let mut leases = BTreeMap::new();
        for (name, created_at) in raw {
            let parsed = DateTime::parse_from_rfc3339(&created_at).map_err(|e| {
                DatastoreError::MalformedRecord {
                    entity_key: entity_key.to_string(),
                    reason: format!("lease '{}' has unparseable timestamp: {}", name, e),
                }
            })?;
            leases.insert(name, parsed.with_timezone(&Utc));
        }

        Ok(leases)
    }
}
