//! Outbox table operations via direct SQLx.
//!
//! Rows are read in id order past the epoch cursor and deleted one at a
//! time as their deliveries settle.

use crate::error::{Error, Result};
use crate::model::{Record, RecordId};
use crate::store::OutboxStore;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;

/// A pending row as shown to operators.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub id: RecordId,
    pub payload: Vec<u8>,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

fn count_operation(operation: &'static str) {
    metrics::store_operations().add(1, &[KeyValue::new("operation", operation)]);
}

impl super::Db {
    /// Append a record to the outbox. Returns its id.
    pub async fn enqueue(&self, payload: &[u8]) -> Result<RecordId> {
        let row: (i64,) = sqlx::query_as("INSERT INTO outbox (payload) VALUES ($1) RETURNING id")
            .bind(payload)
            .fetch_one(self.pool())
            .await?;
        count_operation("enqueue");
        Ok(RecordId(row.0))
    }

    /// Number of rows still awaiting settlement.
    pub async fn pending_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Oldest pending rows, regardless of the relay cursor.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<PendingRecord>> {
        let rows = sqlx::query_as::<_, (i64, Vec<u8>, chrono::DateTime<chrono::Utc>)>(
            "SELECT id, payload, enqueued_at FROM outbox ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, payload, enqueued_at)| PendingRecord {
                id: RecordId(id),
                payload,
                enqueued_at,
            })
            .collect())
    }

    fn cursor(&self) -> Result<std::sync::MutexGuard<'_, Option<RecordId>>> {
        self.cursor.lock().map_err(|_| Error::LockPoisoned("outbox cursor"))
    }
}

#[async_trait]
impl OutboxStore for super::Db {
    async fn load(&self, max: usize) -> Result<Vec<Record>> {
        let after = self.cursor()?.map_or(0, |id| id.0);
        let limit = i64::try_from(max).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, (i64, Vec<u8>)>(
            "SELECT id, payload FROM outbox WHERE id > $1 ORDER BY id LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        count_operation(if rows.is_empty() { "load_empty" } else { "load" });

        let records: Vec<Record> = rows
            .into_iter()
            .map(|(id, payload)| Record {
                id: RecordId(id),
                payload,
            })
            .collect();

        if let Some(last) = records.last() {
            let mut cursor = self.cursor()?;
            if cursor.is_none_or(|current| current < last.id) {
                *cursor = Some(last.id);
            }
        }
        Ok(records)
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?;
        count_operation("delete");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        *self.cursor()? = None;
        count_operation("reset");
        Ok(())
    }
}
