//! The schedule store capability and its Postgres implementation.

use crate::errors::EnqueueError;
use crate::schema::{NewScheduleItem, RetryDecision, ScheduleItem, ScheduleStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::future::Future;

/// Persistence operations consumed by the worker and schedulers.
///
/// The store exclusively owns `ScheduleItem` rows; nothing else mutates
/// them. Implementations must make `increment_retry_count` atomic.
pub trait ScheduleStore: Send + Sync + 'static {
    /// Insert a batch of items sharing `batch_id`, returning the stored rows.
    fn add_schedule_items(
        &self,
        batch_id: &str,
        items: &[NewScheduleItem],
    ) -> impl Future<Output = Result<Vec<ScheduleItem>, EnqueueError>> + Send;

    /// All rows with `status = pending`, regardless of due time.
    fn get_pending_schedule(
        &self,
    ) -> impl Future<Output = Result<Vec<ScheduleItem>, sqlx::Error>> + Send;

    /// All rows with `status = pending` and `send_at <= now()`, in one
    /// unpaginated read.
    fn get_due_schedule_items(
        &self,
    ) -> impl Future<Output = Result<Vec<ScheduleItem>, sqlx::Error>> + Send;

    /// Write back an item's status, failure text, and sent timestamp.
    fn update_schedule_status(
        &self,
        id: i64,
        status: ScheduleStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Atomically bump an item's retry counter and report whether another
    /// attempt is allowed under `max_retries`.
    fn increment_retry_count(
        &self,
        id: i64,
        max_retries: i32,
    ) -> impl Future<Output = Result<RetryDecision, sqlx::Error>> + Send;

    /// Delete every terminal (`sent` or `failed`) row, returning the count.
    fn clear_finished_schedule(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Number of rows currently pending.
    fn pending_count(&self) -> impl Future<Output = Result<i64, sqlx::Error>> + Send;
}

/// Runs the bundled migrations, creating the `schedule_items` table.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Postgres-backed [`ScheduleStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, e.g. for [`setup_database`].
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ScheduleStore for PgStore {
    async fn add_schedule_items(
        &self,
        batch_id: &str,
        items: &[NewScheduleItem],
    ) -> Result<Vec<ScheduleItem>, EnqueueError> {
        if items.is_empty() {
            return Err(EnqueueError::EmptyBatch);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, ScheduleItem>(
                r"
                INSERT INTO schedule_items
                    (batch_id, recipient, caption, media_url, media_type, send_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                ",
            )
            .bind(batch_id)
            .bind(&item.recipient)
            .bind(&item.caption)
            .bind(&item.media_url)
            .bind(&item.media_type)
            .bind(item.send_at)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn get_pending_schedule(&self) -> Result<Vec<ScheduleItem>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleItem>(
            "SELECT * FROM schedule_items WHERE status = 'pending' ORDER BY send_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn get_due_schedule_items(&self) -> Result<Vec<ScheduleItem>, sqlx::Error> {
        sqlx::query_as::<_, ScheduleItem>(
            r"
            SELECT * FROM schedule_items
            WHERE status = 'pending' AND send_at <= NOW()
            ORDER BY send_at ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn update_schedule_status(
        &self,
        id: i64,
        status: ScheduleStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE schedule_items SET status = $2, error = $3, sent_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_retry_count(
        &self,
        id: i64,
        max_retries: i32,
    ) -> Result<RetryDecision, sqlx::Error> {
        let retry_count = sqlx::query_scalar::<_, i32>(
            "UPDATE schedule_items SET retry_count = retry_count + 1 WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(RetryDecision {
            should_retry: retry_count <= max_retries,
            retry_count,
            // Items become due again on the next poll tick; no extra delay.
            next_retry_at: Utc::now(),
        })
    }

    async fn clear_finished_schedule(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM schedule_items WHERE status IN ('sent', 'failed')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM schedule_items WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
    }
}
