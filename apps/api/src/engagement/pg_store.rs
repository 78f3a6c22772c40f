use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::engagement::state_machine::{EpisodeEffect, NewAbandonment, Transition};
use crate::engagement::store::{
    AbandonmentFilter, AbandonmentPage, CommitOutcome, EngagementStore, NewContextSwitch,
    NewDistraction, StoreError,
};
use crate::models::abandonment::TaskAbandonmentRow;
use crate::models::context_switch::ContextSwitchRow;
use crate::models::distraction::DistractionLogRow;
use crate::models::task::TaskRow;

const TASK_COLUMNS: &str = "id, user_id, title, status, category, focus_difficulty, deadline, \
     is_abandoned, last_active_at, last_focus_at, abandonment_count, distraction_count, \
     created_at, updated_at";

/// PostgreSQL-backed engagement store.
///
/// Each transition runs in its own transaction: the guarded `UPDATE tasks`
/// decides the race (row-level lock plus re-evaluated `WHERE`), and the
/// episode write only happens when that update returned a row.
#[derive(Clone)]
pub struct PgEngagementStore {
    pool: PgPool,
}

impl PgEngagementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngagementStore for PgEngagementStore {
    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn sweep_candidates(&self, idle_before: DateTime<Utc>) -> Result<Vec<TaskRow>, StoreError> {
        Ok(sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE status = 'in_progress'
              AND is_abandoned = FALSE
              AND last_active_at IS NOT NULL
              AND last_active_at < $1
            ORDER BY last_active_at ASC
            "#
        ))
        .bind(idle_before)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn abandoned_tasks(&self, user_id: Uuid) -> Result<Vec<TaskRow>, StoreError> {
        Ok(sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = $1 AND is_abandoned = TRUE ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn commit(&self, transition: &Transition) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let guard = &transition.guard;
        let write = &transition.write;

        let task: Option<TaskRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tasks SET
                status = COALESCE($2, status),
                is_abandoned = COALESCE($3, is_abandoned),
                last_active_at = GREATEST(last_active_at, $4),
                last_focus_at = COALESCE($5, last_focus_at),
                abandonment_count = abandonment_count + $6,
                updated_at = NOW()
            WHERE id = $1
              AND ($7::TEXT IS NULL OR status = $7)
              AND ($8::BOOLEAN IS NULL OR is_abandoned = $8)
              AND ($9::TIMESTAMPTZ IS NULL OR last_active_at = $9)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(transition.task_id)
        .bind(write.status.map(|s| s.as_str()))
        .bind(write.is_abandoned)
        .bind(write.last_active_at)
        .bind(write.last_focus_at)
        .bind(write.abandonment_increment)
        .bind(guard.status.map(|s| s.as_str()))
        .bind(guard.is_abandoned)
        .bind(guard.last_active_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = task else {
            tx.rollback().await?;
            debug!("Conditional write rejected for task {}", transition.task_id);
            return Ok(CommitOutcome::Rejected);
        };

        let episode = match &transition.episode {
            EpisodeEffect::None => None,
            EpisodeEffect::Open(new) => Some(insert_abandonment(&mut tx, new).await?),
            EpisodeEffect::Resume { at } => {
                sqlx::query_as::<_, TaskAbandonmentRow>(
                    r#"
                    UPDATE task_abandonments SET resumed = TRUE, resumed_at = $2
                    WHERE id = (
                        SELECT id FROM task_abandonments
                        WHERE task_id = $1 AND resumed = FALSE AND closed_at IS NULL
                        ORDER BY abandoned_at DESC
                        LIMIT 1
                    )
                    RETURNING *
                    "#,
                )
                .bind(transition.task_id)
                .bind(at)
                .fetch_optional(&mut *tx)
                .await?
            }
            EpisodeEffect::Close { at } => {
                sqlx::query_as::<_, TaskAbandonmentRow>(
                    r#"
                    UPDATE task_abandonments SET closed_at = $2
                    WHERE task_id = $1 AND resumed = FALSE AND closed_at IS NULL
                    RETURNING *
                    "#,
                )
                .bind(transition.task_id)
                .bind(at)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(CommitOutcome::Applied { task, episode })
    }

    async fn open_abandonment(&self, task_id: Uuid) -> Result<Option<TaskAbandonmentRow>, StoreError> {
        Ok(sqlx::query_as::<_, TaskAbandonmentRow>(
            r#"
            SELECT * FROM task_abandonments
            WHERE task_id = $1 AND resumed = FALSE AND closed_at IS NULL
            ORDER BY abandoned_at DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn task_abandonments(&self, task_id: Uuid) -> Result<Vec<TaskAbandonmentRow>, StoreError> {
        Ok(sqlx::query_as::<_, TaskAbandonmentRow>(
            "SELECT * FROM task_abandonments WHERE task_id = $1 ORDER BY abandoned_at DESC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn user_abandonments(
        &self,
        user_id: Uuid,
        filter: &AbandonmentFilter,
    ) -> Result<AbandonmentPage, StoreError> {
        let kind = filter.abandonment_type.map(|t| t.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM task_abandonments
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR abandonment_type = $2)
              AND ($3::BOOLEAN IS NULL OR resumed = $3)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(filter.resumed)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, TaskAbandonmentRow>(
            r#"
            SELECT * FROM task_abandonments
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR abandonment_type = $2)
              AND ($3::BOOLEAN IS NULL OR resumed = $3)
            ORDER BY abandoned_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(filter.resumed)
        .bind(i64::from(filter.per_page()))
        .bind(i64::from(filter.offset()))
        .fetch_all(&self.pool)
        .await?;

        Ok(AbandonmentPage { items, total })
    }

    async fn abandonments_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<TaskAbandonmentRow>, StoreError> {
        Ok(sqlx::query_as::<_, TaskAbandonmentRow>(
            "SELECT * FROM task_abandonments WHERE user_id = $1 AND abandoned_at >= $2 ORDER BY abandoned_at DESC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_context_switch(
        &self,
        record: &NewContextSwitch,
    ) -> Result<ContextSwitchRow, StoreError> {
        Ok(sqlx::query_as::<_, ContextSwitchRow>(
            r#"
            INSERT INTO context_switches
                (id, user_id, from_task_id, from_category, from_focus_difficulty,
                 to_task_id, to_category, to_focus_difficulty,
                 is_significant_switch, estimated_cost_minutes, user_proceeded, user_note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(record.from_task_id)
        .bind(&record.from_category)
        .bind(record.from_focus_difficulty)
        .bind(record.to_task_id)
        .bind(&record.to_category)
        .bind(record.to_focus_difficulty)
        .bind(record.is_significant_switch)
        .bind(record.estimated_cost_minutes)
        .bind(record.user_proceeded)
        .bind(&record.user_note)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn context_switches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContextSwitchRow>, StoreError> {
        Ok(sqlx::query_as::<_, ContextSwitchRow>(
            "SELECT * FROM context_switches WHERE user_id = $1 AND created_at >= $2 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_distraction(
        &self,
        record: &NewDistraction,
    ) -> Result<DistractionLogRow, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DistractionLogRow>(
            r#"
            INSERT INTO distraction_logs
                (id, user_id, task_id, focus_session_id, distraction_type,
                 duration_seconds, notes, occurred_at, time_of_day)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(record.task_id)
        .bind(record.focus_session_id)
        .bind(record.distraction_type.as_str())
        .bind(record.duration_seconds)
        .bind(&record.notes)
        .bind(record.occurred_at)
        .bind(record.time_of_day)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE tasks SET distraction_count = distraction_count + 1 WHERE id = $1")
            .bind(record.task_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn task_distractions(
        &self,
        task_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<DistractionLogRow>, StoreError> {
        Ok(sqlx::query_as::<_, DistractionLogRow>(
            "SELECT * FROM distraction_logs WHERE task_id = $1 AND user_id = $2 ORDER BY occurred_at DESC",
        )
        .bind(task_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn distractions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<DistractionLogRow>, StoreError> {
        Ok(sqlx::query_as::<_, DistractionLogRow>(
            "SELECT * FROM distraction_logs WHERE user_id = $1 AND occurred_at >= $2 ORDER BY occurred_at DESC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }
}

async fn insert_abandonment(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewAbandonment,
) -> Result<TaskAbandonmentRow, StoreError> {
    Ok(sqlx::query_as::<_, TaskAbandonmentRow>(
        r#"
        INSERT INTO task_abandonments
            (id, user_id, task_id, focus_session_id, started_at, last_active_at,
             abandoned_at, duration_minutes, abandonment_type, inactivity_minutes,
             auto_detected, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.user_id)
    .bind(new.task_id)
    .bind(new.focus_session_id)
    .bind(new.started_at)
    .bind(new.last_active_at)
    .bind(new.abandoned_at)
    .bind(new.duration_minutes)
    .bind(new.abandonment_type.as_str())
    .bind(new.inactivity_minutes)
    .bind(new.auto_detected)
    .bind(&new.reason)
    .fetch_one(&mut **tx)
    .await?)
}
