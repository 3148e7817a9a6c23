use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Error, FailureReason, Mailing, MailingId, MailingStatus, NewMailing, OwnerId, RecipientId,
    TemplateId,
    repositories::{MailingRepository, StatusChange},
};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{corrupt, from_millis, storage_error};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SqliteMailing {
    id: String,
    template_id: String,
    owner_id: String,
    scheduled_start: i64,
    scheduled_end: i64,
    status: String,
    failure_reason: Option<String>,
    execution: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl SqliteMailing {
    /// Recipient ids live in `mailing_recipients` and are loaded separately.
    fn into_mailing(self, recipient_ids: Vec<RecipientId>) -> Result<Mailing, Error> {
        let status = self
            .status
            .parse::<MailingStatus>()
            .map_err(|e| corrupt("mailing status", e))?;
        let failure_reason = self
            .failure_reason
            .as_deref()
            .map(str::parse::<FailureReason>)
            .transpose()
            .map_err(|e| corrupt("failure reason", e))?;

        Ok(Mailing {
            id: MailingId::new(&self.id),
            template_id: TemplateId::new(&self.template_id),
            recipient_ids,
            owner_id: OwnerId::new(&self.owner_id),
            scheduled_start: from_millis(self.scheduled_start),
            scheduled_end: from_millis(self.scheduled_end),
            status,
            failure_reason,
            execution: self.execution as u32,
            started_at: self.started_at.map(from_millis),
            finished_at: self.finished_at.map(from_millis),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

pub struct SqliteMailingRepository {
    pool: SqlitePool,
}

impl SqliteMailingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn recipient_ids(&self, mailing_id: &str) -> Result<Vec<RecipientId>, Error> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT recipient_id FROM mailing_recipients WHERE mailing_id = ?1 ORDER BY recipient_id",
        )
        .bind(mailing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(ids.iter().map(|id| RecipientId::new(id)).collect())
    }

    async fn hydrate(&self, row: SqliteMailing) -> Result<Mailing, Error> {
        let recipient_ids = self.recipient_ids(&row.id).await?;
        row.into_mailing(recipient_ids)
    }

    async fn ids_matching(&self, sql: &str, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        let ids: Vec<String> = sqlx::query_scalar(sql)
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(ids.iter().map(|id| MailingId::new(id)).collect())
    }
}

async fn insert_recipients(
    tx: &mut Transaction<'_, Sqlite>,
    mailing_id: &MailingId,
    recipient_ids: &[RecipientId],
) -> Result<(), Error> {
    for recipient_id in recipient_ids {
        sqlx::query("INSERT INTO mailing_recipients (mailing_id, recipient_id) VALUES (?1, ?2)")
            .bind(mailing_id.as_str())
            .bind(recipient_id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
    }
    Ok(())
}

#[async_trait]
impl MailingRepository for SqliteMailingRepository {
    async fn create(&self, mailing: NewMailing) -> Result<Mailing, Error> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let row = sqlx::query_as::<_, SqliteMailing>(
            r#"
            INSERT INTO mailings (id, template_id, owner_id, scheduled_start, scheduled_end,
                                  status, execution, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'created', 0, ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(mailing.id.as_str())
        .bind(mailing.template_id.as_str())
        .bind(mailing.owner_id.as_str())
        .bind(mailing.scheduled_start.timestamp_millis())
        .bind(mailing.scheduled_end.timestamp_millis())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        insert_recipients(&mut tx, &mailing.id, &mailing.recipient_ids).await?;
        tx.commit().await.map_err(storage_error)?;

        row.into_mailing(mailing.recipient_ids)
    }

    async fn find_by_id(&self, id: &MailingId) -> Result<Option<Mailing>, Error> {
        let row = sqlx::query_as::<_, SqliteMailing>("SELECT * FROM mailings WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Mailing>, Error> {
        let rows = sqlx::query_as::<_, SqliteMailing>(
            "SELECT * FROM mailings WHERE owner_id = ?1 ORDER BY created_at, id",
        )
        .bind(owner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let links: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT mr.mailing_id, mr.recipient_id
            FROM mailing_recipients mr
            JOIN mailings m ON m.id = mr.mailing_id
            WHERE m.owner_id = ?1
            ORDER BY mr.recipient_id
            "#,
        )
        .bind(owner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut recipients: HashMap<String, Vec<RecipientId>> = HashMap::new();
        for (mailing_id, recipient_id) in links {
            recipients
                .entry(mailing_id)
                .or_default()
                .push(RecipientId::new(&recipient_id));
        }

        rows.into_iter()
            .map(|row| {
                let ids = recipients.remove(&row.id).unwrap_or_default();
                row.into_mailing(ids)
            })
            .collect()
    }

    async fn find_by_status(&self, status: MailingStatus) -> Result<Vec<MailingId>, Error> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM mailings WHERE status = ?1 ORDER BY scheduled_start, id",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(ids.iter().map(|id| MailingId::new(id)).collect())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        self.ids_matching(
            r#"
            SELECT id FROM mailings
            WHERE status = 'scheduled' AND scheduled_start <= ?1 AND scheduled_end >= ?1
            ORDER BY scheduled_start, id
            "#,
            now,
        )
        .await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        self.ids_matching(
            r#"
            SELECT id FROM mailings
            WHERE status = 'scheduled' AND scheduled_end < ?1
            ORDER BY scheduled_end, id
            "#,
            now,
        )
        .await
    }

    async fn status_of(&self, id: &MailingId) -> Result<Option<MailingStatus>, Error> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM mailings WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        status
            .map(|s| s.parse().map_err(|e| corrupt("mailing status", e)))
            .transpose()
    }

    async fn update_definition(&self, mailing: &Mailing) -> Result<Option<Mailing>, Error> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // The status guard and the recipient rewrite commit together, so a
        // concurrent claim sees either the old definition or the new one.
        let row = sqlx::query_as::<_, SqliteMailing>(
            r#"
            UPDATE mailings
            SET template_id = ?2, scheduled_start = ?3, scheduled_end = ?4, updated_at = ?5
            WHERE id = ?1 AND status IN ('created', 'scheduled', 'failed')
            RETURNING *
            "#,
        )
        .bind(mailing.id.as_str())
        .bind(mailing.template_id.as_str())
        .bind(mailing.scheduled_start.timestamp_millis())
        .bind(mailing.scheduled_end.timestamp_millis())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(storage_error)?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM mailing_recipients WHERE mailing_id = ?1")
            .bind(mailing.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        insert_recipients(&mut tx, &mailing.id, &mailing.recipient_ids).await?;
        tx.commit().await.map_err(storage_error)?;

        row.into_mailing(mailing.recipient_ids.clone()).map(Some)
    }

    async fn claim(&self, id: &MailingId, now: DateTime<Utc>) -> Result<Option<Mailing>, Error> {
        let row = sqlx::query_as::<_, SqliteMailing>(
            r#"
            UPDATE mailings
            SET status = 'in_progress', execution = execution + 1, started_at = ?2,
                finished_at = NULL, failure_reason = NULL, updated_at = ?2
            WHERE id = ?1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: &MailingId,
        from: MailingStatus,
        change: StatusChange,
    ) -> Result<Option<Mailing>, Error> {
        let row = sqlx::query_as::<_, SqliteMailing>(
            r#"
            UPDATE mailings
            SET status = ?3, failure_reason = ?4, finished_at = COALESCE(?5, finished_at),
                updated_at = ?6
            WHERE id = ?1 AND status = ?2
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(from.as_str())
        .bind(change.status.as_str())
        .bind(change.failure_reason.map(|r| r.as_str()))
        .bind(change.finished_at.map(|at| at.timestamp_millis()))
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &MailingId) -> Result<bool, Error> {
        // Attempts, reservations and recipient links go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM mailings WHERE id = ?1 AND status != 'in_progress'")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }
}
