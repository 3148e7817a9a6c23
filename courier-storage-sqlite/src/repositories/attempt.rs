use async_trait::async_trait;
use courier_core::{
    Attempt, AttemptId, AttemptOutcome, Error, FailureKind, MailingId, NewAttempt, OwnerId,
    RecipientId, Reservation, repositories::AttemptRepository,
};
use sqlx::SqlitePool;

use super::{corrupt, from_millis, storage_error};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SqliteAttempt {
    id: String,
    mailing_id: String,
    recipient_id: String,
    recipient_email: String,
    execution: i64,
    outcome: String,
    failure_kind: Option<String>,
    detail: String,
    created_at: i64,
}

impl TryFrom<SqliteAttempt> for Attempt {
    type Error = Error;

    fn try_from(row: SqliteAttempt) -> Result<Self, Self::Error> {
        let outcome = row
            .outcome
            .parse::<AttemptOutcome>()
            .map_err(|e| corrupt("attempt outcome", e))?;
        let failure_kind = match row.failure_kind.as_deref() {
            Some(kind) => Some(
                FailureKind::parse(kind)
                    .ok_or_else(|| corrupt("failure kind", format!("unknown value {kind}")))?,
            ),
            None => None,
        };

        Ok(Attempt {
            id: AttemptId::new(&row.id),
            mailing_id: MailingId::new(&row.mailing_id),
            recipient_id: RecipientId::new(&row.recipient_id),
            recipient_email: row.recipient_email,
            execution: row.execution as u32,
            outcome,
            failure_kind,
            detail: row.detail,
            created_at: from_millis(row.created_at),
        })
    }
}

fn into_attempts(rows: Vec<SqliteAttempt>) -> Result<Vec<Attempt>, Error> {
    rows.into_iter().map(Attempt::try_from).collect()
}

pub struct SqliteAttemptRepository {
    pool: SqlitePool,
}

impl SqliteAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptRepository for SqliteAttemptRepository {
    async fn reserve(&self, reservation: &Reservation) -> Result<bool, Error> {
        // A single statement: insert a fresh reservation, refresh our own, or
        // take over one whose lease ran out. Nothing happens once an attempt
        // for the same (mailing, recipient, execution) exists.
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_reservations
                (mailing_id, recipient_id, execution, holder, reserved_at, lease_until)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6
            WHERE NOT EXISTS (
                SELECT 1 FROM attempts
                WHERE mailing_id = ?1 AND recipient_id = ?2 AND execution = ?3
            )
            ON CONFLICT (mailing_id, recipient_id, execution) DO UPDATE
            SET holder = excluded.holder,
                reserved_at = excluded.reserved_at,
                lease_until = excluded.lease_until
            WHERE dispatch_reservations.holder = excluded.holder
               OR dispatch_reservations.lease_until < excluded.reserved_at
            "#,
        )
        .bind(reservation.mailing_id.as_str())
        .bind(reservation.recipient_id.as_str())
        .bind(reservation.execution as i64)
        .bind(&reservation.holder)
        .bind(reservation.reserved_at.timestamp_millis())
        .bind(reservation.lease_until.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record(&self, attempt: NewAttempt) -> Result<Option<Attempt>, Error> {
        let row = sqlx::query_as::<_, SqliteAttempt>(
            r#"
            INSERT INTO attempts (id, mailing_id, recipient_id, recipient_email, execution,
                                  outcome, failure_kind, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (mailing_id, recipient_id, execution) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(attempt.id.as_str())
        .bind(attempt.mailing_id.as_str())
        .bind(attempt.recipient_id.as_str())
        .bind(&attempt.recipient_email)
        .bind(attempt.execution as i64)
        .bind(attempt.outcome.as_str())
        .bind(attempt.failure_kind.map(|kind| kind.as_str()))
        .bind(&attempt.detail)
        .bind(attempt.created_at.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if row.is_none() {
            tracing::debug!(
                mailing_id = %attempt.mailing_id,
                recipient_id = %attempt.recipient_id,
                execution = attempt.execution,
                "Attempt already recorded"
            );
        }

        row.map(Attempt::try_from).transpose()
    }

    async fn find_by_execution(
        &self,
        mailing_id: &MailingId,
        execution: u32,
    ) -> Result<Vec<Attempt>, Error> {
        let rows = sqlx::query_as::<_, SqliteAttempt>(
            r#"
            SELECT * FROM attempts
            WHERE mailing_id = ?1 AND execution = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(mailing_id.as_str())
        .bind(execution as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        into_attempts(rows)
    }

    async fn find_by_mailing(&self, mailing_id: &MailingId) -> Result<Vec<Attempt>, Error> {
        let rows = sqlx::query_as::<_, SqliteAttempt>(
            "SELECT * FROM attempts WHERE mailing_id = ?1 ORDER BY created_at, id",
        )
        .bind(mailing_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        into_attempts(rows)
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Attempt>, Error> {
        let rows = sqlx::query_as::<_, SqliteAttempt>(
            r#"
            SELECT a.* FROM attempts a
            JOIN mailings m ON m.id = a.mailing_id
            WHERE m.owner_id = ?1
            ORDER BY a.created_at, a.id
            "#,
        )
        .bind(owner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        into_attempts(rows)
    }
}
