use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{Repository, TransactionalRepository};
use crate::settlement::store::{
    FailureRecord, PaymentPage, PaymentSearchFilter, PaymentStatistics, PendingBacklog,
    PendingPaymentStore,
};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Pending payment entity: the durable record of a payment intent and its
/// settlement lifecycle. Source of truth for settlement status.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PendingPayment {
    pub id: Uuid,
    pub intent_id: String,
    pub order_id: String,
    pub order_code: String,
    pub amount: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub failure_type: Option<String>,
    pub is_retryable: Option<bool>,
    pub retry_count: i32,
    pub manual_settlement: bool,
    pub settled_by: Option<String>,
    pub canceled_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the active settlement attempt took the `settling` claim
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub settled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failed_at: Option<chrono::DateTime<chrono::Utc>>,
}

const COLUMNS: &str = "id, intent_id, order_id, order_code, amount, currency, customer_email, \
     status, failure_reason, failure_type, is_retryable, retry_count, \
     manual_settlement, settled_by, canceled_by, created_at, claimed_at, settled_at, failed_at";

#[derive(Debug, FromRow)]
struct StatisticsRow {
    total: i64,
    pending: i64,
    settled: i64,
    failed: i64,
    retryable_failed: i64,
    average_amount: Option<f64>,
}

#[derive(Debug, FromRow)]
struct BacklogRow {
    pending_count: i64,
    oldest_pending_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Repository for the pending-payment ledger
pub struct PendingPaymentRepository {
    pool: PgPool,
}

impl PendingPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn apply_filter<'a>(
        builder: &mut QueryBuilder<'a, Postgres>,
        filter: &'a PaymentSearchFilter,
    ) {
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.to_db_status());
        }
        if let Some(order_code) = &filter.order_code {
            builder.push(" AND order_code ILIKE ");
            builder.push_bind(format!("%{}%", order_code));
        }
        if let Some(after) = filter.created_after {
            builder.push(" AND created_at >= ");
            builder.push_bind(after);
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at <= ");
            builder.push_bind(before);
        }
        if let Some(retryable) = filter.is_retryable {
            builder.push(" AND is_retryable = ");
            builder.push_bind(retryable);
        }
    }
}

#[async_trait]
impl PendingPaymentStore for PendingPaymentRepository {
    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM pending_payments WHERE intent_id = $1");
        sqlx::query_as::<_, PendingPayment>(&sql)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn claim_for_settlement(&self, intent_id: &str) -> Result<bool, DatabaseError> {
        // Exactly one concurrent caller can win this update.
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'settling', claimed_at = NOW() \
             WHERE intent_id = $1 AND status = 'pending'",
        )
        .bind(intent_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, intent_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'pending', claimed_at = NULL \
             WHERE intent_id = $1 AND status = 'settling'",
        )
        .bind(intent_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_stale_claims(&self, older_than_secs: i64) -> Result<u64, DatabaseError> {
        // COALESCE covers rows claimed before claimed_at was recorded.
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'pending', claimed_at = NULL \
             WHERE status = 'settling' \
               AND COALESCE(claimed_at, created_at) < NOW() - INTERVAL '1 second' * $1",
        )
        .bind(older_than_secs)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn mark_settled(
        &self,
        intent_id: &str,
        settled_by: Option<&str>,
        manual: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'settled', settled_at = NOW(), settled_by = $2, \
                 manual_settlement = $3, claimed_at = NULL \
             WHERE intent_id = $1 AND status = 'settling'",
        )
        .bind(intent_id)
        .bind(settled_by)
        .bind(manual)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        intent_id: &str,
        failure: &FailureRecord,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'failed', failure_reason = $2, failure_type = $3, \
                 is_retryable = $4, failed_at = NOW(), claimed_at = NULL \
             WHERE intent_id = $1 AND status IN ('pending', 'settling')",
        )
        .bind(intent_id)
        .bind(&failure.reason)
        .bind(failure.failure_type.as_str())
        .bind(failure.is_retryable)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_canceled(
        &self,
        intent_id: &str,
        reason: &str,
        canceled_by: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE pending_payments \
             SET status = 'failed', failure_reason = $2, failure_type = 'user_error', \
                 is_retryable = false, failed_at = NOW(), claimed_at = NULL, canceled_by = $3 \
             WHERE intent_id = $1 AND status IN ('pending', 'settling', 'failed')",
        )
        .bind(intent_id)
        .bind(reason)
        .bind(canceled_by)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_for_retry(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError> {
        let sql = format!(
            "UPDATE pending_payments \
             SET status = 'pending', failure_reason = NULL, failure_type = NULL, \
                 is_retryable = NULL, failed_at = NULL, claimed_at = NULL, \
                 retry_count = retry_count + 1 \
             WHERE intent_id = $1 AND status = 'failed' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingPayment>(&sql)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn search(&self, filter: &PaymentSearchFilter) -> Result<PaymentPage, DatabaseError> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM pending_payments WHERE 1=1");
        Self::apply_filter(&mut count_builder, filter);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM pending_payments WHERE 1=1"
        ));
        Self::apply_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(filter.limit);
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset);

        let items = builder
            .build_query_as::<PendingPayment>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(PaymentPage { items, total })
    }

    async fn statistics(&self) -> Result<PaymentStatistics, DatabaseError> {
        let row = sqlx::query_as::<_, StatisticsRow>(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status IN ('pending', 'settling')) AS pending, \
                    COUNT(*) FILTER (WHERE status = 'settled') AS settled, \
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed, \
                    COUNT(*) FILTER (WHERE status = 'failed' AND is_retryable = true) \
                        AS retryable_failed, \
                    AVG(amount)::float8 AS average_amount \
             FROM pending_payments",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(PaymentStatistics {
            total: row.total,
            pending: row.pending,
            settled: row.settled,
            failed: row.failed,
            retryable_failed: row.retryable_failed,
            average_amount: row.average_amount,
        })
    }

    async fn backlog(&self) -> Result<PendingBacklog, DatabaseError> {
        let row = sqlx::query_as::<_, BacklogRow>(
            "SELECT COUNT(*) AS pending_count, MIN(created_at) AS oldest_pending_at \
             FROM pending_payments \
             WHERE status IN ('pending', 'settling')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(PendingBacklog {
            pending_count: row.pending_count,
            oldest_pending_at: row.oldest_pending_at,
        })
    }

    async fn cleanup_old_failed(&self, older_than_days: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM pending_payments \
             WHERE status = 'failed' \
               AND COALESCE(is_retryable, false) = false \
               AND failed_at < NOW() - INTERVAL '1 day' * $1",
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Repository for PendingPaymentRepository {
    type Entity = PendingPayment;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;
        let sql = format!("SELECT {COLUMNS} FROM pending_payments WHERE id = $1");
        sqlx::query_as::<_, PendingPayment>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM pending_payments ORDER BY created_at DESC");
        sqlx::query_as::<_, PendingPayment>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let uuid = Uuid::parse_str(id).map_err(|e| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("Invalid UUID: {}", e),
            })
        })?;
        let result = sqlx::query("DELETE FROM pending_payments WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

impl TransactionalRepository for PendingPaymentRepository {
    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
