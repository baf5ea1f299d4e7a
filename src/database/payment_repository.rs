//! Payment persistence port and its Postgres adapter.

use crate::database::error::DatabaseError;
use crate::domain::{Payment, PaymentMethod, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PAYMENT_ENTITY: &str = "Payment";
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Optional listing filters; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub tax_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.tax_id
            .as_deref()
            .map_or(true, |t| payment.tax_id.as_str() == t)
            && self.method.map_or(true, |m| payment.method == m)
            && self.status.map_or(true, |s| payment.status == s)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn is_valid(&self) -> bool {
        self.page >= 1 && (1..=MAX_PAGE_LIMIT).contains(&self.limit)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPage {
    pub items: Vec<Payment>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl PaymentPage {
    pub fn new(items: Vec<Payment>, total: u64, request: PageRequest) -> Self {
        let limit = u64::from(request.limit.max(1));
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Persistence capability for the payment aggregate.
///
/// `save` rejects an existing id with a `Duplicate` error. `update` writes the
/// status only; it rejects a write that would move a row out of a terminal
/// status (`StaleWrite`), which serializes concurrent finalizers on the same
/// payment. A stored `provider_ref` survives any `update` whose copy lacks one.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn save(&self, payment: &Payment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn update(&self, payment: &Payment) -> Result<Payment, DatabaseError>;

    /// Set `provider_ref` without touching the status.
    async fn attach_provider_ref(
        &self,
        id: Uuid,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, DatabaseError>;

    /// Newest first.
    async fn find_many(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<PaymentPage, DatabaseError>;
}

/// Whether a stored row in `current` may be overwritten with `next`.
pub(crate) fn accepts_status_write(current: PaymentStatus, next: PaymentStatus) -> bool {
    current == PaymentStatus::Pending || current == next
}

#[cfg(feature = "database")]
pub use pg::PgPaymentRepository;

#[cfg(feature = "database")]
mod pg {
    use super::*;
    use crate::database::error::DatabaseErrorKind;
    use crate::domain::TaxId;
    use sqlx::types::BigDecimal;
    use sqlx::{FromRow, PgPool};
    use std::str::FromStr;

    const PAYMENT_COLUMNS: &str =
        "id, tax_id, description, amount, method, status, provider_ref, created_at, updated_at";

    #[derive(Debug, Clone, FromRow)]
    struct PaymentRow {
        id: Uuid,
        tax_id: String,
        description: String,
        amount: BigDecimal,
        method: String,
        status: String,
        provider_ref: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<PaymentRow> for Payment {
        type Error = DatabaseError;

        fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
            let corrupt = |message: String| {
                DatabaseError::new(DatabaseErrorKind::SerializationError { message })
            };

            Ok(Payment {
                id: row.id,
                tax_id: TaxId::parse(&row.tax_id)
                    .map_err(|e| corrupt(format!("payment {}: {}", row.id, e)))?,
                description: row.description,
                amount: row.amount,
                method: PaymentMethod::from_str(&row.method).map_err(corrupt)?,
                status: PaymentStatus::from_str(&row.status).map_err(corrupt)?,
                provider_ref: row.provider_ref,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        }
    }

    /// Postgres-backed payment repository
    #[derive(Clone)]
    pub struct PgPaymentRepository {
        pool: PgPool,
    }

    impl PgPaymentRepository {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl PaymentRepository for PgPaymentRepository {
        async fn save(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
            let row = sqlx::query_as::<_, PaymentRow>(&format!(
                "INSERT INTO payments
                 (id, tax_id, description, amount, method, status, provider_ref, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING {}",
                PAYMENT_COLUMNS
            ))
            .bind(payment.id)
            .bind(payment.tax_id.as_str())
            .bind(&payment.description)
            .bind(&payment.amount)
            .bind(payment.method.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.provider_ref)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match DatabaseError::from_sqlx(e) {
                DatabaseError {
                    kind: DatabaseErrorKind::Duplicate { .. },
                } => DatabaseError::duplicate(PAYMENT_ENTITY, payment.id),
                other => other,
            })?;

            Payment::try_from(row)
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
            sqlx::query_as::<_, PaymentRow>(&format!(
                "SELECT {} FROM payments WHERE id = $1",
                PAYMENT_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
        }

        async fn update(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
            let updated = sqlx::query_as::<_, PaymentRow>(&format!(
                "UPDATE payments
                 SET status = $2,
                     provider_ref = COALESCE($3, provider_ref),
                     updated_at = GREATEST(updated_at, $4)
                 WHERE id = $1 AND (status = 'PENDING' OR status = $2)
                 RETURNING {}",
                PAYMENT_COLUMNS
            ))
            .bind(payment.id)
            .bind(payment.status.as_str())
            .bind(&payment.provider_ref)
            .bind(payment.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            match updated {
                Some(row) => Payment::try_from(row),
                None => match self.find_by_id(payment.id).await? {
                    Some(_) => Err(DatabaseError::stale_write(PAYMENT_ENTITY, payment.id)),
                    None => Err(DatabaseError::not_found(PAYMENT_ENTITY, payment.id)),
                },
            }
        }

        async fn attach_provider_ref(
            &self,
            id: Uuid,
            provider_ref: &str,
            now: DateTime<Utc>,
        ) -> Result<Payment, DatabaseError> {
            sqlx::query_as::<_, PaymentRow>(&format!(
                "UPDATE payments
                 SET updated_at = CASE WHEN provider_ref IS DISTINCT FROM $2
                                       THEN $3 ELSE updated_at END,
                     provider_ref = $2
                 WHERE id = $1
                 RETURNING {}",
                PAYMENT_COLUMNS
            ))
            .bind(id)
            .bind(provider_ref)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()?
            .ok_or_else(|| DatabaseError::not_found(PAYMENT_ENTITY, id))
        }

        async fn find_many(
            &self,
            filter: &PaymentFilter,
            page: PageRequest,
        ) -> Result<PaymentPage, DatabaseError> {
            const WHERE_CLAUSE: &str = "WHERE ($1::text IS NULL OR tax_id = $1)
                   AND ($2::text IS NULL OR method = $2)
                   AND ($3::text IS NULL OR status = $3)";

            let method = filter.method.map(|m| m.as_str());
            let status = filter.status.map(|s| s.as_str());

            let total: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM payments {}", WHERE_CLAUSE))
                    .bind(filter.tax_id.as_deref())
                    .bind(method)
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;

            let rows = sqlx::query_as::<_, PaymentRow>(&format!(
                "SELECT {} FROM payments {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
                PAYMENT_COLUMNS, WHERE_CLAUSE
            ))
            .bind(filter.tax_id.as_deref())
            .bind(method)
            .bind(status)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            let items = rows
                .into_iter()
                .map(Payment::try_from)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(PaymentPage::new(items, total.max(0) as u64, page))
        }
    }
}
