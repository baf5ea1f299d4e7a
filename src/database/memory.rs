//! In-process payment repository used by tests and `SKIP_EXTERNALS` runs.

use crate::database::error::DatabaseError;
use crate::database::payment_repository::{
    accepts_status_write, PageRequest, PaymentFilter, PaymentPage, PaymentRepository,
    PAYMENT_ENTITY,
};
use crate::domain::Payment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn save(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(DatabaseError::duplicate(PAYMENT_ENTITY, payment.id));
        }
        payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn update(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&payment.id)
            .ok_or_else(|| DatabaseError::not_found(PAYMENT_ENTITY, payment.id))?;

        if !accepts_status_write(stored.status, payment.status) {
            return Err(DatabaseError::stale_write(PAYMENT_ENTITY, payment.id));
        }

        stored.status = payment.status;
        if payment.provider_ref.is_some() {
            stored.provider_ref = payment.provider_ref.clone();
        }
        stored.updated_at = stored.updated_at.max(payment.updated_at);
        Ok(stored.clone())
    }

    async fn attach_provider_ref(
        &self,
        id: Uuid,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found(PAYMENT_ENTITY, id))?;
        stored.set_provider_ref(provider_ref, now);
        Ok(stored.clone())
    }

    async fn find_many(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
    ) -> Result<PaymentPage, DatabaseError> {
        let payments = self.payments.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok(PaymentPage::new(items, total, page))
    }
}
