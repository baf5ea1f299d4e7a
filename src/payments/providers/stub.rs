use crate::payments::error::PaymentResult;
use crate::payments::provider::ChargeProvider;
use crate::payments::types::{ChargeLookup, ChargeRequest, ChargeResponse, ProviderName};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// Offline provider for local runs: answers every charge with a synthetic
/// reference after a short delay and never reports an outcome.
#[derive(Debug, Clone)]
pub struct StubChargeProvider {
    response_delay: Duration,
}

impl Default for StubChargeProvider {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_millis(100),
        }
    }
}

impl StubChargeProvider {
    pub fn new(response_delay: Duration) -> Self {
        Self { response_delay }
    }
}

#[async_trait]
impl ChargeProvider for StubChargeProvider {
    async fn open_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        request.validate()?;
        tokio::time::sleep(self.response_delay).await;

        let millis = Utc::now().timestamp_millis().unsigned_abs();
        let provider_ref = format!("mp_{:08x}", millis & 0xffff_ffff);
        debug!(provider_ref = %provider_ref, "stub charge opened");

        Ok(ChargeResponse {
            provider_ref,
            provider_data: None,
        })
    }

    async fn charge_status(&self, _external_reference: &str) -> PaymentResult<Option<ChargeLookup>> {
        Ok(None)
    }

    fn name(&self) -> ProviderName {
        ProviderName::Stub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[tokio::test(start_paused = true)]
    async fn stub_returns_reference_and_no_status() {
        let provider = StubChargeProvider::default();
        let response = provider
            .open_charge(ChargeRequest {
                amount: BigDecimal::from(1),
                description: "Order".to_string(),
                idempotency_key: "k1".to_string(),
                tax_id: None,
            })
            .await
            .unwrap();

        assert!(response.provider_ref.starts_with("mp_"));
        assert_eq!(response.provider_ref.len(), 11);
        assert!(provider.charge_status("k1").await.unwrap().is_none());
    }
}
