use crate::payments::error::PaymentResult;
use crate::payments::types::{ChargeLookup, ChargeRequest, ChargeResponse, ProviderName};
use async_trait::async_trait;

/// External processor that opens card charges and reports their outcome.
#[async_trait]
pub trait ChargeProvider: Send + Sync {
    /// Open a charge. Implementations own their retry and timeout policy and
    /// fail with `ProviderUnavailable` once it is exhausted.
    async fn open_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse>;

    /// Look up the latest charge status by the external reference sent with
    /// `open_charge`. `None` when the provider has no payment for it yet.
    async fn charge_status(&self, external_reference: &str) -> PaymentResult<Option<ChargeLookup>>;

    fn name(&self) -> ProviderName;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaymentStatus;
    use bigdecimal::BigDecimal;
    use std::sync::Arc;

    struct MockProvider;

    #[async_trait]
    impl ChargeProvider for MockProvider {
        async fn open_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
            Ok(ChargeResponse {
                provider_ref: format!("pref-{}", request.idempotency_key),
                provider_data: None,
            })
        }

        async fn charge_status(
            &self,
            external_reference: &str,
        ) -> PaymentResult<Option<ChargeLookup>> {
            Ok(Some(ChargeLookup {
                status: PaymentStatus::Settled,
                provider_status: "approved".to_string(),
                provider_payment_id: Some(format!("pay-{}", external_reference)),
            }))
        }

        fn name(&self) -> ProviderName {
            ProviderName::MercadoPago
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch() {
        let provider: Arc<dyn ChargeProvider> = Arc::new(MockProvider);

        let response = provider
            .open_charge(ChargeRequest {
                amount: BigDecimal::from(10),
                description: "Order".to_string(),
                idempotency_key: "k1".to_string(),
                tax_id: None,
            })
            .await
            .unwrap();
        assert_eq!(response.provider_ref, "pref-k1");

        let lookup = provider.charge_status("k1").await.unwrap().unwrap();
        assert_eq!(lookup.status, PaymentStatus::Settled);
        assert_eq!(provider.name(), ProviderName::MercadoPago);
    }
}
