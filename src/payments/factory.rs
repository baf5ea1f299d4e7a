use crate::payments::error::PaymentResult;
use crate::payments::provider::ChargeProvider;
use crate::payments::providers::{MercadoPagoConfig, MercadoPagoProvider, StubChargeProvider};
use crate::payments::types::ProviderName;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ProviderFactoryConfig {
    pub provider: ProviderName,
    pub mercado_pago: MercadoPagoConfig,
}

impl ProviderFactoryConfig {
    /// `PAYMENT_PROVIDER` selects the adapter (`mercado_pago` by default).
    pub fn from_env() -> PaymentResult<Self> {
        let provider = std::env::var("PAYMENT_PROVIDER")
            .unwrap_or_else(|_| "mercado_pago".to_string());
        let provider = ProviderName::from_str(&provider)?;

        let mercado_pago = match provider {
            ProviderName::MercadoPago => MercadoPagoConfig::from_env()?,
            ProviderName::Stub => MercadoPagoConfig::default(),
        };

        Ok(Self {
            provider,
            mercado_pago,
        })
    }
}

pub struct ChargeProviderFactory;

impl ChargeProviderFactory {
    pub fn build(config: &ProviderFactoryConfig) -> PaymentResult<Arc<dyn ChargeProvider>> {
        let provider: Arc<dyn ChargeProvider> = match config.provider {
            ProviderName::MercadoPago => {
                Arc::new(MercadoPagoProvider::new(config.mercado_pago.clone())?)
            }
            ProviderName::Stub => Arc::new(StubChargeProvider::default()),
        };
        info!(provider = %provider.name(), "charge provider ready");
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_selected_provider() {
        let stub = ChargeProviderFactory::build(&ProviderFactoryConfig {
            provider: ProviderName::Stub,
            mercado_pago: MercadoPagoConfig::default(),
        })
        .unwrap();
        assert_eq!(stub.name(), ProviderName::Stub);

        let live = ChargeProviderFactory::build(&ProviderFactoryConfig {
            provider: ProviderName::MercadoPago,
            mercado_pago: MercadoPagoConfig {
                access_token: "token".to_string(),
                ..MercadoPagoConfig::default()
            },
        })
        .unwrap();
        assert_eq!(live.name(), ProviderName::MercadoPago);
    }
}
