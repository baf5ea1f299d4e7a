use crate::domain::SENTINEL_TAX_ID;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::ChargeProvider;
use crate::payments::retry::{retry_with_backoff, RetryPolicy};
use crate::payments::types::{
    map_provider_status, ChargeLookup, ChargeRequest, ChargeResponse, ProviderName,
};
use crate::payments::utils::ProviderHttpClient;
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub base_url: String,
    pub currency: String,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Total attempts per call
    pub max_retries: u32,
    /// First backoff delay; doubles after each failed attempt
    pub backoff_base_ms: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: "https://api.mercadopago.com".to_string(),
            currency: "BRL".to_string(),
            timeout_ms: 3000,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl MercadoPagoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let access_token =
            std::env::var("PROVIDER_ACCESS_TOKEN").map_err(|_| PaymentError::ValidationError {
                message: "PROVIDER_ACCESS_TOKEN environment variable is required".to_string(),
                field: Some("PROVIDER_ACCESS_TOKEN".to_string()),
            })?;

        let defaults = Self::default();
        Ok(Self {
            access_token,
            base_url: std::env::var("PROVIDER_BASE_URL").unwrap_or(defaults.base_url),
            currency: std::env::var("PROVIDER_CURRENCY").unwrap_or(defaults.currency),
            timeout_ms: std::env::var("PROVIDER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_ms),
            max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            backoff_base_ms: std::env::var("PROVIDER_BACKOFF_BASE_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.backoff_base_ms),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            attempt_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

pub struct MercadoPagoProvider {
    config: MercadoPagoConfig,
    http: ProviderHttpClient,
    retry: RetryPolicy,
}

impl MercadoPagoProvider {
    pub fn new(config: MercadoPagoConfig) -> PaymentResult<Self> {
        let http = ProviderHttpClient::new(
            ProviderName::MercadoPago.as_str(),
            Duration::from_millis(config.timeout_ms),
        )?;
        let retry = config.retry_policy();
        Ok(Self {
            config,
            http,
            retry,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn preference_payload(&self, request: &ChargeRequest) -> PaymentResult<JsonValue> {
        let unit_price = request
            .amount
            .to_f64()
            .filter(|price| price.is_finite())
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("amount {} cannot be sent as a unit price", request.amount),
                field: Some("amount".to_string()),
            })?;
        let payer_id = request
            .tax_id
            .as_ref()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| SENTINEL_TAX_ID.to_string());

        Ok(serde_json::json!({
            "items": [{
                "id": format!("payment-{}", Utc::now().timestamp_millis()),
                "title": request.description,
                "description": request.description,
                "quantity": 1,
                "currency_id": self.config.currency,
                "unit_price": unit_price,
            }],
            "payer": {
                "identification": {
                    "type": "CPF",
                    "number": payer_id,
                }
            },
            "payment_methods": {
                "excluded_payment_types": [{ "id": "ticket" }],
                "installments": 12,
                "default_installments": 1,
            },
            "external_reference": request.idempotency_key,
            "expires": false,
        }))
    }
}

#[async_trait]
impl ChargeProvider for MercadoPagoProvider {
    async fn open_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        request.validate()?;

        let payload = self.preference_payload(&request)?;
        let url = self.endpoint("/checkout/preferences");
        let headers = [
            ("Content-Type", "application/json"),
            ("X-Idempotency-Key", request.idempotency_key.as_str()),
        ];

        let result = retry_with_backoff(&self.retry, "open_charge", |attempt| {
            info!(
                attempt,
                max_attempts = self.retry.max_attempts,
                "creating provider preference"
            );
            self.http.request_json::<PreferenceResponse>(
                reqwest::Method::POST,
                &url,
                Some(&self.config.access_token),
                Some(&payload),
                &headers,
            )
        })
        .await;

        match result {
            Ok(preference) => {
                info!(provider_ref = %preference.id, "provider preference created");
                Ok(ChargeResponse {
                    provider_ref: preference.id,
                    provider_data: preference.init_point.map(|url| {
                        serde_json::json!({ "init_point": url })
                    }),
                })
            }
            Err(e) => {
                error!(error = %e, "provider preference creation failed");
                Err(e)
            }
        }
    }

    async fn charge_status(&self, external_reference: &str) -> PaymentResult<Option<ChargeLookup>> {
        let url = reqwest::Url::parse_with_params(
            &self.endpoint("/v1/payments/search"),
            &[
                ("external_reference", external_reference),
                ("sort", "date_created"),
                ("criteria", "desc"),
            ],
        )
        .map_err(|e| PaymentError::ValidationError {
            message: format!("invalid provider search URL: {}", e),
            field: Some("base_url".to_string()),
        })?;

        let search: PaymentSearchResponse = retry_with_backoff(&self.retry, "charge_status", |_| {
            self.http.request_json(
                reqwest::Method::GET,
                url.as_str(),
                Some(&self.config.access_token),
                None,
                &[],
            )
        })
        .await?;

        Ok(search.results.into_iter().next().map(|payment| ChargeLookup {
            status: map_provider_status(&payment.status),
            provider_status: payment.status,
            provider_payment_id: payment.id.map(|id| match id {
                JsonValue::String(s) => s,
                other => other.to_string(),
            }),
        }))
    }

    fn name(&self) -> ProviderName {
        ProviderName::MercadoPago
    }
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    #[serde(default)]
    init_point: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentSearchResponse {
    #[serde(default)]
    results: Vec<SearchedPayment>,
}

#[derive(Debug, Deserialize)]
struct SearchedPayment {
    #[serde(default)]
    id: Option<JsonValue>,
    status: String,
}
