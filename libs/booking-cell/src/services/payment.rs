// libs/booking-cell/src/services/payment.rs
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{BookingError, PaymentOrder, PaymentWebhookPayload};

type HmacSha256 = Hmac<Sha256>;

/// External payment collaborator: outbound order creation keyed to a
/// booking, and verification of the gateway's signed webhook callbacks.
pub struct PaymentGatewayService {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_secret: String,
}

impl PaymentGatewayService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.payment_gateway_url.clone(),
            api_key: config.payment_gateway_api_key.clone(),
            webhook_secret: config.payment_webhook_secret.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }

    /// Create a payment order referencing the booking. Pricing and currency
    /// live in the gateway's own configuration for the merchant account.
    pub async fn create_order(&self, booking_id: Uuid) -> Result<PaymentOrder, BookingError> {
        debug!("Creating payment order for booking {}", booking_id);

        let url = format!("{}/v1/orders", self.base_url);
        let body = json!({
            "reference": booking_id,
        });

        let response = self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BookingError::PaymentError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Payment gateway error ({}): {}", status, error_text);
            return Err(BookingError::PaymentError(
                format!("Gateway returned {}", status)
            ));
        }

        let order: Value = response.json().await
            .map_err(|e| BookingError::PaymentError(e.to_string()))?;

        let order_id = order.get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BookingError::PaymentError("Gateway response missing order_id".to_string()))?
            .to_string();

        debug!("Payment order {} created for booking {}", order_id, booking_id);

        Ok(PaymentOrder { order_id, booking_id })
    }

    /// Verify the `X-Payment-Signature` header: base64 HMAC-SHA256 of the
    /// raw request body under the shared webhook secret. Verification runs
    /// before the payload is even parsed.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        if self.webhook_secret.is_empty() {
            warn!("Webhook secret is not set, rejecting callback");
            return false;
        }

        let expected = match STANDARD.decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("Webhook signature is not valid base64");
                return false;
            }
        };

        let mut mac = match HmacSha256::new_from_slice(self.webhook_secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(payload);

        mac.verify_slice(&expected).is_ok()
    }

    /// Parse a verified webhook body.
    pub fn parse_webhook(&self, payload: &[u8]) -> Result<PaymentWebhookPayload, BookingError> {
        serde_json::from_slice(payload)
            .map_err(|e| BookingError::ValidationError(format!("Malformed webhook payload: {}", e)))
    }
}
