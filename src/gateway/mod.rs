//! Payment-gateway integration: intent creation and the signature contract
//! used to authenticate capture callbacks.
//!
//! The gateway signs captures with HMAC-SHA256 over
//! `"{gateway_order_id}|{gateway_payment_id}"` using a shared secret held
//! only by the server.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Intent issued by the gateway for an amount to be paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIntent {
    pub gateway_order_id: String,
    /// Amount in the gateway's minor currency unit
    pub amount_minor: i64,
    pub currency: String,
}

/// Outbound contract with the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens an amount-denominated intent. Transient failures surface as
    /// `GatewayUnavailable`; callers may retry intent creation but must
    /// never retry a capture decision.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError>;
}

/// Computes the capture signature for an order/payment pair.
pub fn sign_capture(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let payload = format!("{}|{}", gateway_order_id, gateway_payment_id);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a capture signature in constant time.
pub fn verify_capture_signature(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> bool {
    let expected = sign_capture(secret, gateway_order_id, gateway_payment_id);
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// HTTP client for a real gateway's intent endpoint.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateIntentRequest<'a> {
    amount: i64,
    currency: &'a str,
}

#[derive(Deserialize)]
struct CreateIntentResponse {
    gateway_order_id: String,
    amount: i64,
    currency: String,
}

impl HttpGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let url = format!("{}/orders", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&CreateIntentRequest {
                amount: amount_minor,
                currency,
            })
            .send()
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::GatewayUnavailable(format!(
                "intent creation returned {}",
                response.status()
            )));
        }

        let body: CreateIntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(format!("invalid response: {}", e)))?;

        info!(gateway_order_id = %body.gateway_order_id, "created gateway intent");
        Ok(GatewayIntent {
            gateway_order_id: body.gateway_order_id,
            amount_minor: body.amount,
            currency: body.currency,
        })
    }
}

/// Deterministic in-process gateway for development and tests. Issues
/// intents locally and can produce correctly signed capture payloads.
pub struct SandboxGateway {
    secret: String,
}

impl SandboxGateway {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Simulates the gateway capturing funds: returns the payment id and
    /// signature the gateway would post back to the capture callback.
    pub fn simulate_capture(&self, gateway_order_id: &str) -> (String, String) {
        let gateway_payment_id = format!("pay_{}", Uuid::new_v4().simple());
        let signature = sign_capture(&self.secret, gateway_order_id, &gateway_payment_id);
        (gateway_payment_id, signature)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            gateway_order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount_minor,
            currency: currency.to_string(),
        })
    }
}
