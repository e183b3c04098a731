use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;
use url::Url;

use crate::billing::{BillingProvider, CheckoutLink, CheckoutRequest};
use crate::core::config;
use crate::core::error::{AppError, AppResult};

type HmacSha512 = Hmac<Sha512>;

/// Paystack transaction API client
///
/// Checkouts go through `POST /transaction/initialize`; callbacks are signed with
/// HMAC-SHA512 of the raw body, keyed by the same secret key, hex-encoded in the
/// `x-paystack-signature` header.
pub struct PaystackClient {
    client: reqwest::Client,
    api_url: String,
    secret: SecretString,
    callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: Option<String>,
}

impl PaystackClient {
    pub fn new(api_url: impl Into<String>, secret: SecretString, callback_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config::network::timeout())
                .build()
                .unwrap_or_default(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            secret,
            callback_url,
        }
    }

    /// `None` when PAYSTACK_SECRET_KEY is not set
    pub fn from_config() -> Option<Self> {
        config::payment::PAYSTACK_SECRET_KEY.as_ref().map(|secret| {
            Self::new(
                config::payment::PAYSTACK_API_URL.as_str(),
                secret.clone(),
                config::public_url("/billing/return"),
            )
        })
    }

    /// Hex HMAC-SHA512 of `body` under `secret`
    pub fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Paystack requires an email; users are identified by Telegram id instead.
    fn customer_email(account_id: i64) -> String {
        format!("{}@users.turnitq.app", account_id)
    }
}

#[async_trait]
impl BillingProvider for PaystackClient {
    async fn create_checkout(&self, request: &CheckoutRequest) -> AppResult<CheckoutLink> {
        let mut body = json!({
            "email": Self::customer_email(request.account_id),
            "amount": request.amount,
            "currency": request.currency,
            "reference": request.reference,
            "metadata": {
                "telegram_id": request.account_id,
                "plan": request.plan.to_string(),
            },
        });
        if let Some(callback_url) = &self.callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.api_url))
            .bearer_auth(self.secret.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let parsed: InitializeResponse = response.json().await?;
        if !status.is_success() || !parsed.status {
            log::error!(
                "Paystack initialize failed for {}: HTTP {} {}",
                request.reference,
                status,
                parsed.message
            );
            return Err(AppError::Payment(format!("initialize rejected: {}", parsed.message)));
        }

        let data = parsed
            .data
            .ok_or_else(|| AppError::Payment("initialize response without data".to_string()))?;
        let url = Url::parse(&data.authorization_url)
            .map_err(|e| AppError::Payment(format!("bad authorization_url: {}", e)))?;

        Ok(CheckoutLink {
            reference: data.reference.unwrap_or_else(|| request.reference.clone()),
            url,
        })
    }

    fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha512::new_from_slice(self.secret.expose_secret().as_bytes()) else {
            return false;
        };
        mac.update(raw_body);
        mac.verify_slice(&expected).is_ok()
    }
}
