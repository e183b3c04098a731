//! Provider callback handling, independent of the HTTP framework

use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::billing::{confirm_payment, BillingProvider, PaymentMetadata, PaymentOutcome};
use crate::core::metrics;
use crate::storage::{get_connection, DbPool};
use crate::telegram::texts;
use crate::telegram::transport::ChatTransport;

/// Header carrying the hex HMAC of the raw body
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

const CHARGE_SUCCESS: &str = "charge.success";

#[derive(Clone)]
pub struct WebhookState {
    pub pool: Arc<DbPool>,
    pub provider: Arc<dyn BillingProvider>,
    pub transport: Arc<dyn ChatTransport>,
}

#[derive(Debug, Deserialize)]
struct CallbackEvent {
    event: String,
    data: ChargeData,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: String,
    amount: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Verifies and applies one provider callback.
///
/// Unsigned or badly signed requests get 401 and change nothing. Anything that
/// passes verification is acknowledged with 200 unless the store fails, so the
/// provider does not retry events we cannot attribute.
pub async fn handle_callback(state: &WebhookState, signature: Option<&str>, raw_body: &[u8]) -> StatusCode {
    let Some(signature) = signature else {
        log::warn!("🚫 Billing callback without signature rejected");
        metrics::record_payment("rejected");
        return StatusCode::UNAUTHORIZED;
    };
    if !state.provider.verify_signature(raw_body, signature) {
        log::warn!("🚫 Billing callback with invalid signature rejected");
        metrics::record_payment("rejected");
        return StatusCode::UNAUTHORIZED;
    }

    let event: CallbackEvent = match serde_json::from_slice(raw_body) {
        Ok(event) => event,
        Err(e) => {
            log::error!("Signed billing callback with unreadable body: {}", e);
            metrics::record_payment("malformed");
            return StatusCode::BAD_REQUEST;
        }
    };

    if event.event != CHARGE_SUCCESS || event.data.status.as_deref().is_some_and(|s| s != "success") {
        log::info!(
            "Billing event {} ({:?}) for {} ignored",
            event.event,
            event.data.status,
            event.data.reference
        );
        metrics::record_payment("ignored");
        return StatusCode::OK;
    }

    let metadata = event.data.metadata.as_ref().and_then(PaymentMetadata::from_value);
    let reference = event.data.reference;

    let outcome = get_connection(&state.pool)
        .map_err(Into::into)
        .and_then(|mut conn| confirm_payment(&mut conn, &reference, event.data.amount, metadata, Utc::now()));

    match outcome {
        Ok(PaymentOutcome::Activated(account)) => {
            metrics::record_payment("activated");
            log::info!(
                "✅ Payment {} confirmed: user={}, plan={}",
                reference,
                account.telegram_id,
                account.plan
            );
            if let Err(e) = state
                .transport
                .send_text(account.telegram_id, &texts::subscription_activated(&account))
                .await
            {
                log::warn!("Failed to send activation notice to {}: {}", account.telegram_id, e);
            }
            StatusCode::OK
        }
        Ok(PaymentOutcome::AlreadyProcessed) => {
            metrics::record_payment("duplicate");
            log::info!("Payment {} already processed, duplicate callback ignored", reference);
            StatusCode::OK
        }
        Ok(PaymentOutcome::AmountMismatch { expected, received }) => {
            metrics::record_payment("amount_mismatch");
            log::error!(
                "💸 Payment {} amount mismatch: expected {}, received {}. Needs manual follow-up",
                reference,
                expected,
                received
            );
            StatusCode::OK
        }
        Ok(PaymentOutcome::Unattributed) => {
            metrics::record_payment("unattributed");
            log::error!(
                "❓ Payment {} cannot be attributed to an account or plan. Needs manual follow-up",
                reference
            );
            StatusCode::OK
        }
        Err(e) => {
            metrics::record_payment("error");
            log::error!("Failed to confirm payment {}: {}", reference, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
