//! Inline button presses

use super::types::HandlerDeps;
use crate::billing;
use crate::core::error::AppResult;
use crate::core::subscription::{Plan, PlanSpec};
use crate::telegram::keyboards::{self, CallbackToken};
use crate::telegram::texts;
use crate::telegram::transport::Button;

pub async fn handle_callback(deps: &HandlerDeps, user_id: i64, data: &str) -> AppResult<()> {
    match CallbackToken::parse(data) {
        Some(CallbackToken::SelectPlan(plan)) => start_checkout(deps, user_id, plan).await,
        Some(CallbackToken::PlanDetails) | Some(CallbackToken::Upgrade) => {
            deps.transport
                .send_with_buttons(user_id, &texts::plan_details(), keyboards::plan_buttons())
                .await
        }
        None => {
            log::warn!("Unknown callback data from {}: {}", user_id, data);
            Ok(())
        }
    }
}

async fn start_checkout(deps: &HandlerDeps, user_id: i64, plan: Plan) -> AppResult<()> {
    let Some(provider) = &deps.billing else {
        return deps.transport.send_text(user_id, texts::PAYMENTS_UNAVAILABLE).await;
    };

    match billing::start_checkout(&deps.db_pool, provider.as_ref(), user_id, plan).await {
        Ok(link) => {
            let spec = PlanSpec::for_plan(plan);
            deps.transport
                .send_with_buttons(
                    user_id,
                    &texts::checkout_ready(&spec),
                    vec![vec![Button::link(format!("Pay for {}", spec.name), link.url)]],
                )
                .await
        }
        Err(e) => {
            log::error!("Checkout for user {} ({}) failed: {}", user_id, plan, e);
            deps.transport.send_text(user_id, texts::PAYMENTS_UNAVAILABLE).await
        }
    }
}
