use crate::core::subscription::{Plan, PlanSpec};
use crate::telegram::transport::Button;

/// Payload of an inline button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackToken {
    /// `plan_<tier>`: start checkout for a plan
    SelectPlan(Plan),
    /// `plan_details`
    PlanDetails,
    /// `upgrade`
    Upgrade,
}

impl CallbackToken {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "plan_details" => Some(Self::PlanDetails),
            "upgrade" => Some(Self::Upgrade),
            other => other
                .strip_prefix("plan_")
                .and_then(|tier| tier.parse::<Plan>().ok())
                .filter(|plan| plan.is_paid())
                .map(Self::SelectPlan),
        }
    }

    pub fn to_data(self) -> String {
        match self {
            Self::SelectPlan(plan) => format!("plan_{}", plan),
            Self::PlanDetails => "plan_details".to_string(),
            Self::Upgrade => "upgrade".to_string(),
        }
    }
}

/// One row per paid plan, then a details button
pub fn plan_buttons() -> Vec<Vec<Button>> {
    let mut rows: Vec<Vec<Button>> = Plan::paid()
        .map(|plan| {
            let spec = PlanSpec::for_plan(plan);
            vec![Button::callback(
                format!("{} ({}/day)", spec.name, spec.daily_limit),
                CallbackToken::SelectPlan(plan).to_data(),
            )]
        })
        .collect();
    rows.push(vec![Button::callback("Plan details", CallbackToken::PlanDetails.to_data())]);
    rows
}
