// Cost and budget DTOs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Ledger bucket a spend entry is attributed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CostBucket {
    PerJob,
    Daily,
    Monthly,
}

/// Reporting window for `GET /costs`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SpendPeriod {
    #[default]
    Today,
    Month,
    All,
}

impl std::str::FromStr for SpendPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" | "day" => Ok(SpendPeriod::Today),
            "month" => Ok(SpendPeriod::Month),
            "all" => Ok(SpendPeriod::All),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

/// One line of a cost summary (grouped by model or provider)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostBreakdown {
    pub key: String,
    pub total: f64,
    pub entries: i64,
}

/// Budget summary for a reporting window
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CostSummary {
    pub period: SpendPeriod,
    pub total: f64,
    pub daily_total: f64,
    pub monthly_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_limit: Option<f64>,
    /// Top spenders by model, largest first
    pub by_model: Vec<CostBreakdown>,
    /// Top spenders by provider, largest first
    pub by_provider: Vec<CostBreakdown>,
}

/// Option offered when an estimate overruns the caller's cap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElicitOption {
    ApproveOverride,
    OptimizeForCost,
    Abort,
}

impl ElicitOption {
    pub fn all() -> [ElicitOption; 3] {
        [
            ElicitOption::ApproveOverride,
            ElicitOption::OptimizeForCost,
            ElicitOption::Abort,
        ]
    }
}

/// Budget governor verdict on a submission
///
/// An elicitation is a first-class response, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Admit {
        estimated_cost: f64,
    },
    Reject {
        reason: String,
    },
    Elicit {
        estimated_cost: f64,
        budget_cap: f64,
        options: Vec<ElicitOption>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elicit_options_serialize_screaming() {
        let json = serde_json::to_value(ElicitOption::all()).unwrap();
        assert_eq!(
            json,
            serde_json::json!(["APPROVE_OVERRIDE", "OPTIMIZE_FOR_COST", "ABORT"])
        );
    }

    #[test]
    fn admission_decision_is_tagged() {
        let decision = AdmissionDecision::Admit {
            estimated_cost: 0.25,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "admit");
    }
}
