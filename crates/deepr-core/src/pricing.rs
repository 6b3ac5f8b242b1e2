// Model allow-list and cost estimation
//
// Hardcoded profiles for the research models each provider exposes.
// Estimates feed the budget governor at admission time; actual cost is
// whatever the provider reports at completion.

use deepr_contracts::ProviderKind;

/// Pricing profile for an allowed model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub name: &'static str,
    pub provider: ProviderKind,
    /// Fixed floor per research run, USD
    pub base_cost: f64,
    /// Marginal cost per 1,000 prompt characters, USD
    pub cost_per_kchar: f64,
    /// Cheap model suitable for planning and summarisation jobs
    pub lightweight: bool,
}

/// Models the engine will admit, per provider
///
/// The tier aliases (`deep`, `standard`, `small`, `planner`) resolve
/// against the default provider's profiles so callers can stay
/// provider-neutral.
pub const KNOWN_MODELS: &[ModelProfile] = &[
    ModelProfile {
        name: "deep",
        provider: ProviderKind::OpenAi,
        base_cost: 0.50,
        cost_per_kchar: 0.05,
        lightweight: false,
    },
    ModelProfile {
        name: "standard",
        provider: ProviderKind::OpenAi,
        base_cost: 0.10,
        cost_per_kchar: 0.02,
        lightweight: false,
    },
    ModelProfile {
        name: "small",
        provider: ProviderKind::OpenAi,
        base_cost: 0.02,
        cost_per_kchar: 0.005,
        lightweight: true,
    },
    ModelProfile {
        name: "planner",
        provider: ProviderKind::OpenAi,
        base_cost: 0.01,
        cost_per_kchar: 0.002,
        lightweight: true,
    },
    ModelProfile {
        name: "azure-deep",
        provider: ProviderKind::Azure,
        base_cost: 0.50,
        cost_per_kchar: 0.05,
        lightweight: false,
    },
    ModelProfile {
        name: "gemini-deep",
        provider: ProviderKind::Gemini,
        base_cost: 0.40,
        cost_per_kchar: 0.04,
        lightweight: false,
    },
    ModelProfile {
        name: "grok-deep",
        provider: ProviderKind::Grok,
        base_cost: 0.35,
        cost_per_kchar: 0.04,
        lightweight: false,
    },
    ModelProfile {
        name: "claude-deep",
        provider: ProviderKind::Anthropic,
        base_cost: 0.45,
        cost_per_kchar: 0.05,
        lightweight: false,
    },
    ModelProfile {
        name: "claude-small",
        provider: ProviderKind::Anthropic,
        base_cost: 0.02,
        cost_per_kchar: 0.005,
        lightweight: true,
    },
];

/// Look up an allowed model by name (case-insensitive)
pub fn find_model(name: &str) -> Option<&'static ModelProfile> {
    let lower = name.to_lowercase();
    KNOWN_MODELS.iter().find(|profile| profile.name == lower)
}

/// Admission-time cost estimate for a prompt against a model
pub fn estimate_job_cost(profile: &ModelProfile, prompt_len: usize) -> f64 {
    profile.base_cost + profile.cost_per_kchar * (prompt_len as f64 / 1_000.0)
}

/// Cheapest lightweight model for a provider, used for planner and
/// summariser jobs
pub fn lightweight_model(provider: ProviderKind) -> Option<&'static ModelProfile> {
    KNOWN_MODELS
        .iter()
        .filter(|profile| profile.provider == provider && profile.lightweight)
        .min_by(|a, b| a.base_cost.total_cmp(&b.base_cost))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(find_model("SMALL").is_some());
        assert!(find_model("small").is_some());
        assert!(find_model("nonexistent-model").is_none());
    }

    #[test]
    fn estimate_scales_with_prompt_length() {
        let profile = find_model("small").unwrap();
        let short = estimate_job_cost(profile, 100);
        let long = estimate_job_cost(profile, 10_000);
        assert!(long > short);
        assert!(short >= profile.base_cost);
    }

    #[test]
    fn planner_is_the_cheapest_openai_lightweight() {
        let model = lightweight_model(ProviderKind::OpenAi).unwrap();
        assert_eq!(model.name, "planner");
    }
}
