//! Model pricing and cost estimation.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

/// Token counts reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

static KNOWN_MODELS: Lazy<Vec<ModelPricing>> = Lazy::new(|| {
    // Most specific names first: lookup is by substring.
    vec![
        ModelPricing::new("gpt-4o-mini", 0.00015, 0.0006),
        ModelPricing::new("gpt-4o", 0.005, 0.015),
        ModelPricing::new("claude-3-5-sonnet", 0.003, 0.015),
        ModelPricing::new("claude-3-haiku", 0.00025, 0.00125),
        ModelPricing::new("gemini-1.5-flash", 0.000075, 0.0003),
        ModelPricing::new("gemini-1.5-pro", 0.00125, 0.005),
    ]
});

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
        }
    }

    pub fn calculate_cost(&self, usage: TokenUsage) -> f64 {
        let ic = (usage.input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (usage.output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        ic + oc
    }

    pub fn for_model(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        KNOWN_MODELS.iter().find(|p| m.contains(&p.model)).cloned()
    }

    /// Cost in USD, zero for unknown models.
    pub fn cost_for(model: &str, usage: TokenUsage) -> f64 {
        Self::for_model(model)
            .map(|p| p.calculate_cost(usage))
            .unwrap_or(0.0)
    }
}

pub fn format_usd(cost: f64) -> String {
    if cost < 0.01 {
        format!("{:.4}¢", cost * 100.0)
    } else {
        format!("${:.4}", cost)
    }
}
