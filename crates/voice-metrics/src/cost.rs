use serde::{Deserialize, Serialize};

use crate::types::{CostBreakdown, UsageSummary};

/// Static per-provider rates, in USD per unit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostModel {
    pub cost_per_input_token: f64,
    pub cost_per_output_token: f64,
    pub cost_per_second: f64,
    pub cost_per_character: f64,
}

/// Rates for each provider a session uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostEstimator {
    pub llm: CostModel,
    pub stt: CostModel,
    pub tts: CostModel,
}

impl CostEstimator {
    pub fn new(llm: CostModel, stt: CostModel, tts: CostModel) -> Self {
        Self { llm, stt, tts }
    }

    /// Cost of the full cumulative usage. Always computed from the cumulative
    /// summary, never by adding up deltas, so rounding error does not compound.
    pub fn estimate(&self, usage: &UsageSummary) -> CostBreakdown {
        CostBreakdown {
            llm: llm_cost(usage, &self.llm),
            stt: usage.stt_seconds * self.stt.cost_per_second,
            tts: usage.tts_characters as f64 * self.tts.cost_per_character,
        }
    }
}

pub fn llm_cost(usage: &UsageSummary, model: &CostModel) -> f64 {
    usage.prompt_tokens as f64 * model.cost_per_input_token
        + usage.completion_tokens as f64 * model.cost_per_output_token
}
