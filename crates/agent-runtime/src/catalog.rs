//! Static model tables for the hosted providers.

use agent_core::provider::{ModelInfo, ModelPricing, TokenUsage};

/// One row of a provider's model table
pub struct ModelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub context_limit: u64,
    pub output_limit: u64,
    /// USD per million input tokens
    pub input_price: f64,
    /// USD per million output tokens
    pub output_price: f64,
}

impl ModelSpec {
    pub fn info(&self, provider_id: &str) -> ModelInfo {
        ModelInfo {
            id: self.id.into(),
            name: self.name.into(),
            provider_id: provider_id.into(),
            context_limit: self.context_limit,
            output_limit: self.output_limit,
            supports_tools: true,
            pricing: ModelPricing::new(self.input_price, self.output_price),
        }
    }
}

pub fn infos(provider_id: &str, table: &[ModelSpec]) -> Vec<ModelInfo> {
    table.iter().map(|m| m.info(provider_id)).collect()
}

/// Cost of a call, matching dated model ids against their family
pub fn cost(table: &[ModelSpec], model: &str, usage: &TokenUsage) -> f64 {
    table
        .iter()
        .filter(|m| model.starts_with(m.id))
        .max_by_key(|m| m.id.len())
        .map_or(0.0, |m| ModelPricing::new(m.input_price, m.output_price).cost(usage))
}
