use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_1m_usd: f64,
    pub output_per_1m_usd: f64,
}

/// Lookup table keyed by `(provider, model)` giving USD-per-1M-token
/// pricing; unknown pairs fall back to a pessimistic default so budget
/// checks never under-charge an un-priced model (spec.md §4.B).
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<(String, String), ModelPricing>,
}

impl PricingTable {
    pub const DEFAULT_FALLBACK: ModelPricing = ModelPricing {
        input_per_1m_usd: 15.0,
        output_per_1m_usd: 75.0,
    };

    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with_entry(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        pricing: ModelPricing,
    ) -> Self {
        self.entries.insert((provider.into(), model.into()), pricing);
        self
    }

    pub fn lookup(&self, provider: &str, model: &str) -> ModelPricing {
        self.entries
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(Self::DEFAULT_FALLBACK)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
            .with_entry(
                "anthropic",
                "claude-sonnet",
                ModelPricing {
                    input_per_1m_usd: 3.0,
                    output_per_1m_usd: 15.0,
                },
            )
            .with_entry(
                "anthropic",
                "claude-haiku",
                ModelPricing {
                    input_per_1m_usd: 0.8,
                    output_per_1m_usd: 4.0,
                },
            )
            .with_entry(
                "openai",
                "gpt-4o-mini",
                ModelPricing {
                    input_per_1m_usd: 0.15,
                    output_per_1m_usd: 0.6,
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_pessimistic_pricing() {
        let table = PricingTable::default();
        let pricing = table.lookup("unknown-vendor", "unknown-model");
        assert_eq!(pricing.input_per_1m_usd, PricingTable::DEFAULT_FALLBACK.input_per_1m_usd);
    }

    #[test]
    fn known_model_resolves_its_own_price() {
        let table = PricingTable::default();
        let pricing = table.lookup("openai", "gpt-4o-mini");
        assert_eq!(pricing.input_per_1m_usd, 0.15);
    }
}
