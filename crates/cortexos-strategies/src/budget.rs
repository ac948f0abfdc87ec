use cortexos_budget::CostLedger;
use cortexos_providers::PricingTable;

/// Tracks a single reasoning call's own `cost_budget` ceiling on top of
/// the ledger's global run/day budgets. Every extra provider round a
/// strategy takes (a critique, a candidate batch, a debate round) goes
/// through [`BudgetTracker::authorize`] first.
pub(crate) struct BudgetTracker<'a> {
    ledger: &'a CostLedger,
    pricing: PricingTable,
    provider_id: String,
    model: String,
    cost_budget: f64,
    spent: f64,
}

impl<'a> BudgetTracker<'a> {
    pub(crate) fn new(
        ledger: &'a CostLedger,
        provider_id: String,
        model: String,
        cost_budget: f64,
    ) -> Self {
        Self {
            ledger,
            pricing: PricingTable::default(),
            provider_id,
            model,
            cost_budget,
            spent: 0.0,
        }
    }

    /// Pre-authorizes one more round against both the ledger's global
    /// budgets and this call's own `cost_budget`. Returns `false` --
    /// never an error -- on either limit, so callers can fall back to
    /// their best partial result.
    pub(crate) async fn authorize(&mut self, est_input_tokens: u64, est_output_tokens: u64) -> bool {
        if self
            .ledger
            .pre_authorize(&self.provider_id, &self.model, est_input_tokens, est_output_tokens)
            .await
            .is_err()
        {
            return false;
        }

        let pricing = self.pricing.lookup(&self.provider_id, &self.model);
        let estimate = (est_input_tokens as f64 / 1_000_000.0) * pricing.input_per_1m_usd
            + (est_output_tokens as f64 / 1_000_000.0) * pricing.output_per_1m_usd;
        if self.spent + estimate > self.cost_budget {
            return false;
        }
        self.spent += estimate;
        true
    }

    pub(crate) async fn record(&self, usage: &cortexos_types::TokenUsage) {
        self.ledger
            .record_call(&self.provider_id, &self.model, usage.input_tokens, usage.output_tokens)
            .await;
    }
}

/// A flat per-round token estimate; strategies don't know the true size
/// of a round ahead of time, so this stands in for both halves of
/// `pre_authorize` the way the planner's own per-task estimate does
/// (spec.md §4.H), just without a complexity input to scale from.
pub(crate) const ESTIMATED_INPUT_TOKENS: u64 = 3000;
pub(crate) const ESTIMATED_OUTPUT_TOKENS: u64 = 1500;
