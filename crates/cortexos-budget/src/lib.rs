//! Cost Ledger & Budget (spec.md §4.B).

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use cortexos_providers::PricingTable;
use cortexos_types::{CortexError, CostEntry, CostSummary};

/// Pre-authorization inflates the pessimistic cost estimate by this factor
/// before comparing against remaining budget (spec.md §4.B).
pub const SAFETY_MARGIN: f64 = 1.2;

struct LedgerState {
    entries: Vec<CostEntry>,
    spent_run: f64,
    spent_today: f64,
    day_anchor: DateTime<Utc>,
}

impl LedgerState {
    fn roll_day_if_needed(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.day_anchor.date_naive() {
            self.spent_today = 0.0;
            self.day_anchor = now;
        }
    }
}

/// Single-writer cost ledger: every call goes through one
/// `tokio::sync::Mutex`, matching the engine's sole-writer rule (spec.md
/// §5).
pub struct CostLedger {
    state: Mutex<LedgerState>,
    pricing: PricingTable,
    budget_per_run: Option<f64>,
    budget_per_day: Option<f64>,
}

impl CostLedger {
    pub fn new(pricing: PricingTable, budget_per_run: Option<f64>, budget_per_day: Option<f64>) -> Self {
        Self::with_clock(pricing, budget_per_run, budget_per_day, Utc::now())
    }

    pub fn with_clock(
        pricing: PricingTable,
        budget_per_run: Option<f64>,
        budget_per_day: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                entries: Vec::new(),
                spent_run: 0.0,
                spent_today: 0.0,
                day_anchor: now,
            }),
            pricing,
            budget_per_run,
            budget_per_day,
        }
    }

    fn estimate_cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let pricing = self.pricing.lookup(provider, model);
        (input_tokens as f64 / 1_000_000.0) * pricing.input_per_1m_usd
            + (output_tokens as f64 / 1_000_000.0) * pricing.output_per_1m_usd
    }

    /// Checks a pessimistic (margin-inflated) estimate against both the
    /// per-run and per-day budgets, without recording anything. Call this
    /// before every LLM call; record the actual cost afterward via
    /// [`CostLedger::record_call`].
    pub async fn pre_authorize(
        &self,
        provider: &str,
        model: &str,
        est_input_tokens: u64,
        est_output_tokens: u64,
    ) -> Result<(), CortexError> {
        self.pre_authorize_at(provider, model, est_input_tokens, est_output_tokens, Utc::now())
            .await
    }

    async fn pre_authorize_at(
        &self,
        provider: &str,
        model: &str,
        est_input_tokens: u64,
        est_output_tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<(), CortexError> {
        let estimated = self.estimate_cost(provider, model, est_input_tokens, est_output_tokens) * SAFETY_MARGIN;
        let mut state = self.state.lock().await;
        state.roll_day_if_needed(now);

        if let Some(limit) = self.budget_per_run {
            let projected = state.spent_run + estimated;
            if projected > limit {
                return Err(CortexError::Budget {
                    budget: "run".to_string(),
                    spent: projected,
                    limit,
                });
            }
        }
        if let Some(limit) = self.budget_per_day {
            let projected = state.spent_today + estimated;
            if projected > limit {
                return Err(CortexError::Budget {
                    budget: "day".to_string(),
                    spent: projected,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Records the actual tokens spent by a completed call.
    pub async fn record_call(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> CostEntry {
        let now = Utc::now();
        let cost_usd = self.estimate_cost(provider, model, input_tokens, output_tokens);
        let entry = CostEntry {
            timestamp: now,
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
        };

        let mut state = self.state.lock().await;
        state.roll_day_if_needed(now);
        state.spent_run += cost_usd;
        state.spent_today += cost_usd;
        state.entries.push(entry.clone());
        entry
    }

    /// Aggregates entries within `window` of the current time.
    pub async fn get_summary(&self, window: Duration) -> CostSummary {
        let now = Utc::now();
        let cutoff = now - window;
        let state = self.state.lock().await;
        let mut summary = CostSummary::default();
        for entry in state.entries.iter().filter(|e| e.timestamp >= cutoff) {
            summary.total_input_tokens += entry.input_tokens;
            summary.total_output_tokens += entry.output_tokens;
            summary.total_cost_usd += entry.cost_usd;
            summary.call_count += 1;
        }
        summary
    }

    pub async fn spent_this_run(&self) -> f64 {
        self.state.lock().await.spent_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pre_authorize_passes_within_budget() {
        let ledger = CostLedger::new(PricingTable::default(), Some(10.0), None);
        let result = ledger
            .pre_authorize("openai", "gpt-4o-mini", 1_000_000, 100_000)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn pre_authorize_rejects_when_run_budget_would_be_exceeded() {
        let ledger = CostLedger::new(PricingTable::default(), Some(0.01), None);
        let result = ledger
            .pre_authorize("anthropic", "claude-sonnet", 1_000_000, 1_000_000)
            .await;
        assert!(matches!(
            result,
            Err(CortexError::Budget { budget, .. }) if budget == "run"
        ));
    }

    #[tokio::test]
    async fn pre_authorize_rejects_when_day_budget_would_be_exceeded() {
        let ledger = CostLedger::new(PricingTable::default(), None, Some(0.01));
        let result = ledger
            .pre_authorize("anthropic", "claude-sonnet", 1_000_000, 1_000_000)
            .await;
        assert!(matches!(
            result,
            Err(CortexError::Budget { budget, .. }) if budget == "day"
        ));
    }

    #[tokio::test]
    async fn record_call_accumulates_run_spend() {
        let ledger = CostLedger::new(PricingTable::default(), None, None);
        ledger.record_call("openai", "gpt-4o-mini", 1000, 1000).await;
        ledger.record_call("openai", "gpt-4o-mini", 1000, 1000).await;
        assert!(ledger.spent_this_run().await > 0.0);
    }

    #[tokio::test]
    async fn summary_excludes_entries_outside_window() {
        let old_anchor = Utc::now() - Duration::hours(2);
        let ledger = CostLedger::with_clock(PricingTable::default(), None, None, old_anchor);
        ledger.record_call("openai", "gpt-4o-mini", 1000, 1000).await;
        let summary = ledger.get_summary(Duration::minutes(1)).await;
        assert_eq!(summary.call_count, 0);
    }

    #[tokio::test]
    async fn unknown_model_uses_pessimistic_fallback_and_still_enforces_budget() {
        let ledger = CostLedger::new(PricingTable::default(), Some(0.0001), None);
        let result = ledger
            .pre_authorize("some-vendor", "some-unpriced-model", 10_000, 10_000)
            .await;
        assert!(result.is_err());
    }
}
