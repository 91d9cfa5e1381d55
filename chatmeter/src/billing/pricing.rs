//! Tiered per-token pricing.
//!
//! Costs are computed in USD with `Decimal` arithmetic and converted to integer energy by
//! rounding up, so a non-zero cost is never billed as zero energy.

use std::sync::Arc;

use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Serialize;

use crate::billing::conversation::TokenCounter;
use crate::config::PricingConfig;
use crate::model_providers::ChatMessage;

const TOKENS_PER_PRICE_UNIT: i64 = 1_000_000;

/// Upper bound on what a request can cost, computed before the model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub input_tokens: i64,
    pub worst_case_usd: Decimal,
    pub worst_case_energy: i64,
}

/// Cost of a completed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cost {
    pub usd: Decimal,
    pub energy: i64,
}

#[derive(Clone)]
pub struct CostEstimator {
    pricing: PricingConfig,
    counter: Arc<dyn TokenCounter>,
}

impl CostEstimator {
    pub fn new(pricing: PricingConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self { pricing, counter }
    }

    /// Worst case for `messages`: the counted input plus `max_output_tokens` of output.
    pub fn estimate(&self, messages: &[ChatMessage], max_output_tokens: i64) -> CostEstimate {
        let input_tokens = self.counter.count(messages);
        let worst_case_usd = self.usd_for(input_tokens, max_output_tokens);
        CostEstimate {
            input_tokens,
            worst_case_usd,
            worst_case_energy: self.energy_for(worst_case_usd),
        }
    }

    pub fn actual_cost(&self, input_tokens: i64, output_tokens: i64) -> Cost {
        let usd = self.usd_for(input_tokens, output_tokens);
        Cost {
            usd,
            energy: self.energy_for(usd),
        }
    }

    /// Both rates switch to long-context pricing when the input exceeds the threshold
    pub fn usd_for(&self, input_tokens: i64, output_tokens: i64) -> Decimal {
        let long_context = input_tokens > self.pricing.long_context_threshold;
        let (input_price, output_price) = if long_context {
            (self.pricing.input.long_context, self.pricing.output.long_context)
        } else {
            (self.pricing.input.standard, self.pricing.output.standard)
        };

        let unit = Decimal::from(TOKENS_PER_PRICE_UNIT);
        Decimal::from(input_tokens.max(0)) * input_price / unit + Decimal::from(output_tokens.max(0)) * output_price / unit
    }

    /// `ceil(usd * energy_per_usd)`, saturating at `i64::MAX`
    pub fn energy_for(&self, usd: Decimal) -> i64 {
        (usd * self.pricing.energy_per_usd).ceil().to_i64().unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::conversation::ByteBoundTokenCounter;
    use crate::model_providers::MessageRole;

    fn estimator() -> CostEstimator {
        CostEstimator::new(PricingConfig::default(), Arc::new(ByteBoundTokenCounter::new(4, 3)))
    }

    #[test]
    fn test_standard_tier_pricing() {
        let est = estimator();
        // 100k input at $1.25/M plus 100k output at $5.00/M
        assert_eq!(est.usd_for(1_000_000 / 10, 1_000_000 / 10), Decimal::new(625, 3));
        assert_eq!(est.usd_for(128_000, 0), Decimal::new(16, 2));
    }

    #[test]
    fn test_long_context_switches_both_rates() {
        let est = estimator();
        // Strictly greater than the threshold is long context
        assert_eq!(est.usd_for(128_001, 1_000), Decimal::new(128_001 * 250, 8) + Decimal::new(1, 2));
    }

    #[test]
    fn test_energy_rounds_up() {
        let est = estimator();
        // 1 output token = $0.000005 -> 0.05 energy -> 1
        let cost = est.actual_cost(0, 1);
        assert_eq!(cost.usd, Decimal::new(5, 6));
        assert_eq!(cost.energy, 1);
        assert_eq!(est.actual_cost(0, 0).energy, 0);
        // $0.625 -> 6250 exactly
        assert_eq!(est.actual_cost(100_000, 100_000).energy, 6_250);
    }

    #[test]
    fn test_estimate_covers_multibyte_input() {
        let est = estimator();
        let messages = vec![
            ChatMessage::new(MessageRole::System, "persona"),
            ChatMessage::new(MessageRole::User, "漢".repeat(3_000)),
        ];
        let estimate = est.estimate(&messages, 2_048);
        // A provider may bill more than one token per CJK character
        assert!(estimate.input_tokens >= 3_100, "{}", estimate.input_tokens);
        assert!(est.actual_cost(3_100, 2_048).energy <= estimate.worst_case_energy);
    }

    #[test]
    fn test_smaller_usage_never_costs_more_than_estimate() {
        let est = estimator();
        let max_output = 2_048;
        // Estimates on either side of the long-context threshold
        for len in [0usize, 17, 4_000, 127_000, 200_000] {
            let messages = vec![ChatMessage::new(MessageRole::User, "x".repeat(len))];
            let estimate = est.estimate(&messages, max_output);
            let reported = [0, estimate.input_tokens / 2, 128_000, 128_001, estimate.input_tokens];
            for input in reported.into_iter().filter(|i| *i <= estimate.input_tokens) {
                for output in [0, 1, max_output / 2, max_output] {
                    let actual = est.actual_cost(input, output);
                    assert!(
                        actual.energy <= estimate.worst_case_energy,
                        "len={len} input={input} output={output}"
                    );
                }
            }
        }
    }
}
