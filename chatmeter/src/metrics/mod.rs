//! Prometheus metrics for the billing engine.
//!
//! Counters are registered in the default registry on first use and exposed in text format at
//! `/internal/metrics` when `enable_metrics` is set.

mod billing;

pub use billing::{
    record_balance_invariant_violation, record_chat_outcome, record_energy_debited, record_energy_granted, record_webhook_outcome,
};

use prometheus::{Encoder, TextEncoder};

/// Render every registered metric in the Prometheus text exposition format
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_billing_counters() {
        record_energy_debited(3);
        record_chat_outcome("completed");
        let text = render().unwrap();
        assert!(text.contains("chatmeter_energy_debited_total"));
        assert!(text.contains("chatmeter_chat_requests_total"));
    }
}
