//! Energy and subscription counters.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec};

use crate::types::Tier;

static ENERGY_DEBITED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("chatmeter_energy_debited_total", "Total energy debited for chat usage")
        .expect("Failed to register chatmeter_energy_debited_total metric")
});

static ENERGY_GRANTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chatmeter_energy_granted_total",
        "Total energy granted by subscription tier",
        &["tier"]
    )
    .expect("Failed to register chatmeter_energy_granted_total metric")
});

static CHAT_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("chatmeter_chat_requests_total", "Chat requests by outcome", &["outcome"])
        .expect("Failed to register chatmeter_chat_requests_total metric")
});

/// Usage commits aborted because the debit would have taken the balance below zero
static BALANCE_INVARIANT_VIOLATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chatmeter_balance_invariant_violations_total",
        "Usage commits aborted to keep the balance non-negative"
    )
    .expect("Failed to register chatmeter_balance_invariant_violations_total metric")
});

static WEBHOOK_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chatmeter_webhook_events_total",
        "Payment webhook events by type and outcome",
        &["event_type", "outcome"]
    )
    .expect("Failed to register chatmeter_webhook_events_total metric")
});

pub fn record_energy_debited(amount: i64) {
    ENERGY_DEBITED.inc_by(amount.max(0) as u64);
}

pub fn record_energy_granted(tier: Tier, amount: i64) {
    ENERGY_GRANTED.with_label_values(&[tier.to_string().as_str()]).inc_by(amount.max(0) as u64);
}

/// Record how a chat request ended, e.g. `completed`, `rejected`, `model_failed`
pub fn record_chat_outcome(outcome: &str) {
    CHAT_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_balance_invariant_violation() {
    BALANCE_INVARIANT_VIOLATIONS.inc();
}

pub fn record_webhook_outcome(event_type: &str, outcome: &str) {
    WEBHOOK_EVENTS.with_label_values(&[event_type, outcome]).inc();
}
