//! Metrics module
//!
//! Prometheus counters for authentication and authorization outcomes.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec};

lazy_static! {
    // Gate metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "vmgate_auth_attempts_total",
        "Authentication attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref VERIFIER_NOT_READY: Counter = register_counter!(
        "vmgate_verifier_not_ready_total",
        "Requests rejected because provider discovery has not completed"
    ).unwrap();

    pub static ref CLAIMS_DISCARDED: Counter = register_counter!(
        "vmgate_claims_discarded_total",
        "Role claim entries dropped because they were not role names"
    ).unwrap();

    // Policy metrics
    pub static ref POLICY_DECISIONS: CounterVec = register_counter_vec!(
        "vmgate_policy_decisions_total",
        "Access policy decisions",
        &["operation", "decision"]
    ).unwrap();

    // Provider metrics
    pub static ref KEY_REFRESHES: CounterVec = register_counter_vec!(
        "vmgate_key_refresh_total",
        "Signing key refresh attempts",
        &["status"]
    ).unwrap();
}

/// Record the outcome of a gate admission ("admitted" or a failure kind)
pub fn record_auth_attempt(outcome: &str) {
    AUTH_ATTEMPTS.with_label_values(&[outcome]).inc();
}

/// Record a request rejected by an unready verifier
pub fn record_verifier_not_ready() {
    VERIFIER_NOT_READY.inc();
}

/// Record dropped role entries
pub fn record_claims_discarded(count: usize) {
    if count > 0 {
        CLAIMS_DISCARDED.inc_by(count as f64);
    }
}

/// Record a policy decision
pub fn record_policy_decision(operation: &str, allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    POLICY_DECISIONS
        .with_label_values(&[operation, decision])
        .inc();
}

/// Record a signing key refresh
pub fn record_key_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    KEY_REFRESHES.with_label_values(&[status]).inc();
}
