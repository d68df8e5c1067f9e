//! Prometheus metrics for risk scoring, enforcement and OTP flows

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    /// Flags raised by reason
    pub static ref RISK_FLAGS_TOTAL: CounterVec = register_counter_vec!(
        "risk_flags_total",
        "Total risk flags raised",
        &["reason"]
    )
    .unwrap();

    /// Enforcement actions applied
    pub static ref ENFORCEMENT_ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "risk_enforcement_actions_total",
        "Total enforcement actions applied",
        &["action"]
    )
    .unwrap();

    /// Best-effort side effects that failed or timed out
    pub static ref SIDE_EFFECT_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "risk_side_effect_failures_total",
        "Total failed best-effort side effects",
        &["channel"]
    )
    .unwrap();

    /// OTP issuance attempts by status
    pub static ref OTP_ISSUANCE_TOTAL: CounterVec = register_counter_vec!(
        "otp_issuance_total",
        "Total OTP issuance attempts",
        &["status"]
    )
    .unwrap();

    /// OTP verifications by outcome
    pub static ref OTP_VERIFICATION_TOTAL: CounterVec = register_counter_vec!(
        "otp_verification_total",
        "Total OTP verifications",
        &["outcome"]
    )
    .unwrap();

    /// Stale window entries removed on read
    pub static ref WINDOW_ENTRIES_PRUNED_TOTAL: IntCounter = register_int_counter!(
        "risk_window_entries_pruned_total",
        "Window entries pruned as stale"
    )
    .unwrap();
}
