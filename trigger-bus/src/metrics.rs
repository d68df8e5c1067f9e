//! Prometheus metrics for the trigger runtime

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter,
};

lazy_static! {
    /// Handler invocations by pattern and outcome
    pub static ref TRIGGER_INVOCATIONS_TOTAL: CounterVec = register_counter_vec!(
        "trigger_invocations_total",
        "Total trigger handler invocations",
        &["pattern", "status"]
    )
    .unwrap();

    /// Handler latency
    pub static ref TRIGGER_DURATION: HistogramVec = register_histogram_vec!(
        "trigger_duration_seconds",
        "Trigger handler duration in seconds",
        &["pattern"]
    )
    .unwrap();

    /// Scheduled job runs by job and outcome
    pub static ref SCHEDULED_RUNS_TOTAL: CounterVec = register_counter_vec!(
        "trigger_scheduled_runs_total",
        "Total scheduled job runs",
        &["job", "status"]
    )
    .unwrap();

    /// Change events dropped because the runtime fell behind
    pub static ref CHANGE_EVENTS_LAGGED: IntCounter = register_int_counter!(
        "trigger_change_events_lagged_total",
        "Change events skipped by a lagging subscription"
    )
    .unwrap();
}
