//! Metric registration for the recovery pipeline

use metrics::describe_counter;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(
        "rejoin_escalations_total",
        "Authority escalations performed as a last resort"
    );
    describe_counter!(
        "rejoin_accept_retries_total",
        "Transient join failures retried by the auto-accept machine"
    );
    describe_counter!(
        "rejoin_joins_total",
        "Joins committed through the recovery pipeline"
    );
}
