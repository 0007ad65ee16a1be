//! Metric names and descriptions.
//!
//! The correlator records through the [`metrics`] facade; installing an
//! exporter (Prometheus or otherwise) is up to the embedding application.
//! Without a recorder every call is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
//! receptor_client_runtime::metrics::describe_metrics();
//! ```

use metrics::{describe_counter, describe_gauge};

/// Envelopes pulled from the responses topic.
pub const ENVELOPES_RECEIVED: &str = "receptor_envelopes_received_total";
/// Envelopes whose id is not registered with this instance.
pub const ENVELOPES_UNMATCHED: &str = "receptor_envelopes_unmatched_total";
/// Envelopes that could not be parsed or carried no id.
pub const ENVELOPES_MALFORMED: &str = "receptor_envelopes_malformed_total";
/// Correlations finished by a complete stream.
pub const CORRELATIONS_COMPLETED: &str = "receptor_correlations_completed_total";
/// Correlations finished by an error response.
pub const CORRELATIONS_FAILED: &str = "receptor_correlations_failed_total";
/// Correlations evicted by the timeout sweep.
pub const CORRELATIONS_TIMED_OUT: &str = "receptor_correlations_timed_out_total";
/// Receiver callbacks that panicked.
pub const CALLBACK_PANICS: &str = "receptor_callback_panics_total";
/// Correlations currently waiting for responses.
pub const PENDING_CORRELATIONS: &str = "receptor_pending_correlations";

/// Register descriptions for all metrics recorded by this crate.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(ENVELOPES_RECEIVED, "Total number of response envelopes received");
    describe_counter!(
        ENVELOPES_UNMATCHED,
        "Response envelopes for ids not registered with this instance"
    );
    describe_counter!(
        ENVELOPES_MALFORMED,
        "Response envelopes dropped because they could not be parsed or had no id"
    );
    describe_counter!(
        CORRELATIONS_COMPLETED,
        "Requests whose response stream completed"
    );
    describe_counter!(CORRELATIONS_FAILED, "Requests answered with an error code");
    describe_counter!(
        CORRELATIONS_TIMED_OUT,
        "Requests evicted because no response arrived in time"
    );
    describe_counter!(CALLBACK_PANICS, "Receiver callbacks that panicked");
    describe_gauge!(
        PENDING_CORRELATIONS,
        "Requests currently waiting for responses"
    );
}
