//! Prometheus metrics
//!
//! Counters are recorded through the `metrics` facade from wherever the
//! pipeline makes a decision; this module installs the recorder and owns the
//! metric descriptions. The exposition handle is rendered by
//! `GET /oauth/metrics` (or the admin listener when configured).

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::{Error, Result};

/// Install the Prometheus recorder and describe the gateway metrics.
///
/// # Errors
///
/// Returns [`Error::Config`] when a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("failed to install metrics recorder: {e}")))?;

    describe_counter!(
        "gateway_requests_forwarded_total",
        "Requests that passed every gate and reached the upstream"
    );
    describe_counter!(
        "gateway_requests_denied_total",
        "Requests denied, labelled by the failing gate"
    );
    describe_counter!(
        "gateway_token_refresh_total",
        "Refresh-grant calls against the identity provider"
    );
    describe_counter!(
        "gateway_uma_decisions_total",
        "UMA evaluations, labelled cached/granted/denied"
    );
    describe_counter!(
        "gateway_upstream_errors_total",
        "Upstream connection failures"
    );

    Ok(handle)
}
