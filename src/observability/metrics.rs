//! Metrics for `packetwalk`.
//!
//! Prometheus-compatible counters and gauges. Phase ids come from room
//! files, so they are sanitized before being used as labels.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::PacketwalkError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Kinds of discarded continuation the core reports.
const STALE_KINDS: [&str; 6] = [
    "arrival",
    "hold_start",
    "hold_complete",
    "lifecycle",
    "timer",
    "unknown_track",
];

/// Maximum length for phase labels.
const MAX_PHASE_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `PacketwalkError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), PacketwalkError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| PacketwalkError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "packetwalk_hops_dispatched_total",
        "Hop directives handed to the renderer"
    );
    describe_counter!(
        "packetwalk_stale_events_total",
        "Continuations discarded because their generation or hop was no longer current"
    );
    describe_counter!(
        "packetwalk_decisions_total",
        "Firewall decisions reached at inspection nodes"
    );
    describe_counter!(
        "packetwalk_tracks_blocked_total",
        "Runs halted by a deny decision"
    );
    describe_gauge!(
        "packetwalk_selected_phase",
        "Currently selected phase (1 = selected)"
    );
}

/// Sanitizes a phase id for use as a metrics label.
///
/// Truncates to [`MAX_PHASE_LABEL_LEN`] characters and replaces characters
/// invalid in Prometheus labels with underscores.
#[must_use]
pub fn sanitize_phase_label(name: &str) -> String {
    name.chars()
        .take(MAX_PHASE_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_stale_kind(kind: &str) -> &str {
    if STALE_KINDS.contains(&kind) {
        kind
    } else {
        "__unknown__"
    }
}

/// Records a dispatched hop.
pub fn record_hop_dispatched(phase: &str) {
    counter!("packetwalk_hops_dispatched_total", "phase" => sanitize_phase_label(phase))
        .increment(1);
}

/// Records a discarded continuation.
pub fn record_stale_event(kind: &str) {
    counter!("packetwalk_stale_events_total", "kind" => sanitize_stale_kind(kind).to_owned())
        .increment(1);
}

/// Records a firewall decision (`"allow"` or `"deny"`).
pub fn record_decision(action: &'static str) {
    counter!("packetwalk_decisions_total", "action" => action).increment(1);
}

/// Records a run halted by a deny decision.
pub fn record_track_blocked(phase: &str) {
    counter!("packetwalk_tracks_blocked_total", "phase" => sanitize_phase_label(phase))
        .increment(1);
}

/// Sets the selected phase gauge, zeroing the previous phase's label.
pub fn set_selected_phase(previous: Option<&str>, phase: &str) {
    if let Some(prev) = previous {
        gauge!("packetwalk_selected_phase", "phase" => sanitize_phase_label(prev)).set(0.0);
    }
    gauge!("packetwalk_selected_phase", "phase" => sanitize_phase_label(phase)).set(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_phase_label() {
        assert_eq!(sanitize_phase_label("dns"), "dns");
        assert_eq!(sanitize_phase_label("tls handshake!"), "tls_handshake_");
        assert_eq!(sanitize_phase_label(&"x".repeat(500)).len(), MAX_PHASE_LABEL_LEN);
    }

    #[test]
    fn test_unknown_stale_kind_is_bucketed() {
        assert_eq!(sanitize_stale_kind("arrival"), "arrival");
        assert_eq!(sanitize_stale_kind("whatever"), "__unknown__");
    }

    #[test]
    fn test_record_functions_do_not_panic_without_recorder() {
        record_hop_dispatched("dns");
        record_stale_event("arrival");
        record_decision("allow");
        record_track_blocked("attack");
        set_selected_phase(Some("dns"), "https");
    }
}
