//! Diagnostic reporting for non-fatal render failures.

use tracing::debug;

/// Receiver for non-fatal evaluation and render failures.
///
/// The core itself never logs; failures which only skip a single feature are
/// forwarded here, rate-limited per tile render. Implementations may be
/// called from any worker thread.
pub trait DiagnosticSink: Send + Sync {
    /// A feature of `layer_id` was skipped because of `message`.
    fn feature_skipped(&self, layer_id: &str, message: &str);
}

/// Default sink forwarding diagnostics to `tracing` at debug level.
#[derive(Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn feature_skipped(&self, layer_id: &str, message: &str) {
        debug!("skipped feature in layer {layer_id:?}: {message}");
    }
}
