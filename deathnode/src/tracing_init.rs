use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the process-wide `tracing` subscriber.
///
/// Grounded on the `console_output_layer` half of `trino-lb`'s
/// `tracing.rs`; the OpenTelemetry/Prometheus exporter half has no
/// counterpart here, since Deathnode exposes no HTTP surface to carry
/// trace/metrics export (see DESIGN.md).
pub fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
