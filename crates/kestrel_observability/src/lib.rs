//! Observability setup: structured logging and Prometheus metrics for the
//! route / rewrite / merge pipeline.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Like `init_tracing`, but returns instead of panicking when a global
/// subscriber is already installed. Intended for tests and embedders.
pub fn try_init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}

/// Initialize Prometheus metrics exporter.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one routing decision.
/// `route_type` is one of: "unicast", "sharded", "broadcast", "default", "hint".
pub fn record_route_metrics(duration_us: u64, route_type: &str, units: usize, success: bool) {
    metrics::counter!(
        "kestrel_route_total",
        "type" => route_type.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("kestrel_route_duration_us").record(duration_us as f64);
    metrics::histogram!("kestrel_route_units").record(units as f64);
}

/// Record a rewrite pass over all route units.
pub fn record_rewrite_metrics(duration_us: u64, tokens: usize, units: usize) {
    metrics::histogram!("kestrel_rewrite_duration_us").record(duration_us as f64);
    metrics::histogram!("kestrel_rewrite_tokens").record(tokens as f64);
    metrics::counter!("kestrel_rewrite_units_total").increment(units as u64);
}

/// Record merge strategy selection.
/// `strategy` is one of: "transparent", "stream", "order_by", "group_by_stream", "group_by_memory".
pub fn record_merge_metrics(strategy: &str, shards: usize, paginated: bool) {
    metrics::counter!(
        "kestrel_merge_total",
        "strategy" => strategy.to_string(),
        "paginated" => paginated.to_string()
    )
    .increment(1);
    metrics::histogram!("kestrel_merge_shards").record(shards as f64);
}

/// Record the number of groups materialized by an in-memory group-by merge.
pub fn record_merge_groups(groups: usize) {
    metrics::histogram!("kestrel_merge_groups").record(groups as f64);
}

/// Record a shard query failure that aborted a merge.
pub fn record_shard_failure(data_source: &str) {
    metrics::counter!(
        "kestrel_shard_failures_total",
        "data_source" => data_source.to_string()
    )
    .increment(1);
}

/// Record an atomic rule swap.
pub fn record_rule_reload(version: u64, tables: usize) {
    metrics::counter!("kestrel_rule_reloads_total").increment(1);
    metrics::gauge!("kestrel_rule_version").set(version as f64);
    metrics::gauge!("kestrel_rule_tables").set(tables as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter_are_noops() {
        record_route_metrics(12, "sharded", 2, true);
        record_rewrite_metrics(3, 4, 2);
        record_merge_metrics("order_by", 2, false);
        record_merge_groups(10);
        record_shard_failure("ds_0");
        record_rule_reload(2, 5);
    }

    #[test]
    fn test_init_metrics_rejects_bad_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
