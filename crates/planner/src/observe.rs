//! Tracing and metrics plumbing for tests and embedding binaries.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber with the given filter directives. Safe to
/// call repeatedly; only the first call wins.
pub fn init(env: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env))
        .try_init();
}

pub mod metrics {
    use {prometheus_metric_storage::StorageRegistry, std::sync::OnceLock};

    /// The process-wide metric storage every `#[derive(MetricStorage)]`
    /// struct registers into.
    pub fn get_storage_registry() -> &'static StorageRegistry {
        static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();
        REGISTRY.get_or_init(StorageRegistry::default)
    }
}
