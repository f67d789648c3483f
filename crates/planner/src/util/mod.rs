use {anyhow::Context, std::time::Duration};

/// Bounds one external call. The request as a whole runs under the
/// deadline in [`crate::infra::Config`]; this keeps any single
/// collaborator from eating the entire budget.
pub async fn bounded<T>(
    timeout: Duration,
    future: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(timeout, future)
        .await
        .context("external call timed out")?
}
