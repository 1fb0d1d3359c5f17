//! OpenDAL Operator factory for the remote store

use anyhow::{Context, Result};
use hoard_core::config::{remote_credentials, RemoteConfig};
use opendal::Operator;

/// Build an OpenDAL Operator for an S3-compatible endpoint.
///
/// Uses path-style addressing (the opendal 0.55 default), which MinIO and
/// SeaweedFS require.
///
/// If `enforce_tls` is set and the endpoint is plain HTTP this fails;
/// otherwise a plaintext endpoint only logs a warning.
pub fn build_operator(
    remote: &RemoteConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if remote.endpoint.starts_with("http://") {
        if remote.enforce_tls {
            anyhow::bail!(
                "remote endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set remote.enforce_tls = false for local testing.",
                remote.endpoint
            );
        }
        tracing::warn!(
            endpoint = %remote.endpoint,
            "remote endpoint uses plaintext HTTP, credentials are sent unencrypted"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&remote.endpoint)
        .region(&remote.region)
        .bucket(&remote.bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator with credentials taken from the environment.
pub fn build_from_env(remote: &RemoteConfig) -> Result<Operator> {
    let (key, secret) = remote_credentials().context(
        "no remote credentials: set HOARD_ACCESS_KEY_ID/HOARD_SECRET_ACCESS_KEY \
         (or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY)",
    )?;
    build_operator(remote, &key, &secret)
}

/// In-process operator, for tests and offline use.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}
