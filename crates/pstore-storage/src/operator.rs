//! OpenDAL Operator factory for ledger backends

use anyhow::{Context, Result};
use opendal::Operator;
use pstore_core::config::{expand_home, BackendKind, StorageConfig};
use secrecy::{ExposeSecret, SecretString};

/// Credentials for an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl S3Credentials {
    /// Read `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, falling back to the
    /// `PSTORE_` prefixed names.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("PSTORE_ACCESS_KEY_ID"))
            .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("PSTORE_SECRET_ACCESS_KEY"))
            .context("AWS_SECRET_ACCESS_KEY not set")?;
        Ok(S3Credentials {
            access_key_id,
            secret_access_key: SecretString::from(secret_access_key),
        })
    }
}

/// Build an S3 operator (path-style addressing, which MinIO and SeaweedFS
/// require) wrapped in logging and retry layers.
pub fn build_operator(storage: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(creds.secret_access_key.expose_secret());

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .finish();
    Ok(with_layers(op))
}

pub fn build_fs_operator(root: &std::path::Path) -> Result<Operator> {
    let root = expand_home(root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating ledger root {}", root.display()))?;
    let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
    let op = Operator::new(builder)
        .context("creating OpenDAL fs operator")?
        .finish();
    Ok(with_layers(op))
}

/// In-process operator; contents vanish with the process.
pub fn build_memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// Build the operator selected by `storage.backend`. S3 credentials come
/// from the environment.
pub fn build_from_core_config(storage: &StorageConfig) -> Result<Operator> {
    match storage.backend {
        BackendKind::Memory => build_memory_operator(),
        BackendKind::Fs => build_fs_operator(&storage.root),
        BackendKind::S3 => build_operator(storage, &S3Credentials::from_env()?),
    }
}

fn with_layers(op: Operator) -> Operator {
    op.layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
}
