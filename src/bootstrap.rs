//! Wiring of concrete capabilities into a [`PipelineContext`]

use anyhow::{Context, Result};
use bridge_desktop::{EnvSecureStore, ReqwestHttpClient, TokioFileSystem};
use bridge_traits::storage::{FileSystemAccess, SecureStore};
use bridge_traits::time::SystemClock;
use core_pipeline::{LinearScale, PipelineContext};
use core_runtime::config::{PipelineConfig, SchedulerMode, WebDavSettings};
use core_runtime::events::{EventSeverity, EventStream, RecvError};
use core_runtime::logging::redact_if_sensitive;
use provider_webdav::NextcloudConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::SecretSource;

/// Settings given on the command line, applied over the stored configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub threads_limit: Option<usize>,
    pub poll_interval: Option<Duration>,
    pub scheduler_mode: Option<SchedulerMode>,
}

pub fn secret_store(source: SecretSource) -> Arc<dyn SecureStore> {
    match source {
        SecretSource::Env => Arc::new(EnvSecureStore::new()),
        #[cfg(feature = "secure-store")]
        SecretSource::Keyring => Arc::new(bridge_desktop::KeyringSecureStore::new()),
    }
}

pub async fn load_config(secrets: &dyn SecureStore, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::load(secrets)
        .await
        .context("Failed to read pipeline settings")?;

    if let Some(limit) = overrides.threads_limit {
        builder = builder.threads_limit(limit);
    }
    if let Some(interval) = overrides.poll_interval {
        builder = builder.poll_interval(interval);
    }
    if let Some(mode) = overrides.scheduler_mode {
        builder = builder.scheduler_mode(mode);
    }

    builder.build().context("Invalid pipeline configuration")
}

/// Build the context used by every pipeline stage
pub async fn build_context(secrets: &dyn SecureStore, overrides: &Overrides) -> Result<PipelineContext> {
    let settings = WebDavSettings::load(secrets)
        .await
        .context("Failed to read WebDAV settings")?;
    info!(
        url = %settings.base_url,
        username = %settings.username,
        password = %redact_if_sensitive("password", &settings.password),
        "WebDAV settings loaded"
    );

    let config = load_config(secrets, overrides).await?;
    info!(
        raw = %config.raw_dir,
        unsorted = %config.unsorted_dir,
        root = %config.images_root_dir,
        threads = config.threads_limit,
        scheduler = %config.scheduler_mode,
        "Pipeline configured"
    );

    let http = Arc::new(ReqwestHttpClient::new().context("Failed to create HTTP client")?);
    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    let store = Arc::new(NextcloudConnector::new(http, fs.clone(), settings));
    let transform = Arc::new(LinearScale::new(config.scale_factor));

    Ok(PipelineContext::new(
        config,
        store,
        fs,
        transform,
        Arc::new(SystemClock),
    ))
}

/// Log warning and error events published on the bus until it closes
pub fn spawn_event_logger(ctx: &PipelineContext) -> JoinHandle<()> {
    let mut events = EventStream::new(ctx.events.subscribe())
        .filter(|event| event.severity() >= EventSeverity::Warning);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.severity() == EventSeverity::Error => {
                    error!(event = ?event, "{}", event.description())
                }
                Ok(event) => warn!(event = ?event, "{}", event.description()),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
