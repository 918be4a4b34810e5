//! Orchestrator loop
//!
//! One cycle is discover then schedule. Cycles run back to back with
//! `poll_interval` between them; cycle `n + 1` starts only after every task of
//! cycle `n` terminated. Cancellation is observed between cycles only.

use bridge_traits::storage::{FileSystemAccess, RemoteStore};
use bridge_traits::time::Clock;
use core_runtime::config::PipelineConfig;
use core_runtime::events::{CycleEvent, EventBus, PipelineEvent};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::discovery::{Discovery, Predicate};
use crate::error::Result;
use crate::relocation::{PendingRelocations, Relocator};
use crate::retry::RetryingStore;
use crate::scheduler::{BatchReport, BatchScheduler};
use crate::transform::{ImageTransform, TransformStage};

/// Everything a cycle needs, built once at startup and shared by all stages
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    /// Remote store wrapped in the configured retry policy
    pub store: Arc<dyn RemoteStore>,
    pub fs: Arc<dyn FileSystemAccess>,
    pub transform: Arc<dyn ImageTransform>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub pending: PendingRelocations,
}

impl PipelineContext {
    /// `store` is wrapped in a [`RetryingStore`] using `config.retry_policy`.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn RemoteStore>,
        fs: Arc<dyn FileSystemAccess>,
        transform: Arc<dyn ImageTransform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store: Arc<dyn RemoteStore> =
            Arc::new(RetryingStore::new(store, config.retry_policy.clone()));

        Self {
            config: Arc::new(config),
            store,
            fs,
            transform,
            clock,
            events: EventBus::default(),
            pending: PendingRelocations::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("events", &self.events)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Which pipelines a cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Raw directory to unsorted directory
    Scale,
    /// Unsorted directory to category directories
    Relocate,
    /// Scale, then relocate
    All,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Scale => "scale",
            PipelineMode::Relocate => "relocate",
            PipelineMode::All => "all",
        }
    }

    fn scales(&self) -> bool {
        matches!(self, PipelineMode::Scale | PipelineMode::All)
    }

    fn relocates(&self) -> bool {
        matches!(self, PipelineMode::Relocate | PipelineMode::All)
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: String,
    pub mode: PipelineMode,
    pub scale: Option<BatchReport>,
    pub relocate: Option<BatchReport>,
    /// Pending partial relocations completed at the start of the cycle
    pub reconciled: usize,
    pub duration: Duration,
}

impl CycleReport {
    /// Scale and relocate counts added together
    pub fn combined(&self) -> BatchReport {
        let mut total = BatchReport::default();
        for report in [self.scale, self.relocate].into_iter().flatten() {
            total.merge(report);
        }
        total
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {} ({})", self.cycle_id, self.mode)?;
        if let Some(scale) = &self.scale {
            write!(f, " scale: {}", scale)?;
        }
        if let Some(relocate) = &self.relocate {
            write!(f, " relocate: {}", relocate)?;
        }
        if self.reconciled > 0 {
            write!(f, " reconciled: {}", self.reconciled)?;
        }
        write!(f, " in {:.1}s", self.duration.as_secs_f64())
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
    scheduler: BatchScheduler,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let scheduler = BatchScheduler::new(ctx.config.threads_limit, ctx.config.scheduler_mode);
        Self { ctx, scheduler }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Create the local scratch and output directories.
    pub async fn prepare_workspace(&self) -> Result<()> {
        self.ctx.fs.create_dir_all(&self.ctx.config.work_dir).await?;
        self.ctx.fs.create_dir_all(&self.ctx.config.output_dir).await?;
        Ok(())
    }

    /// Transform every raw item in the raw directory.
    #[instrument(skip(self))]
    pub async fn run_scale_cycle(&self) -> Result<BatchReport> {
        let config = &self.ctx.config;
        let predicate = Predicate::NamePrefix(config.raw_prefixes.clone());
        let items = Discovery::new(self.ctx.store.clone())
            .discover(&config.raw_dir, &predicate)
            .await?;

        if items.is_empty() {
            info!(directory = %config.raw_dir, "Nothing to process");
            return Ok(BatchReport::default());
        }

        let stage = Arc::new(TransformStage::new(&self.ctx));
        let report = self
            .scheduler
            .run(items, move |item| {
                let stage = stage.clone();
                async move { stage.process(&item).await }
            })
            .await;
        Ok(report)
    }

    /// Relocate every tagged item in the unsorted directory.
    #[instrument(skip(self))]
    pub async fn run_relocate_cycle(&self) -> Result<BatchReport> {
        let config = &self.ctx.config;

        match self.ctx.store.list_all_tags().await {
            Ok(tags) => {
                let names: Vec<&str> = tags.iter().map(|t| t.display_name.as_str()).collect();
                debug!(?names, "Tags known to the store");
            }
            Err(e) => debug!(error = %e, "Could not list tags"),
        }

        let items = Discovery::new(self.ctx.store.clone())
            .discover(&config.unsorted_dir, &Predicate::HasTags)
            .await?;

        if items.is_empty() {
            info!(directory = %config.unsorted_dir, "Nothing to process");
            return Ok(BatchReport::default());
        }

        let relocator = Arc::new(Relocator::new(&self.ctx));
        let report = self
            .scheduler
            .run(items, move |item| {
                let relocator = relocator.clone();
                async move { relocator.relocate(item).await }
            })
            .await;
        Ok(report)
    }

    /// Complete pending partial relocations; returns how many were completed.
    pub async fn reconcile_pending(&self) -> usize {
        if self.ctx.pending.is_empty() {
            return 0;
        }
        self.ctx
            .pending
            .reconcile(self.ctx.store.as_ref(), &self.ctx.events)
            .await
    }

    /// Run one full cycle and publish its start and outcome.
    pub async fn run_cycle(&self, mode: PipelineMode) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(%cycle_id, %mode, "Cycle started");
        self.emit(CycleEvent::Started {
            cycle_id: cycle_id.clone(),
            mode: mode.to_string(),
        });

        let mut report = CycleReport {
            cycle_id: cycle_id.clone(),
            mode,
            scale: None,
            relocate: None,
            reconciled: 0,
            duration: Duration::ZERO,
        };

        if let Err(e) = self.run_stages(mode, &mut report).await {
            error!(%cycle_id, error = %e, "Cycle failed");
            self.emit(CycleEvent::Failed {
                cycle_id,
                message: e.to_string(),
            });
            return Err(e);
        }

        report.duration = started.elapsed();
        let combined = report.combined();
        self.emit(CycleEvent::Completed {
            cycle_id,
            discovered: combined.total as u64,
            succeeded: combined.succeeded as u64,
            failed: (combined.failed + combined.panicked) as u64,
            duration_ms: report.duration.as_millis() as u64,
        });
        info!(%report, "Cycle completed");

        Ok(report)
    }

    /// Run cycles every `poll_interval` until `shutdown` is cancelled.
    ///
    /// A failing cycle is logged and the loop goes on. An in-flight cycle is
    /// always allowed to finish.
    pub async fn run_forever(&self, mode: PipelineMode, shutdown: CancellationToken) -> Result<()> {
        self.prepare_workspace().await?;
        let interval = self.ctx.config.poll_interval;
        info!(%mode, interval_secs = interval.as_secs(), "Starting polling loop");

        loop {
            if let Err(e) = self.run_cycle(mode).await {
                error!(error = %e, "Cycle aborted, retrying after the poll interval");
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Polling loop stopped");
        Ok(())
    }

    async fn run_stages(&self, mode: PipelineMode, report: &mut CycleReport) -> Result<()> {
        if mode.scales() {
            report.scale = Some(self.run_scale_cycle().await?);
        }
        if mode.relocates() {
            report.reconciled = self.reconcile_pending().await;
            report.relocate = Some(self.run_relocate_cycle().await?);
        }
        Ok(())
    }

    fn emit(&self, event: CycleEvent) {
        self.ctx.events.emit(PipelineEvent::Cycle(event)).ok();
    }
}
