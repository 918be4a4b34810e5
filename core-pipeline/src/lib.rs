//! # Core Pipeline
//!
//! The periodic batch pipeline: discover items in a remote store, transform
//! raw images, and relocate tagged results into category directories.
//!
//! ## Components
//!
//! - [`retry::RetryingStore`] retries remote operations that lost their connection
//! - [`discovery::Discovery`] lists a directory and selects candidates
//! - [`scheduler::BatchScheduler`] runs per-item pipelines under a concurrency ceiling
//! - [`transform::TransformStage`] downloads, transforms, uploads and cleans up
//! - [`relocation::RelocationTask`] moves a tagged item and clears its tag
//! - [`orchestrator::Orchestrator`] repeats discover then schedule on an interval
//!
//! All remote calls go through the retrying store held by the
//! [`orchestrator::PipelineContext`].

pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod relocation;
pub mod retry;
pub mod scheduler;
pub mod transform;

pub use discovery::{Discovery, Predicate};
pub use error::{PipelineError, Result};
pub use orchestrator::{CycleReport, Orchestrator, PipelineContext, PipelineMode};
pub use relocation::{
    compute_destination, PartialRelocation, PendingRelocations, RelocationState,
    RelocationTask, Relocator,
};
pub use retry::RetryingStore;
pub use scheduler::{BatchReport, BatchScheduler};
pub use transform::{ImageTransform, LinearScale, TransformOutcome, TransformStage};
