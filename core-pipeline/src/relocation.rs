//! Tag-driven relocation
//!
//! A [`RelocationTask`] walks one item through
//! `Discovered → TagRead → TargetComputed → Moved → TagCleared → Done`,
//! or `Discovered → Skipped` when the item carries no tags at processing time.
//! Only the first tag is used. The tag is cleared only after the move has
//! been confirmed at the destination.
//!
//! A failure to clear the tag after a successful move cannot be rolled back.
//! The item is recorded in [`PendingRelocations`] and reported as
//! `MovedButTagged`; the next relocation cycle retries the tag removal.

use bridge_traits::storage::{RemoteItem, RemoteStore, RemoteTag};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::PipelineConfig;
use core_runtime::events::{EventBus, PipelineEvent, RelocationEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::orchestrator::PipelineContext;

// ============================================================================
// Relocation State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationState {
    Discovered,
    TagRead,
    TargetComputed,
    Moved,
    TagCleared,
    Done,
    /// No tag at processing time; the item was left untouched
    Skipped,
}

impl RelocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelocationState::Discovered => "discovered",
            RelocationState::TagRead => "tag_read",
            RelocationState::TargetComputed => "target_computed",
            RelocationState::Moved => "moved",
            RelocationState::TagCleared => "tag_cleared",
            RelocationState::Done => "done",
            RelocationState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelocationState::Done | RelocationState::Skipped)
    }
}

impl fmt::Display for RelocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Destination
// ============================================================================

/// Where a tagged item goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub category: String,
    pub path: String,
}

/// Compute `<root>/<category>/<basename of source_path>` from a tag name of
/// the form `<marker>:<category>`.
///
/// One leading `<marker>:` is stripped. A tag without the marker prefix is
/// used as the category unchanged.
///
/// # Errors
///
/// `EmptyCategory` when nothing is left of the tag name, `InvalidCategory`
/// when the category has a `.` or `..` segment, and `MalformedEntry` when the
/// source path has no file name.
pub fn compute_destination(
    root: &str,
    marker: &str,
    display_name: &str,
    source_path: &str,
) -> Result<Destination> {
    let prefix = format!("{}:", marker);
    let category = match display_name.strip_prefix(prefix.as_str()) {
        Some(rest) => rest,
        None => {
            warn!(tag = display_name, marker, "Tag lacks the marker prefix, using it as category");
            display_name
        }
    };
    let category = category.trim().trim_matches('/');
    if category.is_empty() {
        return Err(PipelineError::EmptyCategory {
            tag: display_name.to_string(),
        });
    }
    if category
        .split('/')
        .any(|segment| matches!(segment.trim(), "." | ".."))
    {
        return Err(PipelineError::InvalidCategory {
            tag: display_name.to_string(),
        });
    }

    let basename = source_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PipelineError::MalformedEntry {
            reason: "path has no file name".to_string(),
            raw: source_path.to_string(),
        })?;

    Ok(Destination {
        category: category.to_string(),
        path: format!("{}/{}/{}", root.trim_end_matches('/'), category, basename),
    })
}

// ============================================================================
// Relocation Task
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelocationTask {
    item: RemoteItem,
    state: RelocationState,
    tag: Option<RemoteTag>,
    destination: Option<Destination>,
}

impl RelocationTask {
    pub fn new(item: RemoteItem) -> Self {
        Self {
            item,
            state: RelocationState::Discovered,
            tag: None,
            destination: None,
        }
    }

    pub fn item(&self) -> &RemoteItem {
        &self.item
    }

    pub fn state(&self) -> RelocationState {
        self.state
    }

    /// First tag read from the store
    pub fn tag(&self) -> Option<&RemoteTag> {
        self.tag.as_ref()
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// Query the item's tags and keep the first one.
    ///
    /// Tags are always re-read here, even if discovery already saw some, so
    /// the decision uses the store's state at processing time.
    pub async fn read_tags(mut self, store: &dyn RemoteStore) -> Result<Self> {
        self.validate_transition(RelocationState::TagRead)?;

        let tags = store.get_tags(&self.item.id).await?;
        match tags.into_iter().next() {
            Some(first) => {
                self.tag = Some(first);
                self.state = RelocationState::TagRead;
            }
            None => {
                self.validate_transition(RelocationState::Skipped)?;
                self.state = RelocationState::Skipped;
            }
        }
        Ok(self)
    }

    pub fn compute_target(mut self, root: &str, marker: &str) -> Result<Self> {
        self.validate_transition(RelocationState::TargetComputed)?;

        let tag = self.tag.as_ref().ok_or_else(|| self.missing("tag"))?;
        let destination = compute_destination(root, marker, &tag.display_name, &self.item.path)?;
        debug!(item = %self.item.path, destination = %destination.path, "Target computed");

        self.destination = Some(destination);
        self.state = RelocationState::TargetComputed;
        Ok(self)
    }

    /// Move the item, creating the category directory first, and confirm the
    /// destination is visible.
    pub async fn move_item(mut self, store: &dyn RemoteStore) -> Result<Self> {
        self.validate_transition(RelocationState::Moved)?;

        let destination = self
            .destination
            .as_ref()
            .ok_or_else(|| self.missing("destination"))?;
        if let Some((parent, _)) = destination.path.rsplit_once('/') {
            store.create_directory(parent).await?;
        }

        store.move_item(&self.item.path, &destination.path).await?;
        if !store.exists(&destination.path).await? {
            return Err(PipelineError::MoveNotConfirmed(destination.path.clone()));
        }

        self.state = RelocationState::Moved;
        Ok(self)
    }

    /// Unassign the tag read in `read_tags`.
    ///
    /// # Errors
    ///
    /// Any failure here is a `PartialRelocation`: the item already sits at
    /// its destination.
    pub async fn clear_tag(mut self, store: &dyn RemoteStore) -> Result<Self> {
        self.validate_transition(RelocationState::TagCleared)?;

        let (tag, destination) = match (&self.tag, &self.destination) {
            (Some(tag), Some(destination)) => (tag, destination),
            _ => return Err(self.missing("tag or destination")),
        };

        if let Err(e) = store.unassign_tag(&self.item.id, &tag.id).await {
            return Err(PipelineError::PartialRelocation {
                item_id: self.item.id.clone(),
                destination: destination.path.clone(),
                tag_id: tag.id.clone(),
                message: e.to_string(),
            });
        }

        self.state = RelocationState::TagCleared;
        Ok(self)
    }

    pub fn finish(mut self) -> Result<Self> {
        self.validate_transition(RelocationState::Done)?;
        self.state = RelocationState::Done;
        Ok(self)
    }

    /// Ledger record describing this task if its tag clear fails
    pub fn partial_record(&self, recorded_at: DateTime<Utc>) -> Option<PartialRelocation> {
        let (tag, destination) = (self.tag.as_ref()?, self.destination.as_ref()?);
        Some(PartialRelocation {
            item_id: self.item.id.clone(),
            item_name: self.item.name.clone(),
            destination: destination.path.clone(),
            tag_id: tag.id.clone(),
            tag_name: tag.display_name.clone(),
            recorded_at,
        })
    }

    fn missing(&self, what: &str) -> PipelineError {
        PipelineError::InvalidStateTransition {
            from: self.state.as_str().to_string(),
            to: "next".to_string(),
            reason: format!("{} not set", what),
        }
    }

    fn validate_transition(&self, to: RelocationState) -> Result<()> {
        let valid = match (self.state, to) {
            (RelocationState::Discovered, RelocationState::TagRead) => true,
            (RelocationState::Discovered, RelocationState::Skipped) => true,
            (RelocationState::TagRead, RelocationState::TargetComputed) => true,
            (RelocationState::TargetComputed, RelocationState::Moved) => true,
            (RelocationState::Moved, RelocationState::TagCleared) => true,
            (RelocationState::TagCleared, RelocationState::Done) => true,

            // Terminal states cannot transition
            (RelocationState::Done, _) => false,
            (RelocationState::Skipped, _) => false,

            _ => false,
        };

        if !valid {
            return Err(PipelineError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.state, to),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Pending Relocations
// ============================================================================

/// An item that was moved but still carries its category tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRelocation {
    pub item_id: String,
    pub item_name: String,
    pub destination: String,
    pub tag_id: String,
    pub tag_name: String,
    pub recorded_at: DateTime<Utc>,
}

/// In-process ledger of moved-but-tagged items, keyed by item id
#[derive(Debug, Clone, Default)]
pub struct PendingRelocations {
    records: Arc<Mutex<HashMap<String, PartialRelocation>>>,
}

impl PendingRelocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: PartialRelocation) {
        self.lock().insert(record.item_id.clone(), record);
    }

    pub fn remove(&self, item_id: &str) -> Option<PartialRelocation> {
        self.lock().remove(item_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records ordered by item id
    pub fn snapshot(&self) -> Vec<PartialRelocation> {
        let mut records: Vec<_> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        records
    }

    /// Retry the tag removal of every recorded item.
    ///
    /// Returns how many records were completed. A record is dropped once its
    /// tag is cleared, or when its destination no longer exists. Records
    /// whose checks fail stay for the next pass.
    #[instrument(skip_all, fields(pending = self.len()))]
    pub async fn reconcile(&self, store: &dyn RemoteStore, events: &EventBus) -> usize {
        let mut reconciled = 0;

        for record in self.snapshot() {
            match store.exists(&record.destination).await {
                Ok(true) => match store.unassign_tag(&record.item_id, &record.tag_id).await {
                    Ok(()) => {
                        self.remove(&record.item_id);
                        reconciled += 1;
                        info!(item_id = %record.item_id, tag = %record.tag_name, "Partial relocation reconciled");
                        events
                            .emit(PipelineEvent::Relocation(RelocationEvent::Reconciled {
                                item_id: record.item_id.clone(),
                                tag_id: record.tag_id.clone(),
                            }))
                            .ok();
                    }
                    Err(e) => {
                        warn!(item_id = %record.item_id, error = %e, "Tag still cannot be cleared");
                    }
                },
                Ok(false) => {
                    warn!(
                        item_id = %record.item_id,
                        destination = %record.destination,
                        "Destination vanished, dropping pending relocation"
                    );
                    self.remove(&record.item_id);
                }
                Err(e) => {
                    warn!(item_id = %record.item_id, error = %e, "Cannot check destination");
                }
            }
        }

        reconciled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PartialRelocation>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Relocator
// ============================================================================

/// Runs relocation tasks against the shared context and publishes outcomes
pub struct Relocator {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: Arc<PipelineConfig>,
    events: EventBus,
    pending: PendingRelocations,
}

impl Relocator {
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            config: ctx.config.clone(),
            events: ctx.events.clone(),
            pending: ctx.pending.clone(),
        }
    }

    /// Relocate one item; returns the task in its terminal state.
    #[instrument(skip(self, item), fields(item = %item.path, item_id = %item.id))]
    pub async fn relocate(&self, item: RemoteItem) -> Result<RelocationTask> {
        let item_id = item.id.clone();
        let result = self.drive(RelocationTask::new(item)).await;

        let event = match &result {
            Ok(task) if task.state() == RelocationState::Skipped => {
                info!("No tag at processing time, leaving item in place");
                RelocationEvent::Skipped {
                    item_id,
                    reason: "no tags".to_string(),
                }
            }
            Ok(task) => {
                let destination = task.destination().cloned().unwrap_or(Destination {
                    category: String::new(),
                    path: String::new(),
                });
                info!(destination = %destination.path, "Item relocated");
                RelocationEvent::Relocated {
                    item_id,
                    destination: destination.path,
                    category: destination.category,
                }
            }
            Err(PipelineError::PartialRelocation {
                destination,
                tag_id,
                message,
                ..
            }) => {
                error!(%destination, %tag_id, error = %message, "Item moved but its tag could not be cleared");
                RelocationEvent::MovedButTagged {
                    item_id,
                    destination: destination.clone(),
                    tag_id: tag_id.clone(),
                    message: message.clone(),
                }
            }
            Err(e) => {
                error!(error = %e, "Relocation failed");
                RelocationEvent::Failed {
                    item_id,
                    message: e.to_string(),
                }
            }
        };
        self.events.emit(PipelineEvent::Relocation(event)).ok();

        result
    }

    async fn drive(&self, task: RelocationTask) -> Result<RelocationTask> {
        let store = self.store.as_ref();

        let task = task.read_tags(store).await?;
        if task.state() == RelocationState::Skipped {
            return Ok(task);
        }

        let task = task
            .compute_target(&self.config.images_root_dir, &self.config.parent_tag)?
            .move_item(store)
            .await?;

        let record = task.partial_record(self.clock.now());
        match task.clear_tag(store).await {
            Ok(task) => task.finish(),
            Err(e) => {
                if let (PipelineError::PartialRelocation { .. }, Some(record)) = (&e, record) {
                    self.pending.record(record);
                }
                Err(e)
            }
        }
    }
}
