//! Candidate discovery
//!
//! Lists a remote directory and selects the items a pipeline should process.
//! Malformed listing entries are logged with their raw payload and skipped;
//! they never abort the scan.

use bridge_traits::storage::{RemoteEntry, RemoteItem, RemoteStore};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{PipelineError, Result};

/// Selection rule applied to each listed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Files (not directories) whose name starts with one of the prefixes
    NamePrefix(Vec<String>),
    /// Entries carrying at least one tag; tags are read per item
    HasTags,
}

pub struct Discovery {
    store: Arc<dyn RemoteStore>,
}

impl Discovery {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// List `directory` and return the entries matching `predicate`, in
    /// listing order.
    ///
    /// # Errors
    ///
    /// Fails only when the listing itself fails. Per-entry problems are
    /// logged and the entry is skipped.
    #[instrument(skip(self, predicate))]
    pub async fn discover(&self, directory: &str, predicate: &Predicate) -> Result<Vec<RemoteItem>> {
        let entries = self.store.list(directory).await?;
        let listed = entries.len();
        let mut selected = Vec::new();

        for entry in entries {
            let item = match validate_entry(&entry) {
                Ok(item) => item,
                Err(e) => {
                    warn!(raw = %entry.raw, error = %e, "Skipping malformed listing entry");
                    continue;
                }
            };

            match predicate {
                Predicate::NamePrefix(prefixes) => {
                    if !item.is_directory && prefixes.iter().any(|p| item.name.starts_with(p.as_str())) {
                        selected.push(item);
                    }
                }
                Predicate::HasTags => match self.store.get_tags(&item.id).await {
                    Ok(tags) if !tags.is_empty() => selected.push(RemoteItem { tags, ..item }),
                    Ok(_) => debug!(item = %item.path, "No tags"),
                    Err(e) => {
                        warn!(item = %item.path, item_id = %item.id, error = %e, "Failed to read tags, skipping item");
                    }
                },
            }
        }

        info!(directory, listed, selected = selected.len(), "Discovery finished");
        Ok(selected)
    }
}

/// Turn a raw listing entry into a [`RemoteItem`], or explain why it is malformed
pub fn validate_entry(entry: &RemoteEntry) -> Result<RemoteItem> {
    let malformed = |reason: &str| PipelineError::MalformedEntry {
        reason: reason.to_string(),
        raw: entry.raw.clone(),
    };

    let path = entry
        .path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| malformed("missing path"))?;
    let is_directory = entry.is_directory.ok_or_else(|| malformed("missing resource type"))?;
    let id = entry
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("missing id"))?;

    let basename = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    if basename.is_empty() {
        return Err(malformed("path has no file name"));
    }
    let name = entry
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(basename);

    Ok(RemoteItem {
        path: path.to_string(),
        name: name.to_string(),
        id: id.to_string(),
        is_directory,
        tags: Vec::new(),
    })
}
