//! Storage Abstractions
//!
//! Provides traits for local scratch file I/O, secret lookup, and the remote
//! hierarchical store the pipeline reads from and writes to.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

// ============================================================================
// Local File System
// ============================================================================

/// Local file system access trait
///
/// Used for the scratch and output directories of the transform stage.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn stage(fs: &dyn FileSystemAccess, dir: &Path, data: Bytes) -> Result<()> {
///     fs.create_dir_all(dir).await?;
///     fs.write_file(&dir.join("input.jpg"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;
}

// ============================================================================
// Secrets
// ============================================================================

/// Secret lookup trait
///
/// Abstracts where credentials and deployment constants come from:
/// - Environment variables (containers, systemd units)
/// - OS keychain (workstations)
///
/// # Security Requirements
///
/// Implementations MUST never log secret values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

// ============================================================================
// Remote Store
// ============================================================================

/// A classification tag attached to a remote item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTag {
    /// Opaque tag identifier
    pub id: String,
    /// Display name, e.g. `ai:cats`
    pub display_name: String,
}

impl RemoteTag {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// One raw directory listing entry as returned by the store
///
/// Every field is optional because remote listings are not trusted; the
/// discovery step decides which entries are well formed. `raw` keeps the
/// original payload for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Store-relative path, e.g. `_raw/raw_photo1.jpg`
    pub path: Option<String>,
    pub name: Option<String>,
    pub is_directory: Option<bool>,
    pub id: Option<String>,
    pub raw: String,
}

/// A validated remote item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub path: String,
    pub name: String,
    pub id: String,
    pub is_directory: bool,
    /// Tags in store order; empty unless the producer queried them
    pub tags: Vec<RemoteTag>,
}

impl RemoteItem {
    /// Last path segment of the item path
    pub fn basename(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }
}

/// Remote hierarchical store capability
///
/// Paths are store-relative and use `/` as separator. Implementations must
/// report transient connectivity failures as `BridgeError::ConnectionLost`
/// and nothing else under that variant.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the direct children of a directory
    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>>;

    /// Tags assigned to an item, in store order
    async fn get_tags(&self, item_id: &str) -> Result<Vec<RemoteTag>>;

    /// Every tag known to the store
    async fn list_all_tags(&self) -> Result<Vec<RemoteTag>>;

    /// Move an item without overwriting
    ///
    /// Returns `BridgeError::AlreadyExists` if the destination is taken.
    async fn move_item(&self, source_path: &str, destination_path: &str) -> Result<()>;

    /// Remove a tag from an item
    async fn unassign_tag(&self, item_id: &str, tag_id: &str) -> Result<()>;

    /// Download a remote file to a local path
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Upload a local file to a remote path
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Delete a remote file or directory
    async fn delete(&self, remote_path: &str) -> Result<()>;

    /// Check whether a remote path exists
    async fn exists(&self, remote_path: &str) -> Result<bool>;

    /// Create a directory; succeeds if it already exists
    async fn create_directory(&self, remote_path: &str) -> Result<()>;
}
