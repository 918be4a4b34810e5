//! # Pipeline Configuration
//!
//! Explicit configuration values for the pipeline, built once at startup and
//! passed to every component.
//!
//! ## Overview
//!
//! [`PipelineConfig`] is constructed through [`PipelineConfigBuilder`], which
//! fills defaults and validates fail-fast with actionable messages. Remote
//! credentials live in a separate [`WebDavSettings`] value so the pipeline
//! configuration can be logged freely.
//!
//! Both can be loaded from any [`SecureStore`]; see [`keys`] for the names.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{PipelineConfig, RetryPolicy};
//!
//! let config = PipelineConfig::builder()
//!     .images_root_dir("Photos")
//!     .raw_dir("_raw")
//!     .unsorted_dir("_unsorted")
//!     .parent_tag("ai")
//!     .raw_prefixes(vec!["raw".to_string()])
//!     .threads_limit(10)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::PipelineConfig;
//!
//! // Required directories are missing
//! let config = PipelineConfig::builder()
//!     .parent_tag("ai")
//!     .build()
//!     .expect("Should fail - missing required settings");
//! ```

use crate::error::{Error, Result};
use bridge_traits::SecureStore;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Maximum concurrent item pipelines when none is configured
pub const DEFAULT_THREADS_LIMIT: usize = 10;

/// Upper bound accepted for the concurrency ceiling
pub const MAX_THREADS_LIMIT: usize = 256;

/// Pause between two discovery cycles when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Sleep between retries of a remote operation after a lost connection
pub const DEFAULT_CONNECTION_BACKOFF: Duration = Duration::from_secs(180);

pub const DEFAULT_SCALE_FACTOR: u32 = 2;

pub const DEFAULT_OUTPUT_NAME_PREFIX: &str = "jh_rescaler";

/// Secret store keys read by [`PipelineConfig::load`] and [`WebDavSettings::load`]
pub mod keys {
    pub const WEBDAV_URL: &str = "webdav_url";
    pub const WEBDAV_USERNAME: &str = "webdav_username";
    pub const WEBDAV_PASSWORD: &str = "webdav_password";
    pub const IMAGES_ROOT_DIR: &str = "images_root_dir";
    pub const RAW_REMOTE_DIR: &str = "raw_remote_dir";
    pub const UNSORTED_REMOTE_DIR: &str = "unsorted_remote_dir";
    pub const PARENT_TAG_VALUE: &str = "parent_tag_value";
    /// JSON array of strings, e.g. `["raw", "image"]`
    pub const RAW_NAMES_PREFIXES: &str = "raw_names_prefixes";
    pub const THREADS_LIMIT: &str = "threads_limit";
    pub const SCALE_FACTOR: &str = "scale_factor";
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_BACKOFF_SECS: &str = "retry_backoff_secs";
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Delay strategy between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `base * 2^(n-1)` before the n-th retry, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given number of consecutive failures (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(failures.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Retry policy for remote operations that lost their connection
///
/// `RetryPolicy::default()` never gives up and sleeps three minutes between
/// attempts. Bound it with `max_attempts` or `max_elapsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` means unbounded
    pub max_attempts: Option<u32>,
    /// Stop once the next sleep would cross this budget; `None` means unbounded
    pub max_elapsed: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Backoff::Fixed(DEFAULT_CONNECTION_BACKOFF))
    }
}

impl RetryPolicy {
    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            max_elapsed: None,
            backoff,
        }
    }

    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Decide whether to retry after `failures` consecutive connection losses
    /// that took `elapsed` so far.
    pub fn should_retry(&self, failures: u32, elapsed: Duration) -> bool {
        if let Some(max) = self.max_attempts {
            if failures >= max {
                return false;
            }
        }
        if let Some(budget) = self.max_elapsed {
            if elapsed.saturating_add(self.backoff.delay(failures)) > budget {
                return false;
            }
        }
        true
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.max_elapsed.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::Config(
                "Retry max_attempts must be at least 1 (the first attempt counts)".to_string(),
            ));
        }
        if let Backoff::Exponential { base, max } = self.backoff {
            if base.is_zero() || max < base {
                return Err(Error::Config(
                    "Exponential backoff needs a non-zero base and max >= base".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler Mode
// ============================================================================

/// How the batch scheduler admits work under the concurrency ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// Fixed workers pulling from a queue; a free worker starts the next item
    #[default]
    WorkerPool,
    /// Fill a batch up to the ceiling and wait for all of it before the next
    Barrier,
}

impl SchedulerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerMode::WorkerPool => "worker-pool",
            SchedulerMode::Barrier => "barrier",
        }
    }
}

impl FromStr for SchedulerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "worker-pool" | "pool" => Ok(SchedulerMode::WorkerPool),
            "barrier" | "batch" => Ok(SchedulerMode::Barrier),
            _ => Err(Error::Config(format!("Unknown scheduler mode: {}", s))),
        }
    }
}

impl std::fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// WebDAV Settings
// ============================================================================

/// Connection settings for the WebDAV server
#[derive(Clone, PartialEq, Eq)]
pub struct WebDavSettings {
    /// Server root, e.g. `https://cloud.example.com`
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for WebDavSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl WebDavSettings {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let settings = Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a secret store
    pub async fn load(store: &dyn SecureStore) -> Result<Self> {
        let base_url = require(store, keys::WEBDAV_URL).await?;
        let username = require(store, keys::WEBDAV_USERNAME).await?;
        let password = require(store, keys::WEBDAV_PASSWORD).await?;
        Self::new(base_url, username, password)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "WebDAV URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.username.is_empty() {
            return Err(Error::Config("WebDAV username cannot be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("WebDAV password cannot be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Configuration shared by discovery, scheduling, transform and relocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Root of the organized tree; relocated items land in `<root>/<category>/`
    pub images_root_dir: String,
    /// Remote directory scanned for raw items
    pub raw_dir: String,
    /// Remote directory receiving transformed items; scanned for tagged items
    pub unsorted_dir: String,
    /// Tag sentinel; tags look like `<parent_tag>:<category>`
    pub parent_tag: String,
    /// Name prefixes identifying raw items
    pub raw_prefixes: Vec<String>,
    /// Concurrency ceiling for item pipelines
    pub threads_limit: usize,
    pub poll_interval: Duration,
    /// Local scratch directory for downloads
    pub work_dir: PathBuf,
    /// Local directory for transform output
    pub output_dir: PathBuf,
    pub scale_factor: u32,
    pub output_name_prefix: String,
    pub retry_policy: RetryPolicy,
    pub scheduler_mode: SchedulerMode,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Start a builder from values held in a secret store
    ///
    /// Callers can override fields (for example from CLI flags) before
    /// calling [`PipelineConfigBuilder::build`].
    pub async fn load(store: &dyn SecureStore) -> Result<PipelineConfigBuilder> {
        let prefixes_json = require(store, keys::RAW_NAMES_PREFIXES).await?;
        let raw_prefixes: Vec<String> = serde_json::from_str(&prefixes_json).map_err(|e| {
            Error::Config(format!(
                "'{}' must be a JSON array of strings like [\"raw\", \"image\"]: {}",
                keys::RAW_NAMES_PREFIXES,
                e
            ))
        })?;

        let mut builder = PipelineConfig::builder()
            .images_root_dir(require(store, keys::IMAGES_ROOT_DIR).await?)
            .raw_dir(require(store, keys::RAW_REMOTE_DIR).await?)
            .unsorted_dir(require(store, keys::UNSORTED_REMOTE_DIR).await?)
            .parent_tag(require(store, keys::PARENT_TAG_VALUE).await?)
            .raw_prefixes(raw_prefixes);

        if let Some(limit) = parse_optional::<usize>(store, keys::THREADS_LIMIT).await? {
            builder = builder.threads_limit(limit);
        }
        if let Some(factor) = parse_optional::<u32>(store, keys::SCALE_FACTOR).await? {
            builder = builder.scale_factor(factor);
        }

        let backoff = parse_optional::<u64>(store, keys::RETRY_BACKOFF_SECS)
            .await?
            .map(|secs| Backoff::Fixed(Duration::from_secs(secs)))
            .unwrap_or(Backoff::Fixed(DEFAULT_CONNECTION_BACKOFF));
        let policy = match parse_optional::<u32>(store, keys::RETRY_MAX_ATTEMPTS).await? {
            Some(attempts) => RetryPolicy::bounded(attempts, backoff),
            None => RetryPolicy::unbounded(backoff),
        };

        Ok(builder.retry_policy(policy))
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("images_root_dir", &self.images_root_dir),
            ("raw_dir", &self.raw_dir),
            ("unsorted_dir", &self.unsorted_dir),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
        }

        if self.raw_dir == self.unsorted_dir {
            return Err(Error::Config(
                "raw_dir and unsorted_dir must differ, otherwise transformed items are \
                 picked up again as raw input"
                    .to_string(),
            ));
        }

        if self.parent_tag.is_empty() || self.parent_tag.contains(':') {
            return Err(Error::Config(format!(
                "parent_tag must be non-empty and must not contain ':', got '{}'",
                self.parent_tag
            )));
        }

        if self.raw_prefixes.is_empty() || self.raw_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(
                "raw_prefixes must contain at least one non-empty prefix".to_string(),
            ));
        }

        if self.threads_limit == 0 || self.threads_limit > MAX_THREADS_LIMIT {
            return Err(Error::Config(format!(
                "threads_limit must be between 1 and {}, got {}",
                MAX_THREADS_LIMIT, self.threads_limit
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        if !(1..=16).contains(&self.scale_factor) {
            return Err(Error::Config(format!(
                "scale_factor must be between 1 and 16, got {}",
                self.scale_factor
            )));
        }

        if self.output_name_prefix.is_empty() || self.output_name_prefix.contains('/') {
            return Err(Error::Config(
                "output_name_prefix must be non-empty and must not contain '/'".to_string(),
            ));
        }

        if self.work_dir == self.output_dir {
            return Err(Error::Config(
                "work_dir and output_dir must be different directories".to_string(),
            ));
        }

        self.retry_policy.validate()
    }
}

/// Builder for constructing [`PipelineConfig`] instances.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    images_root_dir: Option<String>,
    raw_dir: Option<String>,
    unsorted_dir: Option<String>,
    parent_tag: Option<String>,
    raw_prefixes: Vec<String>,
    threads_limit: Option<usize>,
    poll_interval: Option<Duration>,
    work_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    scale_factor: Option<u32>,
    output_name_prefix: Option<String>,
    retry_policy: Option<RetryPolicy>,
    scheduler_mode: SchedulerMode,
}

impl PipelineConfigBuilder {
    pub fn images_root_dir(mut self, dir: impl Into<String>) -> Self {
        self.images_root_dir = Some(dir.into());
        self
    }

    pub fn raw_dir(mut self, dir: impl Into<String>) -> Self {
        self.raw_dir = Some(dir.into());
        self
    }

    pub fn unsorted_dir(mut self, dir: impl Into<String>) -> Self {
        self.unsorted_dir = Some(dir.into());
        self
    }

    pub fn parent_tag(mut self, tag: impl Into<String>) -> Self {
        self.parent_tag = Some(tag.into());
        self
    }

    pub fn raw_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.raw_prefixes = prefixes;
        self
    }

    /// Default: 10
    pub fn threads_limit(mut self, limit: usize) -> Self {
        self.threads_limit = Some(limit);
        self
    }

    /// Default: 300 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Default: `<cwd>/tmp`
    pub fn work_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.work_dir = Some(path.into());
        self
    }

    /// Default: `<cwd>/output`
    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn scale_factor(mut self, factor: u32) -> Self {
        self.scale_factor = Some(factor);
        self
    }

    pub fn output_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_name_prefix = Some(prefix.into());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn scheduler_mode(mut self, mode: SchedulerMode) -> Self {
        self.scheduler_mode = mode;
        self
    }

    /// Builds and validates the final `PipelineConfig`.
    pub fn build(self) -> Result<PipelineConfig> {
        let images_root_dir = required_dir(self.images_root_dir, "images_root_dir")?;
        let raw_dir = required_dir(self.raw_dir, "raw_dir")?;
        let unsorted_dir = required_dir(self.unsorted_dir, "unsorted_dir")?;
        let parent_tag = self.parent_tag.ok_or_else(|| {
            Error::Config("parent_tag is required. Use .parent_tag() to set it.".to_string())
        })?;

        let (work_dir, output_dir) = match (self.work_dir, self.output_dir) {
            (Some(work), Some(output)) => (work, output),
            (work, output) => {
                let cwd = std::env::current_dir().map_err(|e| {
                    Error::Config(format!(
                        "Cannot resolve current directory for default work/output dirs: {}",
                        e
                    ))
                })?;
                (
                    work.unwrap_or_else(|| cwd.join("tmp")),
                    output.unwrap_or_else(|| cwd.join("output")),
                )
            }
        };

        let config = PipelineConfig {
            images_root_dir,
            raw_dir,
            unsorted_dir,
            parent_tag,
            raw_prefixes: self.raw_prefixes,
            threads_limit: self.threads_limit.unwrap_or(DEFAULT_THREADS_LIMIT),
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            work_dir,
            output_dir,
            scale_factor: self.scale_factor.unwrap_or(DEFAULT_SCALE_FACTOR),
            output_name_prefix: self
                .output_name_prefix
                .unwrap_or_else(|| DEFAULT_OUTPUT_NAME_PREFIX.to_string()),
            retry_policy: self.retry_policy.unwrap_or_default(),
            scheduler_mode: self.scheduler_mode,
        };

        config.validate()?;

        Ok(config)
    }
}

/// Store-relative directory without surrounding slashes
fn normalize_dir(dir: &str) -> String {
    dir.trim().trim_matches('/').to_string()
}

fn required_dir(value: Option<String>, name: &str) -> Result<String> {
    value.map(|v| normalize_dir(&v)).ok_or_else(|| {
        Error::Config(format!("{} is required. Use .{}() to set it.", name, name))
    })
}

async fn read_string(store: &dyn SecureStore, key: &str) -> Result<Option<String>> {
    match store.get_secret(key).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map(|s| Some(s.trim().to_string()))
            .map_err(|_| Error::Config(format!("Setting '{}' is not valid UTF-8", key))),
        None => Ok(None),
    }
}

async fn require(store: &dyn SecureStore, key: &str) -> Result<String> {
    read_string(store, key).await?.ok_or_else(|| {
        Error::Config(format!(
            "Missing required setting '{}'. Export IMGFLOW_{} or store it in the \
             configured secret backend.",
            key,
            key.to_uppercase()
        ))
    })
}

async fn parse_optional<T>(store: &dyn SecureStore, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match read_string(store, key).await? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for '{}': {}", key, e))),
        None => Ok(None),
    }
}
