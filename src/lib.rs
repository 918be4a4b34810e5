//! # imgflow
//!
//! Periodic image pipeline for a Nextcloud share:
//!
//! - `scale`: raw images matching a name prefix are upscaled and uploaded to
//!   the unsorted directory; the raw original is removed.
//! - `relocate`: items in the unsorted directory that carry a
//!   `<parent tag>:<category>` tag are moved to `<images root>/<category>/`
//!   and the tag is cleared.
//!
//! The pipeline itself lives in `core-pipeline`. This crate reads settings,
//! builds the concrete capabilities and runs the orchestrator from the CLI.

pub mod bootstrap;
pub mod cli;

pub use bootstrap::{build_context, load_config, secret_store, spawn_event_logger, Overrides};
pub use cli::{Cli, Command, SecretSource};
