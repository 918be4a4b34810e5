//! # Core Runtime
//!
//! Runtime infrastructure shared by every pipeline crate:
//! - Logging and tracing setup
//! - Pipeline configuration and retry policy
//! - Event bus for stage outcomes
//!
//! Components receive their configuration explicitly; nothing in here reads
//! global state after startup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
