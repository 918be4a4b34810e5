//! # WebDAV Provider
//!
//! Implements `RemoteStore` for a Nextcloud server over WebDAV.
//!
//! ## Overview
//!
//! - Directory listing with `PROPFIND` and file ids
//! - System tag lookup, listing and unassignment
//! - `MOVE` without overwrite, `MKCOL`, `PUT`, `GET`, `DELETE`
//! - HTTP Basic authentication on every request
//!
//! Every request is a single attempt. Wrap the connector in the pipeline's
//! retrying store to survive connection loss.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::NextcloudConnector;
pub use error::{Result, WebDavError};
