//! # Host Bridge Traits
//!
//! Capability contracts between the pipeline core and the concrete
//! implementations it runs on.
//!
//! ## Overview
//!
//! The core never talks to the network, the disk or a secret backend
//! directly. Each of those is a trait defined here and injected at startup,
//! which keeps the core testable against in-memory fakes.
//!
//! ## Traits
//!
//! ### Remote storage
//! - [`RemoteStore`](storage::RemoteStore) - Listing, tags, move, transfer and delete on the remote store
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP used by store providers
//!
//! ### Local resources
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Scratch and output file I/O
//! - [`SecureStore`](storage::SecureStore) - Credentials and deployment constants
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Implementations
//!
//! | Capability | Crate |
//! |------------|-------|
//! | `HttpClient`, `FileSystemAccess`, `SecureStore` | `bridge-desktop` |
//! | `RemoteStore` | `provider-webdav` |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). The one
//! variant with special meaning is `ConnectionLost`: it marks a transient
//! connectivity failure and is the only condition the pipeline retries.
//! Implementations must not use it for anything else.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! by every worker of a batch.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{
    FileSystemAccess, RemoteEntry, RemoteItem, RemoteStore, RemoteTag, SecureStore,
};
pub use time::{Clock, FixedClock, SystemClock};
