//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for servers and
//! workstations (Linux, macOS, Windows).
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `SecureStore` backed by environment variables, or by the OS keychain
//!   through the `keyring` crate
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{EnvSecureStore, ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = ReqwestHttpClient::new()?;
//! let fs = TokioFileSystem::new();
//! let secrets = EnvSecureStore::new();
//! ```

mod env_store;
mod filesystem;
mod http;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use env_store::{EnvSecureStore, DEFAULT_ENV_PREFIX};
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
