//! Secret lookup from environment variables

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use std::collections::BTreeMap;
use tracing::debug;

/// Default variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "IMGFLOW_";

/// Read-only secret store backed by a snapshot of environment variables
///
/// Key `webdav_password` is looked up as `IMGFLOW_WEBDAV_PASSWORD`. The
/// environment is captured once at construction.
pub struct EnvSecureStore {
    prefix: String,
    vars: BTreeMap<String, String>,
}

impl EnvSecureStore {
    /// Snapshot the process environment with the default prefix
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Snapshot the process environment with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from explicit variables instead of the process environment
    pub fn from_vars<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.into();
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&prefix))
            .collect();
        Self { prefix, vars }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

impl Default for EnvSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for EnvSecureStore {
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let name = self.var_name(key);
        let value = self.vars.get(&name).map(|v| v.clone().into_bytes());
        debug!(key = key, var = %name, found = value.is_some(), "Looked up secret in environment");
        Ok(value)
    }
}
