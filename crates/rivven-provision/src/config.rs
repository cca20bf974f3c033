//! Provider configuration

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::connection::{redact_url, ConnectionConfig};
use crate::error::Result;
use crate::features::ServerVersion;

fn default_application_name() -> String {
    "rivven-provision".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Settings for connecting the reconciler to a cluster
#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Connection URL of a maintenance database, e.g. `postgres://admin@db/postgres`
    #[validate(url(message = "url must be a valid connection URL"))]
    pub url: String,

    /// Connecting principal; queried with `CURRENT_USER` when absent
    #[serde(default)]
    pub username: Option<String>,

    /// Server version to assume instead of probing, e.g. `"13"` or `"9.6.5"`
    #[serde(default)]
    pub expected_version: Option<String>,

    /// Application name reported to the server
    #[serde(default = "default_application_name")]
    #[validate(length(min = 1, max = 63))]
    pub application_name: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("url", &redact_url(&self.url))
            .field("username", &self.username)
            .field("expected_version", &self.expected_version)
            .field("application_name", &self.application_name)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl ProviderConfig {
    /// Configuration for `url` with defaults for everything else
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            expected_version: None,
            application_name: default_application_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Set the connecting principal
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Assume a server version instead of probing
    pub fn with_expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }

    /// Role name of the connecting principal.
    ///
    /// Azure-style logins carry an `@server` suffix that is not part of the
    /// role name.
    pub fn database_username(&self) -> Option<&str> {
        self.username
            .as_deref()
            .map(|user| user.split_once('@').map_or(user, |(role, _)| role))
            .filter(|role| !role.is_empty())
    }

    /// Parsed `expected_version`
    pub fn expected_server_version(&self) -> Result<Option<ServerVersion>> {
        self.expected_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::parse)
            .transpose()
    }

    /// Validate and derive the connection settings
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        self.validate()?;
        Ok(ConnectionConfig::new(&self.url)
            .with_connect_timeout(self.connect_timeout_ms)
            .with_application_name(&self.application_name))
    }
}
