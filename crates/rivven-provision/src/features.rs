//! Server capability probe
//!
//! A [`FeatureSet`] is derived once from the server version and handed to
//! every component that needs to decide whether a clause may be emitted.

use std::fmt;
use std::str::FromStr;

use crate::connection::Executor;
use crate::error::{Error, Result};

/// Query used to discover the server version
pub const SERVER_VERSION_SQL: &str = "SELECT current_setting('server_version_num')::integer";

/// PostgreSQL server version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version (only meaningful before 10)
    pub patch: u32,
}

impl ServerVersion {
    /// Create a version
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decode `server_version_num` (90605 is 9.6.5, 130004 is 13.4)
    pub fn from_version_num(num: u32) -> Self {
        if num >= 100_000 {
            Self::new(num / 10_000, num % 10_000, 0)
        } else {
            Self::new(num / 10_000, (num / 100) % 100, num % 100)
        }
    }

    /// Ask the server for its version
    pub async fn probe<E: Executor + ?Sized>(executor: &E) -> Result<Self> {
        let row = executor
            .query_row(SERVER_VERSION_SQL, &[])
            .await
            .map_err(|e| e.context("error detecting server version"))?
            .ok_or_else(|| Error::internal("server_version_num returned no row"))?;
        let num = row.int(0)?;
        let num = u32::try_from(num)
            .map_err(|_| Error::internal(format!("invalid server_version_num {}", num)))?;
        Ok(Self::from_version_num(num))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = Error;

    /// Parse `13`, `9.6`, `9.6.5` or `14beta1`; trailing text after the
    /// numeric components is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u32; 3];
        let mut seen = 0;
        for (slot, raw) in parts.iter_mut().zip(s.trim().split('.')) {
            let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            *slot = digits
                .parse()
                .map_err(|_| Error::config(format!("invalid server version {:?}", s)))?;
            seen += 1;
            if digits.len() != raw.len() {
                break;
            }
        }
        if seen == 0 {
            return Err(Error::config(format!("invalid server version {:?}", s)));
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

/// Optional server behaviour the reconciler depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `ALLOW_CONNECTIONS` database option
    DatabaseAllowConnections,
    /// `IS_TEMPLATE` database option
    DatabaseIsTemplate,
    /// `DROP DATABASE ... WITH (FORCE)`
    ForceDropDatabase,
    /// `pg_stat_activity.pid` (older servers call it `procpid`)
    Pid,
}

impl Feature {
    /// All known features
    pub const ALL: [Feature; 4] = [
        Feature::DatabaseAllowConnections,
        Feature::DatabaseIsTemplate,
        Feature::ForceDropDatabase,
        Feature::Pid,
    ];

    /// First server version supporting the feature
    pub const fn min_version(self) -> ServerVersion {
        match self {
            Self::DatabaseAllowConnections | Self::DatabaseIsTemplate => {
                ServerVersion::new(9, 5, 0)
            }
            Self::ForceDropDatabase => ServerVersion::new(13, 0, 0),
            Self::Pid => ServerVersion::new(9, 2, 0),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatabaseAllowConnections => write!(f, "database ALLOW_CONNECTIONS"),
            Self::DatabaseIsTemplate => write!(f, "database IS_TEMPLATE"),
            Self::ForceDropDatabase => write!(f, "DROP DATABASE WITH (FORCE)"),
            Self::Pid => write!(f, "pg_stat_activity.pid"),
        }
    }
}

/// Capabilities of the connected server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    version: ServerVersion,
}

impl FeatureSet {
    /// Derive the feature set for a server version
    pub const fn for_version(version: ServerVersion) -> Self {
        Self { version }
    }

    /// Probe the server and derive its feature set
    pub async fn probe<E: Executor + ?Sized>(executor: &E) -> Result<Self> {
        ServerVersion::probe(executor).await.map(Self::for_version)
    }

    /// Server version the set was derived from
    pub const fn version(&self) -> ServerVersion {
        self.version
    }

    /// Whether the server supports `feature`
    pub fn supports(&self, feature: Feature) -> bool {
        self.version >= feature.min_version()
    }

    /// Fail with [`Error::UnsupportedFeature`] unless `feature` is supported
    pub fn require(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(Error::unsupported(feature, self.version))
        }
    }

    /// Name of the backend pid column in `pg_stat_activity`
    pub fn pid_column(&self) -> &'static str {
        if self.supports(Feature::Pid) {
            "pid"
        } else {
            "procpid"
        }
    }
}
