//! Desired and observed state of a managed database

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::Result;

/// Template used when the desired state does not name one
pub const DEFAULT_TEMPLATE: &str = "template0";

/// Encoding used when the desired state does not name one
pub const DEFAULT_ENCODING: &str = "UTF8";

/// Connection limit meaning "no limit"
pub const UNLIMITED_CONNECTIONS: i32 = -1;

fn default_connection_limit() -> i32 {
    UNLIMITED_CONNECTIONS
}

fn default_true() -> bool {
    true
}

fn validate_database_name(name: &str) -> std::result::Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new("empty_name")
            .with_message("database name must not be empty".into()));
    }
    if name.contains('\0') {
        return Err(ValidationError::new("invalid_name")
            .with_message("database name must not contain NUL".into()));
    }
    Ok(())
}

/// Declared state of a database.
///
/// Optional string attributes other than `owner` distinguish three states:
/// `None` leaves the clause out, `"DEFAULT"` (any case) asks for the engine
/// default, and any other value is used as given. `owner` is always a role
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Database name
    #[validate(custom(function = "validate_database_name"))]
    pub name: String,

    /// Owning role; `None` or empty defers to the connecting principal
    #[serde(default)]
    pub owner: Option<String>,

    /// Template to clone from (create-time only)
    #[serde(default)]
    pub template: Option<String>,

    /// Character set encoding (create-time only)
    #[serde(default)]
    pub encoding: Option<String>,

    /// `LC_COLLATE` (create-time only)
    #[serde(default)]
    pub lc_collate: Option<String>,

    /// `LC_CTYPE` (create-time only)
    #[serde(default)]
    pub lc_ctype: Option<String>,

    /// Default tablespace
    #[serde(default)]
    pub tablespace_name: Option<String>,

    /// Concurrent connection limit, -1 for unlimited
    #[serde(default = "default_connection_limit")]
    #[validate(range(min = -1, message = "connection limit must be -1 or greater"))]
    pub connection_limit: i32,

    /// If false nobody can connect to the database
    #[serde(default = "default_true")]
    pub allow_connections: bool,

    /// If true the database can be cloned by any role with CREATEDB
    #[serde(default)]
    pub is_template: bool,

    /// Reassign objects owned by the previous owner when the owner changes
    #[serde(default)]
    pub alter_object_ownership: bool,

    /// Create the database with colocation enabled (create-time only)
    #[serde(default)]
    pub colocation: bool,
}

impl DatabaseSpec {
    /// Desired state with every optional attribute unset
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            template: None,
            encoding: None,
            lc_collate: None,
            lc_ctype: None,
            tablespace_name: None,
            connection_limit: UNLIMITED_CONNECTIONS,
            allow_connections: true,
            is_template: false,
            alter_object_ownership: false,
            colocation: false,
        }
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the template
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Set the encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set `LC_COLLATE`
    pub fn with_lc_collate(mut self, collate: impl Into<String>) -> Self {
        self.lc_collate = Some(collate.into());
        self
    }

    /// Set `LC_CTYPE`
    pub fn with_lc_ctype(mut self, ctype: impl Into<String>) -> Self {
        self.lc_ctype = Some(ctype.into());
        self
    }

    /// Set the tablespace
    pub fn with_tablespace(mut self, tablespace: impl Into<String>) -> Self {
        self.tablespace_name = Some(tablespace.into());
        self
    }

    /// Set the connection limit
    pub fn with_connection_limit(mut self, limit: i32) -> Self {
        self.connection_limit = limit;
        self
    }

    /// Set `ALLOW_CONNECTIONS`
    pub fn with_allow_connections(mut self, allow: bool) -> Self {
        self.allow_connections = allow;
        self
    }

    /// Set `IS_TEMPLATE`
    pub fn with_is_template(mut self, is_template: bool) -> Self {
        self.is_template = is_template;
        self
    }

    /// Reassign dependent objects on owner change
    pub fn with_alter_object_ownership(mut self, alter: bool) -> Self {
        self.alter_object_ownership = alter;
        self
    }

    /// Enable colocation
    pub fn with_colocation(mut self, colocation: bool) -> Self {
        self.colocation = colocation;
        self
    }

    /// Explicitly requested owner, ignoring empty strings
    pub fn requested_owner(&self) -> Option<&str> {
        self.owner.as_deref().filter(|o| !o.is_empty())
    }

    /// Validate the desired state
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}

/// State of a database as read back from the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedDatabase {
    /// Database name
    pub name: String,
    /// Owning role
    pub owner: String,
    /// Template the database was created from (not retained by the server)
    pub template: String,
    /// Character set encoding
    pub encoding: String,
    /// `LC_COLLATE`
    pub lc_collate: String,
    /// `LC_CTYPE`
    pub lc_ctype: String,
    /// Default tablespace
    pub tablespace_name: String,
    /// Concurrent connection limit
    pub connection_limit: i32,
    /// `ALLOW_CONNECTIONS`, when the server supports it
    pub allow_connections: Option<bool>,
    /// `IS_TEMPLATE`, when the server supports it
    pub is_template: Option<bool>,
}

/// Identity and last observed state of a managed database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseState {
    /// Identity (the database name); `None` once the database is gone
    pub id: Option<String>,
    /// Catalog state from the most recent read
    pub observed: Option<ObservedDatabase>,
}

impl DatabaseState {
    /// State addressing an existing database by name
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            observed: None,
        }
    }

    /// Whether the database is known to exist
    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    /// Forget the database
    pub fn clear(&mut self) {
        self.id = None;
        self.observed = None;
    }
}

/// Attribute of a [`DatabaseSpec`] that can change in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// `name`
    Name,
    /// `owner`
    Owner,
    /// `tablespace_name`
    Tablespace,
    /// `connection_limit`
    ConnectionLimit,
    /// `allow_connections`
    AllowConnections,
    /// `is_template`
    IsTemplate,
}

/// Prior and desired state of one update
#[derive(Debug, Clone, Copy)]
pub struct SpecChange<'a> {
    /// State recorded by the previous reconciliation
    pub prior: &'a DatabaseSpec,
    /// State to converge to
    pub desired: &'a DatabaseSpec,
}

impl<'a> SpecChange<'a> {
    /// Pair prior and desired state
    pub fn new(prior: &'a DatabaseSpec, desired: &'a DatabaseSpec) -> Self {
        Self { prior, desired }
    }

    /// Whether `attribute` differs between prior and desired state
    pub fn has_change(&self, attribute: Attribute) -> bool {
        let (p, d) = (self.prior, self.desired);
        match attribute {
            Attribute::Name => p.name != d.name,
            Attribute::Owner => p.owner != d.owner,
            Attribute::Tablespace => p.tablespace_name != d.tablespace_name,
            Attribute::ConnectionLimit => p.connection_limit != d.connection_limit,
            Attribute::AllowConnections => p.allow_connections != d.allow_connections,
            Attribute::IsTemplate => p.is_template != d.is_template,
        }
    }

    /// Attributes fixed at creation that differ; these need a replacement
    pub fn immutable_changes(&self) -> Vec<&'static str> {
        let (p, d) = (self.prior, self.desired);
        let mut changed = Vec::new();
        if d.template.is_some() && p.template != d.template {
            changed.push("template");
        }
        if d.encoding.is_some() && p.encoding != d.encoding {
            changed.push("encoding");
        }
        if d.lc_collate.is_some() && p.lc_collate != d.lc_collate {
            changed.push("lc_collate");
        }
        if d.lc_ctype.is_some() && p.lc_ctype != d.lc_ctype {
            changed.push("lc_ctype");
        }
        if p.colocation != d.colocation {
            changed.push("colocation");
        }
        changed
    }
}
