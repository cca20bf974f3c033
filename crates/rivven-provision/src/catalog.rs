//! Catalog reads
//!
//! Every query here is parameterized; names never get interpolated.

use crate::connection::Executor;
use crate::error::{Error, Result};
use crate::types::Value;

/// Existence and owner of a database
pub const DATABASE_OWNER_SQL: &str = "SELECT d.datname, pg_catalog.pg_get_userbyid(d.datdba) \
     FROM pg_catalog.pg_database AS d WHERE d.datname = $1";

/// Encoding, collation, ctype, tablespace and connection limit of a database
pub const DATABASE_SETTINGS_SQL: &str = "SELECT pg_catalog.pg_encoding_to_char(d.encoding), \
     d.datcollate, d.datctype, ts.spcname, d.datconnlimit \
     FROM pg_catalog.pg_database AS d, pg_catalog.pg_tablespace AS ts \
     WHERE d.datname = $1 AND d.dattablespace = ts.oid";

/// `datallowconn` of a database
pub const DATABASE_ALLOW_CONNECTIONS_SQL: &str = "SELECT d.datallowconn \
     FROM pg_catalog.pg_database AS d, pg_catalog.pg_tablespace AS ts \
     WHERE d.datname = $1 AND d.dattablespace = ts.oid";

/// `datistemplate` of a database
pub const DATABASE_IS_TEMPLATE_SQL: &str = "SELECT d.datistemplate \
     FROM pg_catalog.pg_database AS d, pg_catalog.pg_tablespace AS ts \
     WHERE d.datname = $1 AND d.dattablespace = ts.oid";

/// Presence of a database
pub const DATABASE_EXISTS_SQL: &str =
    "SELECT d.datname FROM pg_catalog.pg_database AS d WHERE d.datname = $1";

/// Direct membership of `$1` (member) in `$2` (group)
pub const ROLE_MEMBERSHIP_SQL: &str = "SELECT 1 FROM pg_catalog.pg_auth_members \
     WHERE pg_catalog.pg_get_userbyid(member) = $1 \
     AND pg_catalog.pg_get_userbyid(roleid) = $2";

/// Transaction-scoped advisory lock keyed by the role's oid
pub const LOCK_ROLE_SQL: &str =
    "SELECT pg_catalog.pg_advisory_xact_lock(oid) FROM pg_catalog.pg_roles WHERE rolname = $1";

/// Role of the current session
pub const CURRENT_USER_SQL: &str = "SELECT CURRENT_USER";

/// Encoding, collation, ctype, tablespace and connection limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
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
}

/// Name and owner of `name`, or `None` if no such database exists
pub async fn database_owner<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
) -> Result<Option<(String, String)>> {
    let row = executor
        .query_row(DATABASE_OWNER_SQL, &[Value::from(name)])
        .await
        .map_err(|e| e.context("error reading database"))?;
    match row {
        Some(row) => Ok(Some((row.string(0)?, row.string(1)?))),
        None => Ok(None),
    }
}

/// Settings of `name`, or `None` if no such database exists
pub async fn database_settings<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
) -> Result<Option<DatabaseSettings>> {
    let row = executor
        .query_row(DATABASE_SETTINGS_SQL, &[Value::from(name)])
        .await
        .map_err(|e| e.context("error reading database"))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let connection_limit = i32::try_from(row.int(4)?)
        .map_err(|_| Error::internal("datconnlimit out of range"))?;
    Ok(Some(DatabaseSettings {
        encoding: row.string(0)?,
        lc_collate: row.string(1)?,
        lc_ctype: row.string(2)?,
        tablespace_name: row.string(3)?,
        connection_limit,
    }))
}

async fn database_flag<E: Executor + ?Sized>(
    executor: &E,
    sql: &str,
    name: &str,
    context: &str,
) -> Result<Option<bool>> {
    let row = executor
        .query_row(sql, &[Value::from(name)])
        .await
        .map_err(|e| e.context(context))?;
    row.map(|row| row.boolean(0)).transpose()
}

/// `ALLOW_CONNECTIONS` of `name`
pub async fn database_allow_connections<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
) -> Result<Option<bool>> {
    database_flag(
        executor,
        DATABASE_ALLOW_CONNECTIONS_SQL,
        name,
        "error reading ALLOW_CONNECTIONS property for database",
    )
    .await
}

/// `IS_TEMPLATE` of `name`
pub async fn database_is_template<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
) -> Result<Option<bool>> {
    database_flag(
        executor,
        DATABASE_IS_TEMPLATE_SQL,
        name,
        "error reading IS_TEMPLATE property for database",
    )
    .await
}

/// Whether a database named `name` exists
pub async fn database_exists<E: Executor + ?Sized>(executor: &E, name: &str) -> Result<bool> {
    let row = executor
        .query_row(DATABASE_EXISTS_SQL, &[Value::from(name)])
        .await
        .map_err(|e| e.context("error checking database existence"))?;
    Ok(row.is_some())
}

/// Whether `member` is a direct member of `group`
pub async fn is_member_of<E: Executor + ?Sized>(
    executor: &E,
    member: &str,
    group: &str,
) -> Result<bool> {
    let row = executor
        .query_row(ROLE_MEMBERSHIP_SQL, &[Value::from(member), Value::from(group)])
        .await
        .map_err(|e| e.context("error checking role membership"))?;
    Ok(row.is_some())
}

/// Role of the current session
pub async fn current_user<E: Executor + ?Sized>(executor: &E) -> Result<String> {
    let row = executor
        .query_row(CURRENT_USER_SQL, &[])
        .await
        .map_err(|e| e.context("error reading current user"))?
        .ok_or_else(|| Error::internal("CURRENT_USER returned no row"))?;
    row.string(0)
}
