//! PostgreSQL backend implementation for rivven-provision
//!
//! Provides:
//! - `PgConnection`: the main session, statements autocommit
//! - `PgTransaction`: a transaction on its own session, so a role lock held
//!   there does not serialize the main session's statements
//! - `PgConnectionFactory` and [`connect`], which returns a ready reconciler

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

use crate::config::ProviderConfig;
use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Executor, Transaction};
use crate::error::{Error, Result};
use crate::features::FeatureSet;
use crate::reconciler::DatabaseReconciler;
use crate::types::{Row, Value};

type SqlParam = Box<dyn tokio_postgres::types::ToSql + Sync + Send>;

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> SqlParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

/// Convert a PostgreSQL value to a Value; unknown types are read as text
fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    pg_type: &tokio_postgres::types::Type,
) -> Value {
    use tokio_postgres::types::Type;

    let value = match *pg_type {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(Value::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map(|n| Value::Int32(i32::from(n)))),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(Value::Int32)),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(Value::Int64)),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .map(|v| v.map(|n| Value::Int64(i64::from(n)))),
        _ => row.try_get::<_, Option<String>>(idx).map(|v| v.map(Value::String)),
    };

    value.ok().flatten().unwrap_or(Value::Null)
}

fn statement_error(e: tokio_postgres::Error, sql: &str) -> Error {
    Error::Statement {
        context: "statement failed".into(),
        message: e.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(e)),
    }
}

fn transaction_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

async fn client_execute(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<u64> {
    let boxed_params: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
    let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = boxed_params
        .iter()
        .map(|b| b.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
        .collect();

    client
        .execute(sql, &param_refs)
        .await
        .map_err(|e| statement_error(e, sql))
}

async fn client_query_row(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> Result<Option<Row>> {
    let boxed_params: Vec<SqlParam> = params.iter().map(value_to_sql).collect();
    let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = boxed_params
        .iter()
        .map(|b| b.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
        .collect();

    let rows = client
        .query(sql, &param_refs)
        .await
        .map_err(|e| statement_error(e, sql))?;

    Ok(rows.first().map(pg_row_to_row))
}

/// Build a tokio-postgres config from a [`ConnectionConfig`]
fn pg_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
    let mut pg = config
        .url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| Error::config(format!("invalid connection URL: {}", e)))?;

    pg.connect_timeout(config.connect_timeout());
    if let Some(name) = &config.application_name {
        pg.application_name(name);
    }
    if !config.properties.is_empty() {
        let mut options: Vec<String> = config
            .properties
            .iter()
            .map(|(key, value)| format!("-c {}={}", key, value))
            .collect();
        options.sort();
        pg.options(&options.join(" "));
    }
    Ok(pg)
}

/// Open a session and spawn its connection driver
async fn open_session(config: &tokio_postgres::Config) -> Result<tokio_postgres::Client> {
    let (client, connection) = config
        .connect(tokio_postgres::NoTls)
        .await
        .map_err(|e| Error::connection_with_source("failed to connect", e))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection error");
        }
    });

    Ok(client)
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: tokio_postgres::Client,
    config: tokio_postgres::Config,
}

impl PgConnection {
    /// Open the main session described by `config`
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let config = pg_config(config)?;
        let client = open_session(&config).await?;
        Ok(Self { client, config })
    }

    async fn begin_with(
        &self,
        database: Option<&str>,
        begin: &'static str,
    ) -> Result<Box<dyn Transaction>> {
        let mut config = self.config.clone();
        if let Some(database) = database {
            config.dbname(database);
        }
        let client = open_session(&config).await?;
        client
            .batch_execute(begin)
            .await
            .map_err(transaction_error)?;
        debug!(database = ?database, "Opened transaction session");

        Ok(Box::new(PgTransaction {
            client,
            finished: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Executor for PgConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        client_execute(&self.client, sql, params).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        client_query_row(&self.client, sql, params).await
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn begin_in(&self, database: Option<&str>) -> Result<Box<dyn Transaction>> {
        self.begin_with(database, "BEGIN").await
    }

    async fn begin_read_only(&self) -> Result<Box<dyn Transaction>> {
        self.begin_with(None, "BEGIN READ ONLY").await
    }
}

/// PostgreSQL transaction owning its session
pub struct PgTransaction {
    client: tokio_postgres::Client,
    finished: AtomicBool,
}

#[async_trait]
impl Executor for PgTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        client_execute(&self.client, sql, params).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        client_query_row(&self.client, sql, params).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(transaction_error)?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(transaction_error)?;
        self.finished.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            warn!("Transaction dropped while open; closing its session aborts it");
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PgConnection::open(config).await?))
    }
}

/// Connect with `config` and build a reconciler.
///
/// The principal comes from the configured username, else `CURRENT_USER`;
/// the feature set from `expected_version`, else the server itself.
pub async fn connect(config: &ProviderConfig) -> Result<DatabaseReconciler> {
    let conn = PgConnectionFactory
        .connect(&config.connection_config()?)
        .await?;
    let features = config
        .expected_server_version()?
        .map(FeatureSet::for_version);
    let principal = config.database_username().map(str::to_string);
    DatabaseReconciler::from_connection(conn, principal, features).await
}
