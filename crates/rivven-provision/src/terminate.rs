//! Draining sessions before a database is dropped

use tracing::{debug, info};

use crate::connection::Executor;
use crate::dialect;
use crate::error::Result;
use crate::features::{Feature, FeatureSet};
use crate::types::Value;

/// Block new sessions to `name` and terminate the existing ones.
///
/// New sessions are only blocked when the server supports
/// `ALLOW_CONNECTIONS`. The calling session is never terminated.
pub async fn terminate_connections<E: Executor + ?Sized>(
    executor: &E,
    name: &str,
    features: &FeatureSet,
) -> Result<()> {
    if features.supports(Feature::DatabaseAllowConnections) {
        let sql = dialect::alter_allow_connections(name, false);
        debug!(sql = %sql, "blocking new connections");
        executor
            .execute(&sql, &[])
            .await
            .map_err(|e| e.context("error blocking connections to database"))?;
    }

    let sql = dialect::terminate_backends(features);
    debug!(sql = %sql, database = %name, "terminating backends");
    let terminated = executor
        .execute(&sql, &[Value::from(name)])
        .await
        .map_err(|e| e.context("error terminating database connections"))?;
    if terminated > 0 {
        info!(database = %name, sessions = terminated, "terminated database connections");
    }
    Ok(())
}
