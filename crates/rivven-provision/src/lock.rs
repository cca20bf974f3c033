//! Role locks and temporary role membership
//!
//! A non-superuser can only create, re-own or drop a database owned by
//! another role while it is a member of that role. The connecting principal
//! is therefore granted membership for the duration of the statement and the
//! grant is revoked afterwards. Concurrent reconcilers using the same
//! principal are serialized by a transaction-scoped advisory lock keyed by the
//! principal's role, held on a dedicated session:
//!
//! lock → grant → privileged statement(s) → revoke → release
//!
//! [`Elevation`] runs that sequence and always revokes and releases, whatever
//! the privileged statement returned.
//!
//! Advisory locks are scoped to the database the session is connected to.
//! Elevations entered with [`Elevation::enter`] all lock in the maintenance
//! database and serialize with each other. One entered with
//! [`Elevation::enter_in`] for another database only serializes with
//! elevations in that same database.

use tracing::{debug, warn};

use crate::catalog;
use crate::connection::{Connection, Executor, Transaction};
use crate::dialect;
use crate::error::{with_cleanup, Error, Result};
use crate::types::Value;

/// Membership of `member` in `group` made for one privileged operation
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a RoleGrant must be revoked"]
pub struct RoleGrant {
    /// Role that received membership
    pub member: String,
    /// Role whose privileges were conferred
    pub group: String,
    /// Whether the membership was created by this grant (and is owed a revoke)
    pub granted_now: bool,
}

/// Make `member` a member of `group` unless it already is one
pub async fn grant_temporary_membership<E: Executor + ?Sized>(
    executor: &E,
    member: &str,
    group: &str,
) -> Result<RoleGrant> {
    let mut grant = RoleGrant {
        member: member.to_string(),
        group: group.to_string(),
        granted_now: false,
    };

    if member == group || catalog::is_member_of(executor, member, group).await? {
        return Ok(grant);
    }

    let sql = dialect::grant_role(group, member);
    debug!(sql = %sql, "granting temporary role membership");
    executor
        .execute(&sql, &[])
        .await
        .map_err(|e| e.context(format!("error granting role {} to {}", group, member)))?;
    grant.granted_now = true;
    Ok(grant)
}

/// Undo a [`RoleGrant`]; a no-op when the grant created nothing
pub async fn revoke_temporary_membership<E: Executor + ?Sized>(
    executor: &E,
    grant: RoleGrant,
) -> Result<()> {
    if !grant.granted_now {
        return Ok(());
    }

    let sql = dialect::revoke_role(&grant.group, &grant.member);
    debug!(sql = %sql, "revoking temporary role membership");
    executor.execute(&sql, &[]).await.map_err(|e| {
        e.context(format!(
            "error revoking role {} from {}",
            grant.group, grant.member
        ))
    })?;
    Ok(())
}

/// Advisory lock on a role, held by a transaction on a dedicated session
pub struct RoleLock {
    role: String,
    tx: Option<Box<dyn Transaction>>,
}

impl RoleLock {
    /// Open a transaction and lock `role` in it.
    ///
    /// The transaction's session connects to `database` when given. Blocks
    /// while another session holds the lock.
    pub async fn acquire(
        conn: &dyn Connection,
        role: &str,
        database: Option<&str>,
    ) -> Result<Self> {
        let tx = conn
            .begin_in(database)
            .await
            .map_err(|e| Error::lock(role, format!("could not open lock transaction: {}", e)))?;

        let locked = tx.query_row(catalog::LOCK_ROLE_SQL, &[Value::from(role)]).await;
        let failure = match locked {
            Ok(Some(_)) => {
                debug!(role = %role, "role lock acquired");
                return Ok(Self {
                    role: role.to_string(),
                    tx: Some(tx),
                });
            }
            Ok(None) => Error::lock(role, "role does not exist"),
            Err(e) => Error::lock(role, e.to_string()),
        };

        with_cleanup(Err(failure), tx.rollback().await)
    }

    /// Role the lock is held on
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The transaction holding the lock
    pub fn transaction(&self) -> Result<&dyn Transaction> {
        match &self.tx {
            Some(tx) => Ok(tx.as_ref()),
            None => Err(Error::internal("role lock already released")),
        }
    }

    /// Commit the transaction, keeping its work and releasing the lock
    pub async fn commit(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| e.context("error committing role lock transaction")),
            None => Ok(()),
        }
    }

    /// Roll the transaction back, releasing the lock
    pub async fn release(mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => {
                debug!(role = %self.role, "releasing role lock");
                tx.rollback().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for RoleLock {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                role = %self.role,
                "role lock dropped while held; its session is closed and the server rolls it back"
            );
        }
    }
}

/// Connecting principal temporarily acting with another role's privileges
pub struct Elevation<'a> {
    conn: &'a dyn Connection,
    lock: Option<RoleLock>,
    grant: Option<RoleGrant>,
}

impl<'a> Elevation<'a> {
    /// Lock `principal` and make it a member of `group`.
    ///
    /// If the grant fails the lock is released before returning.
    pub async fn enter(conn: &'a dyn Connection, principal: &str, group: &str) -> Result<Self> {
        Self::enter_in(conn, principal, group, None).await
    }

    /// Like [`Elevation::enter`], with the lock's session connected to
    /// `database` so statements run through [`Elevation::transaction`] act
    /// on that database.
    ///
    /// The advisory lock is taken in `database` too, so it does not exclude
    /// elevations running in the maintenance database.
    pub async fn enter_in(
        conn: &'a dyn Connection,
        principal: &str,
        group: &str,
        database: Option<&str>,
    ) -> Result<Self> {
        let lock = RoleLock::acquire(conn, principal, database).await?;
        match grant_temporary_membership(conn, principal, group).await {
            Ok(grant) => Ok(Self {
                conn,
                lock: Some(lock),
                grant: Some(grant),
            }),
            Err(e) => with_cleanup(Err(e), lock.release().await),
        }
    }

    /// Whether entering created a membership that will be revoked
    pub fn granted_now(&self) -> bool {
        self.grant.as_ref().is_some_and(|g| g.granted_now)
    }

    /// The lock's transaction, for statements that must run under the lock
    pub fn transaction(&self) -> Result<&dyn Transaction> {
        match &self.lock {
            Some(lock) => lock.transaction(),
            None => Err(Error::internal("elevation already exited")),
        }
    }

    /// Revoke the grant and release the lock, discarding the lock's transaction.
    ///
    /// Returns `primary` unless it succeeded and cleanup failed.
    pub async fn exit<T>(mut self, primary: Result<T>) -> Result<T> {
        let revoked = self.revoke().await;
        let released = match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        };
        with_cleanup(with_cleanup(primary, revoked), released)
    }

    /// Commit the lock's transaction if `primary` succeeded, then revoke.
    ///
    /// On failure the transaction is rolled back instead.
    pub async fn exit_committing<T>(mut self, primary: Result<T>) -> Result<T> {
        if primary.is_err() {
            return self.exit(primary).await;
        }
        let committed = match self.lock.take() {
            Some(lock) => lock.commit().await,
            None => Ok(()),
        };
        let revoked = self.revoke().await;
        with_cleanup(with_cleanup(primary, committed), revoked)
    }

    async fn revoke(&mut self) -> Result<()> {
        match self.grant.take() {
            Some(grant) => revoke_temporary_membership(self.conn, grant).await,
            None => Ok(()),
        }
    }
}

impl Drop for Elevation<'_> {
    fn drop(&mut self) {
        if let Some(grant) = self.grant.as_ref().filter(|g| g.granted_now) {
            warn!(
                member = %grant.member,
                group = %grant.group,
                "elevation dropped without exit; temporary role membership was not revoked"
            );
        }
    }
}
