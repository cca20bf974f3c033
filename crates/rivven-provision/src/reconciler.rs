//! Database reconciler
//!
//! Converges one database toward a [`DatabaseSpec`]. Each entry point runs
//! its steps in a fixed order and stops at the first failing step; nothing is
//! retried here.
//!
//! Steps that act with the owner's privileges (create with an owner, owner
//! change, object reassignment, drop of an owned database) run under an
//! [`Elevation`], which takes the principal's role lock and grants it
//! temporary membership in the owner role. Other steps are single
//! autocommitted statements.

use tracing::{debug, info, instrument, warn};

use crate::catalog;
use crate::connection::Connection;
use crate::database::{
    Attribute, DatabaseSpec, DatabaseState, ObservedDatabase, SpecChange, DEFAULT_TEMPLATE,
};
use crate::dialect;
use crate::error::{with_cleanup, Error, Result};
use crate::features::{Feature, FeatureSet};
use crate::lock::Elevation;
use crate::terminate::terminate_connections;

/// Reconciles databases over one connection
pub struct DatabaseReconciler {
    conn: Box<dyn Connection>,
    features: FeatureSet,
    principal: String,
}

impl std::fmt::Debug for DatabaseReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseReconciler")
            .field("features", &self.features)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

impl DatabaseReconciler {
    /// Reconciler acting as `principal` on a server with `features`
    pub fn new(
        conn: Box<dyn Connection>,
        features: FeatureSet,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            features,
            principal: principal.into(),
        }
    }

    /// Build a reconciler, asking the server for whatever is not given.
    ///
    /// The principal defaults to `CURRENT_USER` and the feature set to the
    /// probed server version.
    pub async fn from_connection(
        conn: Box<dyn Connection>,
        principal: Option<String>,
        features: Option<FeatureSet>,
    ) -> Result<Self> {
        let principal = match principal {
            Some(principal) => principal,
            None => catalog::current_user(conn.as_ref()).await?,
        };
        let features = match features {
            Some(features) => features,
            None => FeatureSet::probe(conn.as_ref()).await?,
        };
        info!(
            principal = %principal,
            version = %features.version(),
            "Database reconciler ready"
        );
        Ok(Self::new(conn, features, principal))
    }

    /// Capabilities of the connected server
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// Role the reconciler connects as
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Create the database and read it back
    #[instrument(skip(self, spec), fields(database = %spec.name))]
    pub async fn create(&self, spec: &DatabaseSpec) -> Result<DatabaseState> {
        spec.check()?;
        if !spec.allow_connections {
            self.features.require(Feature::DatabaseAllowConnections)?;
        }
        if spec.is_template {
            self.features.require(Feature::DatabaseIsTemplate)?;
        }

        let sql = dialect::create_database(spec, &self.principal, &self.features);
        match spec.requested_owner() {
            Some(owner) => {
                let elevation = self.elevate(owner).await?;
                let created = self.run(&sql, "error creating database").await;
                elevation.exit(created).await?;
            }
            None => self.run(&sql, "error creating database").await?,
        }
        info!("Created database");

        let mut state = DatabaseState::with_id(&spec.name);
        self.read(&mut state, spec).await?;
        Ok(state)
    }

    /// Refresh `state` from the catalog.
    ///
    /// A database that no longer exists clears `state` and is not an error.
    #[instrument(skip(self, state, spec), fields(database = ?state.id))]
    pub async fn read(&self, state: &mut DatabaseState, spec: &DatabaseSpec) -> Result<()> {
        let Some(id) = state.id.clone() else {
            state.clear();
            return Ok(());
        };

        match self.observe(&id, spec).await? {
            Some(observed) => {
                state.id = Some(observed.name.clone());
                state.observed = Some(observed);
            }
            None => {
                warn!(database = %id, "Database not found, clearing state");
                state.clear();
            }
        }
        Ok(())
    }

    /// Adopt an existing database by name
    #[instrument(skip(self))]
    pub async fn import(&self, name: &str) -> Result<DatabaseState> {
        let mut state = DatabaseState::with_id(name);
        self.read(&mut state, &DatabaseSpec::new(name)).await?;
        if !state.exists() {
            return Err(Error::not_found(name));
        }
        Ok(state)
    }

    /// Apply the attributes that differ between `change.prior` and
    /// `change.desired`, then read the database back
    #[instrument(skip(self, state, change), fields(database = %change.desired.name))]
    pub async fn update(&self, state: &mut DatabaseState, change: SpecChange<'_>) -> Result<()> {
        let desired = change.desired;
        desired.check()?;
        let immutable = change.immutable_changes();
        if !immutable.is_empty() {
            return Err(Error::validation(format!(
                "{} cannot change once the database exists",
                immutable.join(", ")
            )));
        }

        let mut name = state
            .id
            .clone()
            .unwrap_or_else(|| change.prior.name.clone());

        if change.has_change(Attribute::Name) {
            self.rename(&name, &desired.name).await?;
            name = desired.name.clone();
            state.id = Some(name.clone());
        }

        if change.has_change(Attribute::Owner) {
            if let Some(owner) = desired.requested_owner() {
                if desired.alter_object_ownership {
                    self.reassign_owned(&name, owner).await?;
                }
                self.set_owner(&name, owner).await?;
            }
        }

        if change.has_change(Attribute::Tablespace) {
            let sql = dialect::alter_tablespace(&name, desired.tablespace_name.as_deref());
            self.run(&sql, "error updating database tablespace").await?;
        }

        if change.has_change(Attribute::ConnectionLimit) {
            let sql = dialect::alter_connection_limit(&name, desired.connection_limit);
            self.run(&sql, "error updating database connection limit")
                .await?;
        }

        if change.has_change(Attribute::AllowConnections) {
            self.set_allow_connections(&name, desired.allow_connections)
                .await?;
        }

        if change.has_change(Attribute::IsTemplate) {
            self.set_is_template(&name, desired.is_template).await?;
        }

        self.read(state, desired).await
    }

    /// Drop the database and clear `state`
    #[instrument(skip(self, state, spec), fields(database = %spec.name))]
    pub async fn delete(&self, state: &mut DatabaseState, spec: &DatabaseSpec) -> Result<()> {
        let name = state.id.clone().unwrap_or_else(|| spec.name.clone());

        match spec.requested_owner() {
            Some(owner) => {
                let elevation = self.elevate(owner).await?;
                let dropped = self.drop_database(&name).await;
                elevation.exit(dropped).await?;
            }
            None => self.drop_database(&name).await?,
        }

        info!(database = %name, "Dropped database");
        state.clear();
        Ok(())
    }

    /// Whether a database named `id` exists
    #[instrument(skip(self))]
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let tx = self.conn.begin_read_only().await?;
        let found = catalog::database_exists(tx.as_ref(), id).await;
        with_cleanup(found, tx.rollback().await)
    }

    async fn elevate(&self, group: &str) -> Result<Elevation<'_>> {
        Elevation::enter(self.conn.as_ref(), &self.principal, group).await
    }

    async fn run(&self, sql: &str, context: &str) -> Result<()> {
        debug!(sql = %sql, "Executing statement");
        self.conn
            .execute(sql, &[])
            .await
            .map_err(|e| e.context(context))?;
        Ok(())
    }

    /// Catalog state of `name`, `None` when any phase finds no row
    async fn observe(&self, name: &str, spec: &DatabaseSpec) -> Result<Option<ObservedDatabase>> {
        let conn = self.conn.as_ref();
        let Some((name, owner)) = catalog::database_owner(conn, name).await? else {
            return Ok(None);
        };
        let Some(settings) = catalog::database_settings(conn, &name).await? else {
            return Ok(None);
        };

        let mut allow_connections = None;
        if self.features.supports(Feature::DatabaseAllowConnections) {
            match catalog::database_allow_connections(conn, &name).await? {
                Some(allow) => allow_connections = Some(allow),
                None => return Ok(None),
            }
        }
        let mut is_template = None;
        if self.features.supports(Feature::DatabaseIsTemplate) {
            match catalog::database_is_template(conn, &name).await? {
                Some(flag) => is_template = Some(flag),
                None => return Ok(None),
            }
        }

        let template = spec
            .template
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();

        Ok(Some(ObservedDatabase {
            name,
            owner,
            template,
            encoding: settings.encoding,
            lc_collate: settings.lc_collate,
            lc_ctype: settings.lc_ctype,
            tablespace_name: settings.tablespace_name,
            connection_limit: settings.connection_limit,
            allow_connections,
            is_template,
        }))
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            return Err(Error::validation("database name must not be empty"));
        }
        let sql = dialect::rename_database(old, new);
        self.run(&sql, "error updating database name").await?;
        info!(from = %old, to = %new, "Renamed database");
        Ok(())
    }

    /// Hand every object owned by the current owner over to `new_owner`.
    ///
    /// Runs in the target database on the lock's session and is committed
    /// before the temporary membership is revoked. The role lock is taken in
    /// that database as well, so it does not exclude a concurrent create,
    /// owner change or drop in the maintenance database.
    async fn reassign_owned(&self, name: &str, new_owner: &str) -> Result<()> {
        let Some((_, current_owner)) = catalog::database_owner(self.conn.as_ref(), name).await?
        else {
            return Err(Error::not_found(name));
        };
        if current_owner == new_owner {
            debug!(owner = %new_owner, "Owner unchanged, nothing to reassign");
            return Ok(());
        }

        let elevation = Elevation::enter_in(
            self.conn.as_ref(),
            &self.principal,
            &current_owner,
            Some(name),
        )
        .await?;
        let sql = dialect::reassign_owned(&current_owner, new_owner);
        let reassigned = async {
            let tx = elevation.transaction()?;
            debug!(sql = %sql, "Executing statement");
            tx.execute(&sql, &[])
                .await
                .map_err(|e| e.context("error reassigning objects to new owner"))?;
            Ok::<(), Error>(())
        }
        .await;
        elevation.exit_committing(reassigned).await?;

        info!(from = %current_owner, to = %new_owner, "Reassigned owned objects");
        Ok(())
    }

    async fn set_owner(&self, name: &str, owner: &str) -> Result<()> {
        let sql = dialect::alter_owner(name, owner);
        let elevation = self.elevate(owner).await?;
        let altered = self.run(&sql, "error updating database owner").await;
        elevation.exit(altered).await
    }

    async fn set_allow_connections(&self, name: &str, allow: bool) -> Result<()> {
        self.features.require(Feature::DatabaseAllowConnections)?;
        let sql = dialect::alter_allow_connections(name, allow);
        self.run(&sql, "error updating database ALLOW_CONNECTIONS")
            .await
    }

    async fn set_is_template(&self, name: &str, is_template: bool) -> Result<()> {
        self.features.require(Feature::DatabaseIsTemplate)?;
        let sql = dialect::alter_is_template(name, is_template);
        self.run(&sql, "error updating database IS_TEMPLATE").await
    }

    /// Clear the template flag, drain sessions and drop `name`
    async fn drop_database(&self, name: &str) -> Result<()> {
        if self.features.supports(Feature::DatabaseIsTemplate) {
            let conn = self.conn.as_ref();
            if catalog::database_is_template(conn, name).await? == Some(true) {
                self.set_is_template(name, false).await?;
                if catalog::database_is_template(conn, name).await? == Some(true) {
                    warn!(database = %name, "Template flag still set, clearing again");
                    self.set_is_template(name, false).await?;
                }
                if catalog::database_is_template(conn, name).await? == Some(true) {
                    return Err(Error::constraint(format!(
                        "database {:?} is still marked as a template and cannot be dropped",
                        name
                    )));
                }
            }
        }

        terminate_connections(self.conn.as_ref(), name, &self.features).await?;

        let sql = dialect::drop_database(name, &self.features);
        self.run(&sql, "error dropping database").await
    }
}
