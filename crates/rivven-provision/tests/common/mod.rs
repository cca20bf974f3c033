//! In-memory PostgreSQL stand-in for integration tests
//!
//! Models just enough of a cluster for the reconciler: databases, roles,
//! direct role memberships, tablespaces, per-session advisory role locks and
//! connected-session counts. Advisory locks are keyed by the session's
//! database and the role, as on a real server. Every statement and query is logged with the
//! session that issued it. Statements are applied immediately, even inside
//! a transaction; only locks are transaction-scoped.
//!
//! Permission rules: creating a database owned by another role, changing a
//! database's owner and dropping another role's database all require the
//! session user to be that role, a member of it, or a superuser.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rivven_provision::catalog;
use rivven_provision::connection::{Connection, Executor, Transaction};
use rivven_provision::features::{FeatureSet, ServerVersion, SERVER_VERSION_SQL};
use rivven_provision::types::{Row, Value};
use rivven_provision::{DatabaseReconciler, Error, Result};

/// One logged statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Session that issued it; 0 is the first connection
    pub session: usize,
    /// SQL text
    pub sql: String,
}

/// A database in the fake catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDatabase {
    pub owner: String,
    pub encoding: String,
    pub lc_collate: String,
    pub lc_ctype: String,
    pub tablespace: String,
    pub connection_limit: i32,
    pub allow_connections: bool,
    pub is_template: bool,
    pub colocated: bool,
    /// Other sessions currently connected
    pub sessions: u32,
}

impl FakeDatabase {
    pub fn owned_by(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            encoding: "UTF8".into(),
            lc_collate: "en_US.UTF-8".into(),
            lc_ctype: "en_US.UTF-8".into(),
            tablespace: "pg_default".into(),
            connection_limit: -1,
            allow_connections: true,
            is_template: false,
            colocated: false,
            sessions: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    databases: BTreeMap<String, FakeDatabase>,
    roles: BTreeSet<String>,
    superusers: BTreeSet<String>,
    tablespaces: BTreeSet<String>,
    /// (member, group)
    memberships: BTreeSet<(String, String)>,
    /// (database, role) -> session holding its advisory lock
    locks: HashMap<(String, String), usize>,
    log: Vec<Statement>,
    failures: Vec<String>,
    /// (query, database): drop the database once the query has answered
    vanishing: Vec<(String, String)>,
    next_session: usize,
}

/// Shared handle on a fake cluster
#[derive(Debug, Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
    version: ServerVersion,
    user: String,
}

impl FakeCluster {
    /// Cluster at `version` whose sessions log in as the non-superuser `user`
    pub fn new(version: ServerVersion, user: &str) -> Self {
        let mut state = ClusterState::default();
        state.roles.insert(user.to_string());
        state.roles.insert("postgres".to_string());
        state.superusers.insert("postgres".to_string());
        for ts in ["pg_default", "pg_global"] {
            state.tablespaces.insert(ts.to_string());
        }
        for name in ["postgres", "template1"] {
            state
                .databases
                .insert(name.to_string(), FakeDatabase::owned_by("postgres"));
        }
        let mut template0 = FakeDatabase::owned_by("postgres");
        template0.is_template = true;
        template0.allow_connections = false;
        state.databases.insert("template0".to_string(), template0);

        Self {
            state: Arc::new(Mutex::new(state)),
            version,
            user: user.to_string(),
        }
    }

    /// PostgreSQL 16 cluster logged into as `admin`
    pub fn pg16() -> Self {
        Self::new(ServerVersion::new(16, 2, 0), "admin")
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    pub fn features(&self) -> FeatureSet {
        FeatureSet::for_version(self.version)
    }

    pub fn with_role(self, role: &str) -> Self {
        self.lock().roles.insert(role.to_string());
        self
    }

    pub fn with_tablespace(self, name: &str) -> Self {
        self.lock().tablespaces.insert(name.to_string());
        self
    }

    pub fn with_membership(self, member: &str, group: &str) -> Self {
        self.lock()
            .memberships
            .insert((member.to_string(), group.to_string()));
        self
    }

    pub fn with_database(self, name: &str, db: FakeDatabase) -> Self {
        self.lock().databases.insert(name.to_string(), db);
        self
    }

    /// Make every statement or query starting with `prefix` fail
    pub fn fail_on(&self, prefix: &str) {
        self.lock().failures.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Drop `database` right after `query` has been answered for it, as if a
    /// concurrent session removed it mid-read
    pub fn vanish_after(&self, query: &str, database: &str) {
        self.lock()
            .vanishing
            .push((query.to_string(), database.to_string()));
    }

    /// Open a new session
    pub fn connect(&self) -> Box<dyn Connection> {
        let id = {
            let mut state = self.lock();
            let id = state.next_session;
            state.next_session += 1;
            id
        };
        Box::new(FakeConnection {
            session: FakeSession {
                cluster: self.clone(),
                id,
                database: None,
                read_only: false,
            },
        })
    }

    /// Reconciler on a new session acting as the cluster user
    pub fn reconciler(&self) -> DatabaseReconciler {
        DatabaseReconciler::new(self.connect(), self.features(), self.user.clone())
    }

    pub fn database(&self, name: &str) -> Option<FakeDatabase> {
        self.lock().databases.get(name).cloned()
    }

    pub fn set_sessions(&self, name: &str, sessions: u32) {
        if let Some(db) = self.lock().databases.get_mut(name) {
            db.sessions = sessions;
        }
    }

    pub fn is_member(&self, member: &str, group: &str) -> bool {
        self.lock()
            .memberships
            .contains(&(member.to_string(), group.to_string()))
    }

    /// Session holding an advisory lock on `role` in any database
    pub fn lock_holder(&self, role: &str) -> Option<usize> {
        self.lock()
            .locks
            .iter()
            .find(|((_, locked), _)| locked == role)
            .map(|(_, session)| *session)
    }

    /// Databases in which `role` is currently locked
    pub fn locked_in(&self, role: &str) -> Vec<String> {
        let mut databases: Vec<String> = self
            .lock()
            .locks
            .keys()
            .filter(|(_, locked)| locked == role)
            .map(|(database, _)| database.clone())
            .collect();
        databases.sort();
        databases
    }

    /// Every logged statement and query
    pub fn log(&self) -> Vec<Statement> {
        self.lock().log.clone()
    }

    /// SQL of every logged statement and query
    pub fn statements(&self) -> Vec<String> {
        self.log().into_iter().map(|s| s.sql).collect()
    }

    /// Logged SQL starting with `prefix`
    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    /// Position of the first logged SQL starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.statements().iter().position(|sql| sql.starts_with(prefix))
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    fn version_num(&self) -> i32 {
        let v = self.version;
        let num = if v.major >= 10 {
            v.major * 10_000 + v.minor
        } else {
            v.major * 10_000 + v.minor * 100 + v.patch
        };
        num as i32
    }
}

fn supports(version: ServerVersion, major: u32, minor: u32) -> bool {
    version >= ServerVersion::new(major, minor, 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Ident(String),
    Lit(String),
}

impl Tok {
    fn text(&self) -> &str {
        match self {
            Tok::Word(s) | Tok::Ident(s) | Tok::Lit(s) => s,
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self, Tok::Word(w) if w.eq_ignore_ascii_case(word))
    }
}

fn tokenize(sql: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' || c == '\'' {
            chars.next();
            let mut s = String::new();
            while let Some(ch) = chars.next() {
                if ch == c {
                    if chars.peek() == Some(&c) {
                        chars.next();
                        s.push(c);
                    } else {
                        break;
                    }
                } else {
                    s.push(ch);
                }
            }
            toks.push(if c == '"' { Tok::Ident(s) } else { Tok::Lit(s) });
        } else if "()=,".contains(c) {
            chars.next();
            toks.push(Tok::Word(c.to_string()));
        } else {
            let mut s = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || "()=,\"'".contains(ch) {
                    break;
                }
                s.push(ch);
                chars.next();
            }
            toks.push(Tok::Word(s));
        }
    }
    toks
}

struct Cursor {
    toks: Vec<Tok>,
    pos: usize,
}

impl Cursor {
    fn new(sql: &str) -> Self {
        Self {
            toks: tokenize(sql),
            pos: 0,
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, word: &str) -> bool {
        match self.toks.get(self.pos) {
            Some(tok) if tok.is_word(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, word: &str) -> Result<()> {
        if self.eat(word) {
            Ok(())
        } else {
            Err(syntax(format!("expected {}", word)))
        }
    }

    /// Next identifier or literal; `None` for the DEFAULT keyword
    fn value(&mut self) -> Result<Option<String>> {
        match self.next() {
            Some(tok) if tok.is_word("DEFAULT") => Ok(None),
            Some(tok) => Ok(Some(tok.text().to_string())),
            None => Err(syntax("missing value")),
        }
    }

    fn name(&mut self) -> Result<String> {
        self.value()?.ok_or_else(|| syntax("missing name"))
    }

    fn boolean(&mut self) -> Result<bool> {
        match self.next() {
            Some(tok) if tok.is_word("true") => Ok(true),
            Some(tok) if tok.is_word("false") => Ok(false),
            _ => Err(syntax("expected boolean")),
        }
    }

    fn int(&mut self) -> Result<i32> {
        self.next()
            .and_then(|tok| tok.text().parse().ok())
            .ok_or_else(|| syntax("expected integer"))
    }

    fn done(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

fn syntax(message: impl Into<String>) -> Error {
    Error::statement(format!("syntax error: {}", message.into()))
}

fn refused(message: impl Into<String>) -> Error {
    Error::statement(message.into())
}

struct FakeSession {
    cluster: FakeCluster,
    id: usize,
    database: Option<String>,
    read_only: bool,
}

impl FakeSession {
    fn database(&self) -> &str {
        self.database.as_deref().unwrap_or("postgres")
    }

    fn record(&self, sql: &str) -> Result<MutexGuard<'_, ClusterState>> {
        let mut state = self.cluster.lock();
        state.log.push(Statement {
            session: self.id,
            sql: sql.to_string(),
        });
        if state.failures.iter().any(|prefix| sql.starts_with(prefix.as_str())) {
            return Err(Error::statement_with_sql("injected failure", sql));
        }
        Ok(state)
    }

    fn can_act_as(&self, state: &ClusterState, role: &str) -> bool {
        let user = &self.cluster.user;
        user == role
            || state.superusers.contains(user)
            || state.memberships.contains(&(user.clone(), role.to_string()))
    }

    fn release_locks(&self) {
        self.cluster
            .lock()
            .locks
            .retain(|_, session| *session != self.id);
    }

    fn run(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.record(sql)?;
        if self.read_only {
            return Err(refused("cannot execute in a read-only transaction"));
        }
        let version = self.cluster.version;
        let mut c = Cursor::new(sql);

        if c.eat("CREATE") {
            c.expect("DATABASE")?;
            self.create(&mut state, &mut c, version)?;
            return Ok(0);
        }
        if c.eat("ALTER") {
            c.expect("DATABASE")?;
            let name = c.name()?;
            self.alter(&mut state, &name, &mut c, version)?;
            return Ok(0);
        }
        if c.eat("DROP") {
            c.expect("DATABASE")?;
            let name = c.name()?;
            let force = c.eat("WITH");
            if force {
                if !supports(version, 13, 0) {
                    return Err(syntax("WITH (FORCE)"));
                }
                c.expect("(")?;
                c.expect("FORCE")?;
                c.expect(")")?;
            }
            let db = state
                .databases
                .get(&name)
                .ok_or_else(|| refused(format!("database \"{}\" does not exist", name)))?;
            if db.is_template {
                return Err(refused("cannot drop a template database"));
            }
            if !self.can_act_as(&state, &db.owner) {
                return Err(refused("must be owner of database"));
            }
            if db.sessions > 0 && !force {
                return Err(refused(format!(
                    "database \"{}\" is being accessed by other users",
                    name
                )));
            }
            state.databases.remove(&name);
            return Ok(0);
        }
        if c.eat("GRANT") {
            let group = c.name()?;
            c.expect("TO")?;
            let member = c.name()?;
            if !state.roles.contains(&group) || !state.roles.contains(&member) {
                return Err(refused("role does not exist"));
            }
            state.memberships.insert((member, group));
            return Ok(0);
        }
        if c.eat("REVOKE") {
            let group = c.name()?;
            c.expect("FROM")?;
            let member = c.name()?;
            state.memberships.remove(&(member, group));
            return Ok(0);
        }
        if c.eat("REASSIGN") {
            c.expect("OWNED")?;
            c.expect("BY")?;
            let old = c.name()?;
            c.expect("TO")?;
            let new = c.name()?;
            if !self.can_act_as(&state, &old) {
                return Err(refused(format!("permission denied to reassign objects of {}", old)));
            }
            for db in state.databases.values_mut() {
                if db.owner == old {
                    db.owner = new.clone();
                }
            }
            return Ok(0);
        }
        if sql.starts_with("SELECT pg_terminate_backend(") {
            let uses_pid = sql.contains("pg_terminate_backend(pid)");
            if uses_pid != supports(version, 9, 2) {
                return Err(refused("pg_stat_activity column does not exist"));
            }
            let name = params
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| refused("missing database parameter"))?;
            let terminated = match state.databases.get_mut(name) {
                Some(db) => std::mem::take(&mut db.sessions),
                None => 0,
            };
            return Ok(u64::from(terminated));
        }
        Err(refused(format!("unsupported statement: {}", sql)))
    }

    fn create(&self, state: &mut ClusterState, c: &mut Cursor, version: ServerVersion) -> Result<()> {
        let name = c.name()?;
        if state.databases.contains_key(&name) {
            return Err(refused(format!("database \"{}\" already exists", name)));
        }
        let mut db = FakeDatabase::owned_by(&self.cluster.user);
        while let Some(tok) = c.next() {
            match tok.text().to_ascii_uppercase().as_str() {
                "WITH" => {
                    c.expect("COLOCATION")?;
                    c.expect("=")?;
                    db.colocated = c.boolean()?;
                }
                "OWNER" => {
                    if let Some(owner) = c.value()? {
                        if !state.roles.contains(&owner) {
                            return Err(refused(format!("role \"{}\" does not exist", owner)));
                        }
                        if !self.can_act_as(state, &owner) {
                            return Err(refused(format!(
                                "must be able to SET ROLE \"{}\"",
                                owner
                            )));
                        }
                        db.owner = owner;
                    }
                }
                "TEMPLATE" => {
                    if let Some(template) = c.value()? {
                        if !state.databases.contains_key(&template) {
                            return Err(refused(format!(
                                "template database \"{}\" does not exist",
                                template
                            )));
                        }
                    }
                }
                "ENCODING" => {
                    if let Some(encoding) = c.value()? {
                        db.encoding = encoding;
                    }
                }
                "LC_COLLATE" => {
                    if let Some(collate) = c.value()? {
                        db.lc_collate = collate;
                    }
                }
                "LC_CTYPE" => {
                    if let Some(ctype) = c.value()? {
                        db.lc_ctype = ctype;
                    }
                }
                "TABLESPACE" => {
                    if let Some(ts) = c.value()? {
                        if !state.tablespaces.contains(&ts) {
                            return Err(refused(format!("tablespace \"{}\" does not exist", ts)));
                        }
                        db.tablespace = ts;
                    }
                }
                "ALLOW_CONNECTIONS" if supports(version, 9, 5) => {
                    db.allow_connections = c.boolean()?;
                }
                "IS_TEMPLATE" if supports(version, 9, 5) => {
                    db.is_template = c.boolean()?;
                }
                "CONNECTION" => {
                    c.expect("LIMIT")?;
                    db.connection_limit = c.int()?;
                }
                other => return Err(syntax(format!("unexpected {}", other))),
            }
        }
        state.databases.insert(name, db);
        Ok(())
    }

    fn alter(
        &self,
        state: &mut ClusterState,
        name: &str,
        c: &mut Cursor,
        version: ServerVersion,
    ) -> Result<()> {
        if !state.databases.contains_key(name) {
            return Err(refused(format!("database \"{}\" does not exist", name)));
        }

        if c.eat("RENAME") {
            c.expect("TO")?;
            let new = c.name()?;
            if state.databases.contains_key(&new) {
                return Err(refused(format!("database \"{}\" already exists", new)));
            }
            if let Some(db) = state.databases.remove(name) {
                state.databases.insert(new, db);
            }
            return Ok(());
        }

        if c.eat("OWNER") {
            c.expect("TO")?;
            let owner = c.name()?;
            if !state.roles.contains(&owner) {
                return Err(refused(format!("role \"{}\" does not exist", owner)));
            }
            if !self.can_act_as(state, &owner) {
                return Err(refused(format!("must be able to SET ROLE \"{}\"", owner)));
            }
            if let Some(db) = state.databases.get_mut(name) {
                db.owner = owner;
            }
            return Ok(());
        }

        let tablespaces = state.tablespaces.clone();
        let db = state
            .databases
            .get_mut(name)
            .ok_or_else(|| refused("database vanished"))?;
        if c.eat("SET") {
            c.expect("TABLESPACE")?;
            let ts = c.name()?;
            if !tablespaces.contains(&ts) {
                return Err(refused(format!("tablespace \"{}\" does not exist", ts)));
            }
            db.tablespace = ts;
        } else if c.eat("RESET") {
            c.expect("TABLESPACE")?;
            db.tablespace = "pg_default".into();
        } else if c.eat("CONNECTION") {
            c.expect("LIMIT")?;
            c.expect("=")?;
            db.connection_limit = c.int()?;
        } else if supports(version, 9, 5) && c.eat("ALLOW_CONNECTIONS") {
            db.allow_connections = c.boolean()?;
        } else if supports(version, 9, 5) && c.eat("IS_TEMPLATE") {
            db.is_template = c.boolean()?;
        } else {
            return Err(syntax("unsupported ALTER DATABASE"));
        }

        if !c.done() {
            return Err(syntax("trailing tokens"));
        }
        Ok(())
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let answer = self.answer(sql, params)?;
        let mut state = self.cluster.lock();
        let target = params.first().and_then(Value::as_str);
        let vanished: Vec<String> = state
            .vanishing
            .iter()
            .filter(|(query, database)| query == sql && Some(database.as_str()) == target)
            .map(|(_, database)| database.clone())
            .collect();
        for database in vanished {
            state.databases.remove(&database);
            state.vanishing.retain(|(_, d)| *d != database);
        }
        Ok(answer)
    }

    fn answer(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut state = self.record(sql)?;
        let text = |idx: usize| -> Result<String> {
            params
                .get(idx)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| refused(format!("missing parameter ${}", idx + 1)))
        };

        let row = |values: Vec<Value>| Some(Row::from_values(values));

        if sql == SERVER_VERSION_SQL {
            return Ok(row(vec![Value::Int32(self.cluster.version_num())]));
        }
        if sql == catalog::CURRENT_USER_SQL {
            return Ok(row(vec![Value::from(self.cluster.user.as_str())]));
        }
        if sql == catalog::ROLE_MEMBERSHIP_SQL {
            let key = (text(0)?, text(1)?);
            return Ok(state
                .memberships
                .contains(&key)
                .then(|| Row::from_values(vec![Value::Int32(1)])));
        }
        if sql == catalog::LOCK_ROLE_SQL {
            let role = text(0)?;
            if !state.roles.contains(&role) {
                return Ok(None);
            }
            let key = (self.database().to_string(), role);
            let holder = state.locks.get(&key).copied();
            if let Some(holder) = holder.filter(|h| *h != self.id) {
                return Err(refused(format!(
                    "advisory lock on {} held by session {}",
                    key.1, holder
                )));
            }
            state.locks.insert(key, self.id);
            return Ok(row(vec![Value::Null]));
        }

        let name = text(0)?;
        let Some(db) = state.databases.get(&name) else {
            return Ok(None);
        };
        if sql == catalog::DATABASE_OWNER_SQL {
            return Ok(row(vec![
                Value::from(name.as_str()),
                Value::from(db.owner.as_str()),
            ]));
        }
        if sql == catalog::DATABASE_SETTINGS_SQL {
            return Ok(row(vec![
                Value::from(db.encoding.as_str()),
                Value::from(db.lc_collate.as_str()),
                Value::from(db.lc_ctype.as_str()),
                Value::from(db.tablespace.as_str()),
                Value::Int32(db.connection_limit),
            ]));
        }
        if sql == catalog::DATABASE_ALLOW_CONNECTIONS_SQL {
            return Ok(row(vec![Value::Bool(db.allow_connections)]));
        }
        if sql == catalog::DATABASE_IS_TEMPLATE_SQL {
            return Ok(row(vec![Value::Bool(db.is_template)]));
        }
        if sql == catalog::DATABASE_EXISTS_SQL {
            return Ok(row(vec![Value::from(name.as_str())]));
        }
        Err(refused(format!("unsupported query: {}", sql)))
    }
}

struct FakeConnection {
    session: FakeSession,
}

#[async_trait]
impl Executor for FakeConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.session.run(sql, params)
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.session.query(sql, params)
    }
}

impl FakeConnection {
    fn open_transaction(&self, database: Option<&str>, read_only: bool) -> Result<Box<dyn Transaction>> {
        let begin = if read_only { "BEGIN READ ONLY" } else { "BEGIN" };
        let cluster = &self.session.cluster;
        let id = {
            let mut state = self.session.record(begin)?;
            if let Some(database) = database {
                if !state.databases.contains_key(database) {
                    return Err(Error::connection(format!(
                        "database \"{}\" does not exist",
                        database
                    )));
                }
            }
            let id = state.next_session;
            state.next_session += 1;
            id
        };
        Ok(Box::new(FakeTransaction {
            session: FakeSession {
                cluster: cluster.clone(),
                id,
                database: database.map(str::to_string),
                read_only,
            },
            database: database.map(str::to_string),
            finished: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn begin_in(&self, database: Option<&str>) -> Result<Box<dyn Transaction>> {
        self.open_transaction(database, false)
    }

    async fn begin_read_only(&self) -> Result<Box<dyn Transaction>> {
        self.open_transaction(None, true)
    }
}

/// Transaction on its own session
pub struct FakeTransaction {
    session: FakeSession,
    /// Database the session connected to, when not the default
    pub database: Option<String>,
    finished: AtomicBool,
}

impl FakeTransaction {
    fn finish(&self, sql: &str) -> Result<()> {
        let result = self.session.record(sql).map(drop);
        self.session.release_locks();
        self.finished.store(true, Ordering::Relaxed);
        result
    }
}

#[async_trait]
impl Executor for FakeTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.session.run(sql, params)
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.session.query(sql, params)
    }
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for FakeTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            self.session.release_locks();
        }
    }
}
