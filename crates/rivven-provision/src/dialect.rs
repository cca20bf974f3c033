//! SQL statement builder for database DDL
//!
//! - Identifier and literal quoting
//! - Three-state optional attributes (unset, engine default, explicit value)
//! - A declarative clause table for `CREATE DATABASE`
//! - `ALTER`/`DROP DATABASE` and role membership statements
//!
//! Version-dependent clauses are decided by the [`FeatureSet`] passed in; the
//! builder never looks at the server itself.

use crate::database::{DatabaseSpec, DEFAULT_ENCODING, DEFAULT_TEMPLATE};
use crate::features::{Feature, FeatureSet};

/// Quote an identifier, doubling embedded double quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// How an optional attribute was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting<'a> {
    /// Not requested; leave the clause out
    Unset,
    /// `DEFAULT`; let the engine pick
    EngineDefault,
    /// Explicit value
    Value(&'a str),
}

impl<'a> Setting<'a> {
    /// Classify a raw attribute. Empty strings count as unset and `DEFAULT`
    /// is matched case-insensitively.
    pub fn of(raw: Option<&'a str>) -> Self {
        match raw {
            None | Some("") => Self::Unset,
            Some(v) if v.eq_ignore_ascii_case("DEFAULT") => Self::EngineDefault,
            Some(v) => Self::Value(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Quoting {
    Identifier,
    Literal,
}

impl Quoting {
    fn apply(self, value: &str) -> String {
        match self {
            Self::Identifier => quote_identifier(value),
            Self::Literal => quote_literal(value),
        }
    }
}

/// Value used when an option is unset
#[derive(Debug, Clone, Copy)]
enum Fallback {
    Omit,
    Fixed(&'static str),
}

type TextAttr = fn(&DatabaseSpec) -> Option<&str>;
type FlagAttr = fn(&DatabaseSpec) -> bool;

/// One clause of `CREATE DATABASE`
enum Clause {
    /// Emitted only when the flag is set
    When { sql: &'static str, value: FlagAttr },
    /// Optional attribute following the three-state rules
    Option {
        keyword: &'static str,
        value: TextAttr,
        quoting: Quoting,
        fallback: Fallback,
    },
    /// Role name taken as given, falling back to the principal
    Owner { value: TextAttr },
    /// Boolean option emitted only when the server supports it
    Gated {
        keyword: &'static str,
        feature: Feature,
        value: FlagAttr,
    },
    /// `CONNECTION LIMIT n`, always emitted
    ConnectionLimit,
}

fn colocation(spec: &DatabaseSpec) -> bool {
    spec.colocation
}

fn owner(spec: &DatabaseSpec) -> Option<&str> {
    spec.requested_owner()
}

fn template(spec: &DatabaseSpec) -> Option<&str> {
    spec.template.as_deref()
}

fn encoding(spec: &DatabaseSpec) -> Option<&str> {
    spec.encoding.as_deref()
}

fn lc_collate(spec: &DatabaseSpec) -> Option<&str> {
    spec.lc_collate.as_deref()
}

fn lc_ctype(spec: &DatabaseSpec) -> Option<&str> {
    spec.lc_ctype.as_deref()
}

fn tablespace(spec: &DatabaseSpec) -> Option<&str> {
    spec.tablespace_name.as_deref()
}

fn allow_connections(spec: &DatabaseSpec) -> bool {
    spec.allow_connections
}

fn is_template(spec: &DatabaseSpec) -> bool {
    spec.is_template
}

/// `CREATE DATABASE` clauses in emission order
const CREATE_DATABASE_CLAUSES: &[Clause] = &[
    Clause::When {
        sql: "WITH COLOCATION = true",
        value: colocation,
    },
    Clause::Owner { value: owner },
    Clause::Option {
        keyword: "TEMPLATE",
        value: template,
        quoting: Quoting::Identifier,
        fallback: Fallback::Fixed(DEFAULT_TEMPLATE),
    },
    Clause::Option {
        keyword: "ENCODING",
        value: encoding,
        quoting: Quoting::Literal,
        fallback: Fallback::Fixed(DEFAULT_ENCODING),
    },
    Clause::Option {
        keyword: "LC_COLLATE",
        value: lc_collate,
        quoting: Quoting::Literal,
        fallback: Fallback::Omit,
    },
    Clause::Option {
        keyword: "LC_CTYPE",
        value: lc_ctype,
        quoting: Quoting::Literal,
        fallback: Fallback::Omit,
    },
    Clause::Option {
        keyword: "TABLESPACE",
        value: tablespace,
        quoting: Quoting::Identifier,
        fallback: Fallback::Omit,
    },
    Clause::Gated {
        keyword: "ALLOW_CONNECTIONS",
        feature: Feature::DatabaseAllowConnections,
        value: allow_connections,
    },
    Clause::ConnectionLimit,
    Clause::Gated {
        keyword: "IS_TEMPLATE",
        feature: Feature::DatabaseIsTemplate,
        value: is_template,
    },
];

impl Clause {
    fn render(&self, spec: &DatabaseSpec, principal: &str, features: &FeatureSet) -> Option<String> {
        match self {
            Self::When { sql, value } => value(spec).then(|| (*sql).to_string()),
            Self::Option {
                keyword,
                value,
                quoting,
                fallback,
            } => match Setting::of(value(spec)) {
                Setting::EngineDefault => Some(format!("{} DEFAULT", keyword)),
                Setting::Value(v) => Some(format!("{} {}", keyword, quoting.apply(v))),
                Setting::Unset => match fallback {
                    Fallback::Omit => None,
                    Fallback::Fixed(v) => Some(format!("{} {}", keyword, quoting.apply(v))),
                },
            },
            Self::Owner { value } => Some(format!(
                "OWNER {}",
                quote_identifier(value(spec).unwrap_or(principal))
            )),
            Self::Gated {
                keyword,
                feature,
                value,
            } => features
                .supports(*feature)
                .then(|| format!("{} {}", keyword, sql_bool(value(spec)))),
            Self::ConnectionLimit => Some(format!("CONNECTION LIMIT {}", spec.connection_limit)),
        }
    }
}

/// Build `CREATE DATABASE` for `spec`.
///
/// `principal` is named as owner when `spec` requests none. Clauses for
/// features the server lacks are left out; callers must reject specs that
/// depend on them before building.
pub fn create_database(spec: &DatabaseSpec, principal: &str, features: &FeatureSet) -> String {
    std::iter::once(format!("CREATE DATABASE {}", quote_identifier(&spec.name)))
        .chain(
            CREATE_DATABASE_CLAUSES
                .iter()
                .filter_map(|clause| clause.render(spec, principal, features)),
        )
        .collect::<Vec<_>>()
        .join(" ")
}

/// `ALTER DATABASE old RENAME TO new`
pub fn rename_database(old: &str, new: &str) -> String {
    format!(
        "ALTER DATABASE {} RENAME TO {}",
        quote_identifier(old),
        quote_identifier(new)
    )
}

/// `ALTER DATABASE name OWNER TO owner`
pub fn alter_owner(name: &str, owner: &str) -> String {
    format!(
        "ALTER DATABASE {} OWNER TO {}",
        quote_identifier(name),
        quote_identifier(owner)
    )
}

/// `REASSIGN OWNED BY old TO new`
pub fn reassign_owned(old_owner: &str, new_owner: &str) -> String {
    format!(
        "REASSIGN OWNED BY {} TO {}",
        quote_identifier(old_owner),
        quote_identifier(new_owner)
    )
}

/// `ALTER DATABASE name SET TABLESPACE t`, or `RESET TABLESPACE` when the
/// tablespace is unset or `DEFAULT`
pub fn alter_tablespace(name: &str, tablespace: Option<&str>) -> String {
    match Setting::of(tablespace) {
        Setting::Value(t) => format!(
            "ALTER DATABASE {} SET TABLESPACE {}",
            quote_identifier(name),
            quote_identifier(t)
        ),
        Setting::Unset | Setting::EngineDefault => {
            format!("ALTER DATABASE {} RESET TABLESPACE", quote_identifier(name))
        }
    }
}

/// `ALTER DATABASE name CONNECTION LIMIT = n`
pub fn alter_connection_limit(name: &str, limit: i32) -> String {
    format!(
        "ALTER DATABASE {} CONNECTION LIMIT = {}",
        quote_identifier(name),
        limit
    )
}

/// `ALTER DATABASE name ALLOW_CONNECTIONS b`
pub fn alter_allow_connections(name: &str, allow: bool) -> String {
    format!(
        "ALTER DATABASE {} ALLOW_CONNECTIONS {}",
        quote_identifier(name),
        sql_bool(allow)
    )
}

/// `ALTER DATABASE name IS_TEMPLATE b`
pub fn alter_is_template(name: &str, is_template: bool) -> String {
    format!(
        "ALTER DATABASE {} IS_TEMPLATE {}",
        quote_identifier(name),
        sql_bool(is_template)
    )
}

/// `DROP DATABASE name`, with `WITH (FORCE)` when supported
pub fn drop_database(name: &str, features: &FeatureSet) -> String {
    if features.supports(Feature::ForceDropDatabase) {
        format!("DROP DATABASE {} WITH (FORCE)", quote_identifier(name))
    } else {
        format!("DROP DATABASE {}", quote_identifier(name))
    }
}

/// `GRANT group TO member`
pub fn grant_role(group: &str, member: &str) -> String {
    format!(
        "GRANT {} TO {}",
        quote_identifier(group),
        quote_identifier(member)
    )
}

/// `REVOKE group FROM member`
pub fn revoke_role(group: &str, member: &str) -> String {
    format!(
        "REVOKE {} FROM {}",
        quote_identifier(group),
        quote_identifier(member)
    )
}

/// Terminate every backend connected to the database bound as `$1`, except
/// the calling session
pub fn terminate_backends(features: &FeatureSet) -> String {
    let pid = features.pid_column();
    format!(
        "SELECT pg_terminate_backend({pid}) FROM pg_catalog.pg_stat_activity \
         WHERE datname = $1 AND {pid} <> pg_backend_pid()"
    )
}
