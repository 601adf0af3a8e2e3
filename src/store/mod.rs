//! Issue storage.
//!
//! Records live in one of two tiers (see [`Tier`]): the durable, versioned
//! tables or the parallel wisp tables. Reads and writes for an existing id are
//! routed by which table holds it, never by what the id looks like.
//!
//! The store normally talks to the project's dolt sql-server over the MySQL
//! protocol ([`IssueStore::connect`]). Every call then goes through the
//! server port's circuit breaker, and each durable write ends in a dolt
//! commit. A local SQLite file ([`IssueStore::open`]) serves the same API
//! without history.

mod compact;
mod issue;
mod schema;
mod wisp;

pub use compact::{
    CompactionCandidate, CompactionStats, CompactionThresholds, COMPACT_TIER1_DAYS_KEY,
    COMPACT_TIER2_DAYS_KEY, DEFAULT_TIER1_DAYS, DEFAULT_TIER2_DAYS, SIZE_REDUCTION_RATIO,
};
pub use issue::{
    looks_like_wisp, Comment, Dependency, Event, Issue, IssueType, Status, MAX_TITLE_LEN,
    WISP_ID_MARKER,
};
pub use schema::{Dialect, Tier, WISP_IGNORE_PATTERNS};

use crate::breaker::CircuitBreaker;
use crate::error::{DbOp, Error, Result};
use crate::server::ServerManager;
use chrono::{DateTime, SecondsFormat, Utc};
use schema::ISSUE_COLUMNS;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyConnection;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Row, Transaction};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// dolt sql-server's built-in superuser, passwordless on localhost.
pub const DEFAULT_USER: &str = "root";

/// Address of a running dolt sql-server database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoltTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// How long a call waits for a pooled connection before failing.
    pub acquire_timeout: Duration,
}

impl DoltTarget {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: DEFAULT_USER.to_string(),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "mysql://{}@{}:{}/{}",
            self.user, host, self.port, self.database
        )
    }
}

/// Handle to the issue database. Cheap to clone.
#[derive(Clone)]
pub struct IssueStore {
    pool: AnyPool,
    dialect: Dialect,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for IssueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueStore")
            .field("dialect", &self.dialect)
            .field("port", &self.breaker.as_ref().map(|b| b.port()))
            .finish_non_exhaustive()
    }
}

fn sqlite_pool(max_connections: u32) -> AnyPoolOptions {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
}

impl IssueStore {
    /// Store on the project's dolt server, starting the server if needed.
    ///
    /// Calls are gated by the manager's breaker for the server port.
    pub async fn connect(manager: &ServerManager) -> Result<Self> {
        let port = manager.ensure_running().await?;
        let target = DoltTarget::new(manager.client_host(), port, manager.config().database());
        let breaker = manager.breakers().map(|registry| registry.for_port(port));
        Self::connect_dolt(&target, breaker).await
    }

    /// Store on an already running dolt server.
    pub async fn connect_dolt(
        target: &DoltTarget,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(target.acquire_timeout)
            .connect_lazy(&target.url())?;
        debug!(
            "Opening dolt store {}:{}/{}",
            target.host, target.port, target.database
        );
        Self::init(pool, Dialect::Dolt, breaker).await
    }

    /// Local SQLite store at `path`, created if missing.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // sqlx opens SQLite in WAL mode with a 5s busy timeout
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = sqlite_pool(MAX_CONNECTIONS).connect(&url).await?;
        Self::init(pool, Dialect::Sqlite, None).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        // One connection: the in-memory database lives and dies with it
        let pool = sqlite_pool(1).connect("sqlite::memory:").await?;
        Self::init(pool, Dialect::Sqlite, None).await
    }

    async fn init(pool: AnyPool, dialect: Dialect, breaker: Option<Arc<CircuitBreaker>>) -> Result<Self> {
        let store = Self {
            pool,
            dialect,
            breaker,
        };
        store
            .guarded(async {
                let mut conn = store.acquire().await?;
                for stmt in schema::schema_statements(dialect) {
                    sqlx::raw_sql(&stmt)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| Error::db(DbOp::Exec, "create schema", e))?;
                }
                Ok(())
            })
            .await?;
        store.commit_version("bd: initialize schema").await?;
        Ok(store)
    }

    /// Gate every call through `breaker` from now on.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Underlying pool, for queries the store has no method for.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Close every connection. Later calls fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run `op` behind the server's circuit breaker, if there is one.
    pub(crate) async fn guarded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match &self.breaker {
            Some(breaker) => breaker.call(op).await,
            None => op.await,
        }
    }

    pub(crate) async fn acquire(&self) -> Result<PoolConnection<Any>> {
        Ok(self.pool.acquire().await?)
    }

    pub(crate) async fn begin(&self, context: &str) -> Result<Transaction<'static, Any>> {
        self.pool
            .begin()
            .await
            .map_err(|e| Error::db(DbOp::Transaction, context, e))
    }

    pub(crate) async fn commit(tx: Transaction<'static, Any>, context: &str) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| Error::db(DbOp::Transaction, context, e))
    }

    /// Commit the working set to version history and return the new commit
    /// hash. `None` when nothing changed or the backend keeps no history.
    ///
    /// Wisp tables are in `dolt_ignore` and never become part of a commit.
    pub async fn commit_version(&self, message: &str) -> Result<Option<String>> {
        if !self.dialect.is_versioned() {
            return Ok(None);
        }
        self.guarded(async {
            let result = sqlx::query("CALL DOLT_COMMIT('-Am', ?)")
                .bind(message)
                .fetch_optional(&self.pool)
                .await;
            match result {
                Ok(row) => {
                    let hash = row
                        .map(|row| row.try_get::<String, _>(0))
                        .transpose()
                        .map_err(|e| Error::db(DbOp::Scan, "dolt commit", e))?;
                    if let Some(hash) = &hash {
                        debug!("Committed {} ({})", hash, message);
                    }
                    Ok(hash)
                }
                Err(e) if e.to_string().contains("nothing to commit") => Ok(None),
                Err(e) => Err(Error::db(DbOp::Exec, "dolt commit", e)),
            }
        })
        .await
    }

    /// Hash of the current head commit. `None` without version history.
    pub async fn head_commit(&self) -> Result<Option<String>> {
        if !self.dialect.is_versioned() {
            return Ok(None);
        }
        self.guarded(async {
            let hash: String = sqlx::query_scalar("SELECT DOLT_HASHOF('HEAD')")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::db(DbOp::Query, "head commit", e))?;
            Ok(Some(hash))
        })
        .await
    }

    async fn commit_tier(&self, tier: Tier, message: &str) -> Result<()> {
        if tier == Tier::Durable {
            self.commit_version(message).await?;
        }
        Ok(())
    }

    /// Insert a new issue into the tier its `ephemeral` flag selects.
    pub async fn create_issue(&self, issue: Issue, actor: &str) -> Result<Issue> {
        issue.validate()?;
        let tier = if issue.ephemeral { Tier::Wisp } else { Tier::Durable };
        self.guarded(async {
            let mut tx = self.begin("create issue").await?;
            if exists_in(&mut tx, tier.other(), &issue.id).await? {
                return Err(Error::TierInvariant {
                    id: issue.id.clone(),
                    detail: format!("already stored in {}", tier.other().issues()),
                });
            }
            insert_issue(&mut tx, tier, &issue).await?;
            record_event(&mut tx, tier, &issue.id, "created", actor, None).await?;
            Self::commit(tx, "create issue").await
        })
        .await?;
        self.commit_tier(tier, &format!("bd: create {}", issue.id)).await?;
        debug!("Created {} in {}", issue.id, tier.issues());
        Ok(issue)
    }

    pub async fn get_issue(&self, id: &str) -> Result<Issue> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let tier = tier_of(&mut conn, id).await?;
            read_issue(&mut conn, tier, id).await
        })
        .await
    }

    pub async fn close_issue(&self, id: &str, reason: Option<&str>, actor: &str) -> Result<()> {
        let tier = self
            .guarded(async {
                let mut tx = self.begin("close issue").await?;
                let tier = tier_of(&mut tx, id).await?;
                let now = encode_time(&Utc::now());
                let sql = format!(
                    "UPDATE {} SET status = 'closed', closed_at = ?, updated_at = ? WHERE id = ?",
                    tier.issues()
                );
                sqlx::query(&sql)
                    .bind(&now)
                    .bind(&now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| Error::db(DbOp::Exec, format!("close {}", id), e))?;
                record_event(&mut tx, tier, id, "closed", actor, reason).await?;
                Self::commit(tx, "close issue").await?;
                Ok(tier)
            })
            .await?;
        self.commit_tier(tier, &format!("bd: close {}", id)).await
    }

    pub async fn delete_issue(&self, id: &str) -> Result<()> {
        let tier = self
            .guarded(async {
                let mut tx = self.begin("delete issue").await?;
                let tier = tier_of(&mut tx, id).await?;
                delete_rows(&mut tx, tier, id).await?;
                Self::commit(tx, "delete issue").await?;
                Ok(tier)
            })
            .await?;
        self.commit_tier(tier, &format!("bd: delete {}", id)).await
    }

    pub async fn add_label(&self, id: &str, label: &str) -> Result<()> {
        let tier = self
            .guarded(async {
                let mut tx = self.begin("add label").await?;
                let tier = tier_of(&mut tx, id).await?;
                let sql = format!(
                    "{} INTO {} (issue_id, label) VALUES (?, ?)",
                    self.dialect.insert_ignore(),
                    tier.labels()
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(label)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| Error::db(DbOp::Exec, format!("label {}", id), e))?;
                Self::commit(tx, "add label").await?;
                Ok(tier)
            })
            .await?;
        self.commit_tier(tier, &format!("bd: label {} {}", id, label)).await
    }

    pub async fn labels(&self, id: &str) -> Result<Vec<String>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let tier = tier_of(&mut conn, id).await?;
            let sql = format!(
                "SELECT label FROM {} WHERE issue_id = ? ORDER BY label",
                tier.labels()
            );
            sqlx::query_scalar(&sql)
                .bind(id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::db(DbOp::Query, "labels", e))
        })
        .await
    }

    /// Record that `id` depends on `depends_on_id`. Routed by `id`'s tier.
    pub async fn add_dependency(
        &self,
        id: &str,
        depends_on_id: &str,
        dep_type: &str,
        actor: &str,
    ) -> Result<()> {
        let tier = self
            .guarded(async {
                let mut tx = self.begin("add dependency").await?;
                let tier = tier_of(&mut tx, id).await?;
                let sql = format!(
                    "INSERT INTO {} (issue_id, depends_on_id, type, created_at, created_by) \
                     VALUES (?, ?, ?, ?, ?)",
                    tier.dependencies()
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(depends_on_id)
                    .bind(dep_type)
                    .bind(encode_time(&Utc::now()))
                    .bind(actor)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::db(DbOp::Exec, format!("dependency {} -> {}", id, depends_on_id), e)
                    })?;
                Self::commit(tx, "add dependency").await?;
                Ok(tier)
            })
            .await?;
        self.commit_tier(tier, &format!("bd: {} depends on {}", id, depends_on_id))
            .await
    }

    pub async fn dependencies(&self, id: &str) -> Result<Vec<Dependency>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let tier = tier_of(&mut conn, id).await?;
            let sql = format!(
                "SELECT issue_id, depends_on_id, type, created_at, created_by FROM {} \
                 WHERE issue_id = ? ORDER BY depends_on_id",
                tier.dependencies()
            );
            let rows = sqlx::query(&sql)
                .bind(id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::db(DbOp::Query, "dependencies", e))?;
            rows.iter()
                .map(|row| {
                    Ok(Dependency {
                        issue_id: column(row, "issue_id")?,
                        depends_on_id: column(row, "depends_on_id")?,
                        dep_type: column(row, "type")?,
                        created_at: time_column(row, "created_at")?,
                        created_by: column(row, "created_by")?,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn add_comment(&self, id: &str, author: &str, text: &str) -> Result<Comment> {
        let (tier, comment) = self
            .guarded(async {
                let mut tx = self.begin("add comment").await?;
                let tier = tier_of(&mut tx, id).await?;
                let now = Utc::now();
                let sql = format!(
                    "INSERT INTO {} (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                    tier.comments()
                );
                let result = sqlx::query(&sql)
                    .bind(id)
                    .bind(author)
                    .bind(text)
                    .bind(encode_time(&now))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| Error::db(DbOp::Exec, format!("comment on {}", id), e))?;
                Self::commit(tx, "add comment").await?;
                let comment = Comment {
                    id: result.last_insert_id().unwrap_or_default(),
                    issue_id: id.to_string(),
                    author: author.to_string(),
                    text: text.to_string(),
                    created_at: now,
                };
                Ok((tier, comment))
            })
            .await?;
        self.commit_tier(tier, &format!("bd: comment on {}", id)).await?;
        Ok(comment)
    }

    pub async fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let tier = tier_of(&mut conn, id).await?;
            let sql = format!(
                "SELECT id, issue_id, author, text, created_at FROM {} \
                 WHERE issue_id = ? ORDER BY id",
                tier.comments()
            );
            let rows = sqlx::query(&sql)
                .bind(id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::db(DbOp::Query, "comments", e))?;
            rows.iter()
                .map(|row| {
                    Ok(Comment {
                        id: column(row, "id")?,
                        issue_id: column(row, "issue_id")?,
                        author: column(row, "author")?,
                        text: column(row, "text")?,
                        created_at: time_column(row, "created_at")?,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn events(&self, id: &str) -> Result<Vec<Event>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let tier = tier_of(&mut conn, id).await?;
            let sql = format!(
                "SELECT id, issue_id, event_type, actor, comment, created_at FROM {} \
                 WHERE issue_id = ? ORDER BY id",
                tier.events()
            );
            let rows = sqlx::query(&sql)
                .bind(id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::db(DbOp::Query, "events", e))?;
            rows.iter()
                .map(|row| {
                    Ok(Event {
                        id: column(row, "id")?,
                        issue_id: column(row, "issue_id")?,
                        event_type: column(row, "event_type")?,
                        actor: column(row, "actor")?,
                        comment: column(row, "comment")?,
                        created_at: time_column(row, "created_at")?,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            read_config(&mut conn, key).await
        })
        .await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.guarded(async {
            let mut tx = self.begin("set config").await?;
            sqlx::query("DELETE FROM config WHERE name = ?")
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::db(DbOp::Exec, format!("config {}", key), e))?;
            sqlx::query("INSERT INTO config (name, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::db(DbOp::Exec, format!("config {}", key), e))?;
            Self::commit(tx, "set config").await
        })
        .await?;
        info!("Set {} = {}", key, value);
        self.commit_tier(Tier::Durable, &format!("bd: config {}", key))
            .await
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str, name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("bad timestamp in {}: '{}' ({})", name, raw, e)))
}

pub(crate) fn column<'r, T>(row: &'r AnyRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Any> + sqlx::Type<Any>,
{
    row.try_get(name)
        .map_err(|e| Error::db(DbOp::Scan, name.to_string(), e))
}

pub(crate) fn time_column(row: &AnyRow, name: &str) -> Result<DateTime<Utc>> {
    decode_time(&column::<String>(row, name)?, name)
}

fn optional_time_column(row: &AnyRow, name: &str) -> Result<Option<DateTime<Utc>>> {
    column::<Option<String>>(row, name)?
        .map(|raw| decode_time(&raw, name))
        .transpose()
}

pub(crate) fn issue_from_row(row: &AnyRow) -> Result<Issue> {
    Ok(Issue {
        id: column(row, "id")?,
        title: column(row, "title")?,
        description: column(row, "description")?,
        design: column(row, "design")?,
        acceptance_criteria: column(row, "acceptance_criteria")?,
        notes: column(row, "notes")?,
        status: column::<String>(row, "status")?.parse()?,
        priority: column::<i64>(row, "priority")? as i32,
        issue_type: column::<String>(row, "issue_type")?.parse()?,
        assignee: column(row, "assignee")?,
        created_at: time_column(row, "created_at")?,
        updated_at: time_column(row, "updated_at")?,
        closed_at: optional_time_column(row, "closed_at")?,
        compaction_level: column::<i64>(row, "compaction_level")? as i32,
        compacted_at: optional_time_column(row, "compacted_at")?,
        compacted_at_commit: column(row, "compacted_at_commit")?,
        original_size: column(row, "original_size")?,
        ephemeral: column::<i64>(row, "ephemeral")? != 0,
    })
}

pub(crate) async fn read_config(conn: &mut AnyConnection, key: &str) -> Result<Option<String>> {
    sqlx::query_scalar("SELECT value FROM config WHERE name = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Query, format!("config {}", key), e))
}

pub(crate) async fn exists_in(conn: &mut AnyConnection, tier: Tier, id: &str) -> Result<bool> {
    let sql = format!("SELECT id FROM {} WHERE id = ? LIMIT 1", tier.issues());
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Query, format!("lookup {}", id), e))?;
    Ok(row.is_some())
}

/// Tier currently holding `id`.
pub(crate) async fn tier_of(conn: &mut AnyConnection, id: &str) -> Result<Tier> {
    if exists_in(conn, Tier::Wisp, id).await? {
        Ok(Tier::Wisp)
    } else if exists_in(conn, Tier::Durable, id).await? {
        Ok(Tier::Durable)
    } else {
        Err(Error::NotFound(format!("issue {}", id)))
    }
}

pub(crate) async fn read_issue(conn: &mut AnyConnection, tier: Tier, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", ISSUE_COLUMNS, tier.issues());
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Query, format!("issue {}", id), e))?;
    issue_from_row(&row)
}

pub(crate) async fn insert_issue(conn: &mut AnyConnection, tier: Tier, issue: &Issue) -> Result<()> {
    let placeholders = vec!["?"; ISSUE_COLUMNS.split(',').count()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        tier.issues(),
        ISSUE_COLUMNS,
        placeholders
    );
    sqlx::query(&sql)
        .bind(&issue.id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(&issue.design)
        .bind(&issue.acceptance_criteria)
        .bind(&issue.notes)
        .bind(issue.status.as_str())
        .bind(i64::from(issue.priority))
        .bind(issue.issue_type.as_str())
        .bind(issue.assignee.clone())
        .bind(encode_time(&issue.created_at))
        .bind(encode_time(&issue.updated_at))
        .bind(issue.closed_at.as_ref().map(encode_time))
        .bind(i64::from(issue.compaction_level))
        .bind(issue.compacted_at.as_ref().map(encode_time))
        .bind(issue.compacted_at_commit.clone())
        .bind(issue.original_size)
        .bind(i64::from(issue.ephemeral))
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Exec, format!("insert {}", issue.id), e))?;
    Ok(())
}

pub(crate) async fn record_event(
    conn: &mut AnyConnection,
    tier: Tier,
    id: &str,
    event_type: &str,
    actor: &str,
    comment: Option<&str>,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (issue_id, event_type, actor, comment, created_at) \
         VALUES (?, ?, ?, ?, ?)",
        tier.events()
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(event_type)
        .bind(actor)
        .bind(comment.map(str::to_string))
        .bind(encode_time(&Utc::now()))
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Exec, format!("{} event for {}", event_type, id), e))?;
    Ok(())
}

/// Delete an issue and every auxiliary row keyed by it in one tier.
pub(crate) async fn delete_rows(conn: &mut AnyConnection, tier: Tier, id: &str) -> Result<()> {
    for table in [tier.labels(), tier.dependencies(), tier.comments(), tier.events()] {
        let sql = format!("DELETE FROM {} WHERE issue_id = ?", table);
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::db(DbOp::Exec, format!("delete {} rows for {}", table, id), e))?;
    }
    let sql = format!("DELETE FROM {} WHERE id = ?", tier.issues());
    sqlx::query(&sql)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Exec, format!("delete {}", id), e))?;
    Ok(())
}
