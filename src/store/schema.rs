//! Table layout. The wisp tier mirrors the durable tier table for table so a
//! record can move between them column for column.

/// Which set of tables a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Versioned tables, part of commit history.
    Durable,
    /// Ephemeral tables, excluded from commit history.
    Wisp,
}

impl Tier {
    pub fn issues(self) -> &'static str {
        match self {
            Tier::Durable => "issues",
            Tier::Wisp => "wisps",
        }
    }

    pub fn labels(self) -> &'static str {
        match self {
            Tier::Durable => "labels",
            Tier::Wisp => "wisp_labels",
        }
    }

    pub fn dependencies(self) -> &'static str {
        match self {
            Tier::Durable => "dependencies",
            Tier::Wisp => "wisp_dependencies",
        }
    }

    pub fn comments(self) -> &'static str {
        match self {
            Tier::Durable => "comments",
            Tier::Wisp => "wisp_comments",
        }
    }

    pub fn events(self) -> &'static str {
        match self {
            Tier::Durable => "events",
            Tier::Wisp => "wisp_events",
        }
    }

    pub fn other(self) -> Tier {
        match self {
            Tier::Durable => Tier::Wisp,
            Tier::Wisp => Tier::Durable,
        }
    }
}

pub(crate) const ISSUE_COLUMNS: &str = "id, title, description, design, acceptance_criteria, notes, \
     status, priority, issue_type, assignee, created_at, updated_at, closed_at, \
     compaction_level, compacted_at, compacted_at_commit, original_size, ephemeral";

/// `dolt_ignore` patterns keeping the wisp tables out of commit history.
pub const WISP_IGNORE_PATTERNS: [&str; 2] = ["wisps", "wisp_*"];

/// SQL flavour of the connected database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Local SQLite file or in-memory database.
    Sqlite,
    /// `dolt sql-server` over the MySQL protocol.
    Dolt,
}

impl Dialect {
    /// Column type for ids, timestamps and other indexed text.
    fn key(self) -> &'static str {
        match self {
            Dialect::Sqlite => "TEXT",
            Dialect::Dolt => "VARCHAR(255)",
        }
    }

    fn integer(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER",
            Dialect::Dolt => "BIGINT",
        }
    }

    fn serial(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Dolt => "BIGINT PRIMARY KEY AUTO_INCREMENT",
        }
    }

    /// `INSERT` variant that skips rows violating a unique key.
    pub(crate) fn insert_ignore(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INSERT OR IGNORE",
            Dialect::Dolt => "INSERT IGNORE",
        }
    }

    /// Whether writes become part of a versioned commit history.
    pub fn is_versioned(self) -> bool {
        matches!(self, Dialect::Dolt)
    }
}

/// `CREATE TABLE` plus its secondary indexes. SQLite takes indexes as separate
/// statements, MySQL inline.
fn table(dialect: Dialect, name: &str, body: &str, indexes: &[(&str, &str)]) -> Vec<String> {
    match dialect {
        Dialect::Sqlite => {
            let mut stmts = vec![format!("CREATE TABLE IF NOT EXISTS {} ({})", name, body)];
            stmts.extend(indexes.iter().map(|(suffix, cols)| {
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                    name, suffix, name, cols
                )
            }));
            stmts
        }
        Dialect::Dolt => {
            let inline: String = indexes
                .iter()
                .map(|(suffix, cols)| format!(", INDEX idx_{}_{} ({})", name, suffix, cols))
                .collect();
            vec![format!(
                "CREATE TABLE IF NOT EXISTS {} ({}{})",
                name, body, inline
            )]
        }
    }
}

fn tier_tables(dialect: Dialect, tier: Tier) -> Vec<String> {
    let (key, int, serial) = (dialect.key(), dialect.integer(), dialect.serial());
    let mut stmts = table(
        dialect,
        tier.issues(),
        &format!(
            "id {key} NOT NULL PRIMARY KEY, \
             title TEXT NOT NULL, \
             description TEXT NOT NULL, \
             design TEXT NOT NULL, \
             acceptance_criteria TEXT NOT NULL, \
             notes TEXT NOT NULL, \
             status {key} NOT NULL, \
             priority {int} NOT NULL, \
             issue_type {key} NOT NULL, \
             assignee {key}, \
             created_at {key} NOT NULL, \
             updated_at {key} NOT NULL, \
             closed_at {key}, \
             compaction_level {int} NOT NULL DEFAULT 0, \
             compacted_at {key}, \
             compacted_at_commit {key}, \
             original_size {int}, \
             ephemeral {int} NOT NULL DEFAULT 0"
        ),
        &[("status_closed", "status, closed_at")],
    );
    stmts.extend(table(
        dialect,
        tier.labels(),
        &format!(
            "issue_id {key} NOT NULL, label {key} NOT NULL, PRIMARY KEY (issue_id, label)"
        ),
        &[],
    ));
    stmts.extend(table(
        dialect,
        tier.dependencies(),
        &format!(
            "issue_id {key} NOT NULL, \
             depends_on_id {key} NOT NULL, \
             type {key} NOT NULL, \
             created_at {key} NOT NULL, \
             created_by {key} NOT NULL, \
             PRIMARY KEY (issue_id, depends_on_id)"
        ),
        &[("depends_on", "depends_on_id")],
    ));
    stmts.extend(table(
        dialect,
        tier.comments(),
        &format!(
            "id {serial}, \
             issue_id {key} NOT NULL, \
             author {key} NOT NULL, \
             text TEXT NOT NULL, \
             created_at {key} NOT NULL"
        ),
        &[("issue", "issue_id")],
    ));
    stmts.extend(table(
        dialect,
        tier.events(),
        &format!(
            "id {serial}, \
             issue_id {key} NOT NULL, \
             event_type {key} NOT NULL, \
             actor {key} NOT NULL, \
             comment TEXT, \
             created_at {key} NOT NULL"
        ),
        &[("issue", "issue_id")],
    ));
    stmts
}

/// Full schema as individual idempotent statements.
///
/// On dolt the wisp patterns are registered in `dolt_ignore` before any wisp
/// table exists, so the wisp tier is never staged or committed.
pub(crate) fn schema_statements(dialect: Dialect) -> Vec<String> {
    let mut stmts = Vec::new();
    if dialect == Dialect::Dolt {
        stmts.extend(WISP_IGNORE_PATTERNS.iter().map(|pattern| {
            format!(
                "INSERT IGNORE INTO dolt_ignore (pattern, ignored) VALUES ('{}', 1)",
                pattern
            )
        }));
    }
    stmts.extend(tier_tables(dialect, Tier::Durable));
    stmts.extend(tier_tables(dialect, Tier::Wisp));
    stmts.extend(table(
        dialect,
        "config",
        &format!(
            "name {key} NOT NULL PRIMARY KEY, value TEXT NOT NULL",
            key = dialect.key()
        ),
        &[],
    ));
    stmts
}
