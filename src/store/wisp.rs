use super::issue::looks_like_wisp;
use super::schema::{Tier, ISSUE_COLUMNS};
use super::{
    delete_rows, exists_in, insert_issue, issue_from_row, read_issue, record_event, Issue,
    IssueStore,
};
use crate::error::{DbOp, Error, Result};
use chrono::Utc;
use sqlx::AnyConnection;
use sqlx::Connection;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Maximum ids per `IN (...)` membership query.
const PARTITION_BATCH_SIZE: usize = 500;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Subset of `ids` present in `tier`, queried in batches.
async fn present_in(conn: &mut AnyConnection, tier: Tier, ids: &[&str]) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in ids.chunks(PARTITION_BATCH_SIZE) {
        let sql = format!(
            "SELECT id FROM {} WHERE id IN ({})",
            tier.issues(),
            placeholders(chunk.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in chunk {
            query = query.bind(*id);
        }
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Error::db(DbOp::Query, "partition ids", e))?;
        found.extend(rows);
    }
    Ok(found)
}

impl IssueStore {
    /// Whether `id` is stored in the wisp tier right now.
    ///
    /// The table decides: a wisp-looking id that was promoted (or never stored
    /// as a wisp) is not a wisp, and a custom id can be one.
    pub async fn is_active_wisp(&self, id: &str) -> Result<bool> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            exists_in(&mut conn, Tier::Wisp, id).await
        })
        .await
    }

    /// Split `ids` into `(wisps, permanent)`, preserving input order.
    ///
    /// The naming convention only groups the bulk lookups; membership in the
    /// wisp table decides the result. Ids stored in neither tier are reported
    /// as permanent. An id found in both tiers is a [`Error::TierInvariant`].
    pub async fn partition_by_wisp_status(
        &self,
        ids: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let wisp_set = self
            .guarded(async {
                let mut conn = self.acquire().await?;
                let (likely_wisps, likely_durable): (Vec<&str>, Vec<&str>) = ids
                    .iter()
                    .map(String::as_str)
                    .partition(|id| looks_like_wisp(id));

                let mut wisp_set = present_in(&mut conn, Tier::Wisp, &likely_wisps).await?;
                wisp_set.extend(present_in(&mut conn, Tier::Wisp, &likely_durable).await?);

                let wisp_ids: Vec<&str> = wisp_set.iter().map(String::as_str).collect();
                let in_both = present_in(&mut conn, Tier::Durable, &wisp_ids).await?;
                if let Some(both) = in_both.into_iter().next() {
                    return Err(Error::TierInvariant {
                        id: both,
                        detail: "present in both wisps and issues".to_string(),
                    });
                }
                Ok(wisp_set)
            })
            .await?;

        let (wisps, permanent): (Vec<String>, Vec<String>) =
            ids.iter().cloned().partition(|id| wisp_set.contains(id));
        debug!(
            "Partitioned {} ids: {} wisps, {} permanent",
            wisps.len() + permanent.len(),
            wisps.len(),
            permanent.len()
        );
        Ok((wisps, permanent))
    }

    /// Move a wisp into the durable tier in one transaction.
    ///
    /// The record is re-validated like a fresh insert. Labels and dependencies
    /// are copied straight into the durable tables; comments and events are
    /// copied best effort. A missing wisp is `NotFound` and writes nothing.
    /// On a versioned backend the promoted issue lands in a new commit.
    #[tracing::instrument(skip(self))]
    pub async fn promote_from_ephemeral(&self, id: &str, actor: &str) -> Result<Issue> {
        let issue = self
            .guarded(async {
                let mut tx = self.begin("promote wisp").await?;
                let mut issue = read_issue(&mut tx, Tier::Wisp, id).await?;
                if exists_in(&mut tx, Tier::Durable, id).await? {
                    return Err(Error::TierInvariant {
                        id: id.to_string(),
                        detail: "promotion target already exists in issues".to_string(),
                    });
                }

                issue.ephemeral = false;
                issue.updated_at = Utc::now();
                issue.validate()?;
                insert_issue(&mut tx, Tier::Durable, &issue).await?;

                copy_rows(
                    &mut tx,
                    &format!(
                        "INSERT INTO {} (issue_id, label) SELECT issue_id, label FROM {} WHERE issue_id = ?",
                        Tier::Durable.labels(),
                        Tier::Wisp.labels()
                    ),
                    id,
                    "labels",
                )
                .await?;
                copy_rows(
                    &mut tx,
                    &format!(
                        "INSERT INTO {} (issue_id, depends_on_id, type, created_at, created_by) \
                         SELECT issue_id, depends_on_id, type, created_at, created_by FROM {} WHERE issue_id = ?",
                        Tier::Durable.dependencies(),
                        Tier::Wisp.dependencies()
                    ),
                    id,
                    "dependencies",
                )
                .await?;

                copy_history(
                    &mut tx,
                    &format!(
                        "INSERT INTO {} (issue_id, author, text, created_at) \
                         SELECT issue_id, author, text, created_at FROM {} WHERE issue_id = ? ORDER BY id",
                        Tier::Durable.comments(),
                        Tier::Wisp.comments()
                    ),
                    id,
                    "comments",
                )
                .await;
                copy_history(
                    &mut tx,
                    &format!(
                        "INSERT INTO {} (issue_id, event_type, actor, comment, created_at) \
                         SELECT issue_id, event_type, actor, comment, created_at FROM {} WHERE issue_id = ? ORDER BY id",
                        Tier::Durable.events(),
                        Tier::Wisp.events()
                    ),
                    id,
                    "events",
                )
                .await;

                delete_rows(&mut tx, Tier::Wisp, id).await?;
                record_event(&mut tx, Tier::Durable, id, "promoted", actor, None).await?;
                Self::commit(tx, "promote wisp").await?;
                Ok(issue)
            })
            .await?;

        self.commit_version(&format!("bd: promote {}", id)).await?;
        info!("Promoted {} to a durable issue", id);
        Ok(issue)
    }

    /// Wisps matching `ids`, for callers that already partitioned.
    pub async fn get_wisps(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let mut out = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(PARTITION_BATCH_SIZE) {
                let sql = format!(
                    "SELECT {} FROM {} WHERE id IN ({}) ORDER BY id",
                    ISSUE_COLUMNS,
                    Tier::Wisp.issues(),
                    placeholders(chunk.len())
                );
                let mut query = sqlx::query(&sql);
                for id in chunk {
                    query = query.bind(id.as_str());
                }
                let rows = query
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| Error::db(DbOp::Query, "get wisps", e))?;
                for row in &rows {
                    out.push(issue_from_row(row)?);
                }
            }
            Ok(out)
        })
        .await
    }
}

async fn copy_rows(conn: &mut AnyConnection, sql: &str, id: &str, what: &str) -> Result<()> {
    sqlx::query(sql)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::db(DbOp::Exec, format!("copy {} for {}", what, id), e))?;
    Ok(())
}

/// Copy history rows inside a savepoint so a failure loses only the history.
async fn copy_history(conn: &mut AnyConnection, sql: &str, id: &str, what: &str) {
    let attempt = async {
        let mut savepoint = conn.begin().await?;
        sqlx::query(sql).bind(id).execute(&mut *savepoint).await?;
        savepoint.commit().await
    };
    if let Err(e) = attempt.await {
        warn!("Promotion of {}: failed to copy {} ({}), continuing", id, what, e);
    }
}
