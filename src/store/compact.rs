use super::issue::Status;
use super::schema::Tier;
use super::{column, encode_time, read_config, read_issue, record_event, time_column, IssueStore};
use crate::error::{DbOp, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::AnyConnection;
use tracing::{info, warn};

pub const COMPACT_TIER1_DAYS_KEY: &str = "compact_tier1_days";
pub const COMPACT_TIER2_DAYS_KEY: &str = "compact_tier2_days";
pub const DEFAULT_TIER1_DAYS: i64 = 30;
pub const DEFAULT_TIER2_DAYS: i64 = 90;

/// Fraction of content compaction is expected to remove.
pub const SIZE_REDUCTION_RATIO: f64 = 0.7;

const TIER2_REQUIRES_TIER1: &str = "must be tier 1 compacted first";

/// Age thresholds for each compaction tier, in days since closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionThresholds {
    pub tier1_days: i64,
    pub tier2_days: i64,
}

impl Default for CompactionThresholds {
    fn default() -> Self {
        Self {
            tier1_days: DEFAULT_TIER1_DAYS,
            tier2_days: DEFAULT_TIER2_DAYS,
        }
    }
}

impl CompactionThresholds {
    fn days_for(&self, tier: u8) -> i64 {
        if tier == 1 {
            self.tier1_days
        } else {
            self.tier2_days
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionCandidate {
    pub id: String,
    pub closed_at: DateTime<Utc>,
    pub original_size: i64,
    pub estimated_size: i64,
    /// Issues that still depend on this one. Informational only.
    pub dependent_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub total_closed: i64,
    pub level0: i64,
    pub level1: i64,
    pub level2: i64,
    /// Sum of recorded pre-compaction sizes.
    pub original_bytes: i64,
}

async fn threshold_days(conn: &mut AnyConnection, key: &str, default: i64) -> i64 {
    match read_config(conn, key).await {
        Ok(Some(raw)) => match raw.trim().parse::<i64>() {
            Ok(days) if days >= 0 => days,
            _ => {
                warn!(
                    "Invalid {} value '{}', using default {}",
                    key, raw, default
                );
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!("Failed to read {}: {}, using default {}", key, e, default);
            default
        }
    }
}

async fn load_thresholds(conn: &mut AnyConnection) -> CompactionThresholds {
    CompactionThresholds {
        tier1_days: threshold_days(conn, COMPACT_TIER1_DAYS_KEY, DEFAULT_TIER1_DAYS).await,
        tier2_days: threshold_days(conn, COMPACT_TIER2_DAYS_KEY, DEFAULT_TIER2_DAYS).await,
    }
}

fn check_tier(tier: u8) -> Result<()> {
    if tier == 1 || tier == 2 {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "compaction tier must be 1 or 2 (got {})",
            tier
        )))
    }
}

fn estimate(original: i64) -> i64 {
    (original as f64 * (1.0 - SIZE_REDUCTION_RATIO)).round() as i64
}

impl IssueStore {
    pub async fn compaction_thresholds(&self) -> Result<CompactionThresholds> {
        self.guarded(async {
            let mut conn = self.acquire().await?;
            Ok(load_thresholds(&mut conn).await)
        })
        .await
    }

    /// Whether `id` may be compacted to `tier` now, and why not if it may not.
    pub async fn check_eligibility(&self, id: &str, tier: u8) -> Result<(bool, String)> {
        check_tier(tier)?;
        let (issue, thresholds) = self
            .guarded(async {
                let mut conn = self.acquire().await?;
                let issue = read_issue(&mut conn, Tier::Durable, id).await?;
                Ok((issue, load_thresholds(&mut conn).await))
            })
            .await?;

        if issue.status != Status::Closed {
            return Ok((false, "issue is not closed".to_string()));
        }
        let Some(closed_at) = issue.closed_at else {
            return Ok((false, "issue has no closed_at timestamp".to_string()));
        };
        if tier == 1 && issue.compaction_level >= 1 {
            return Ok((
                false,
                format!("already compacted (level {})", issue.compaction_level),
            ));
        }
        if tier == 2 {
            if issue.compaction_level < 1 {
                return Ok((false, TIER2_REQUIRES_TIER1.to_string()));
            }
            if issue.compaction_level >= 2 {
                return Ok((false, "already compacted (level 2)".to_string()));
            }
        }

        let required = thresholds.days_for(tier);
        let age_days = (Utc::now() - closed_at).num_days();
        if age_days < required {
            return Ok((
                false,
                format!(
                    "closed {} days ago, tier {} requires {} days",
                    age_days, tier, required
                ),
            ));
        }
        Ok((true, String::new()))
    }

    /// Record that `id` was compacted to `tier`. Levels only ever increase.
    ///
    /// `commit_hash` names the commit holding the uncompacted content. When
    /// omitted on a versioned backend the current head is recorded, and the
    /// compaction itself is committed on top of it.
    pub async fn apply_compaction(
        &self,
        id: &str,
        tier: u8,
        original_size: i64,
        commit_hash: Option<&str>,
    ) -> Result<()> {
        check_tier(tier)?;
        let commit_hash = match commit_hash {
            Some(hash) => Some(hash.to_string()),
            None => self.head_commit().await?,
        };
        self.guarded(async {
            let mut tx = self.begin("apply compaction").await?;
            let issue = read_issue(&mut tx, Tier::Durable, id).await?;
            if i32::from(tier) <= issue.compaction_level {
                return Err(Error::Validation(format!(
                    "compaction level of {} can only increase (current {}, requested {})",
                    id, issue.compaction_level, tier
                )));
            }

            let now = encode_time(&Utc::now());
            sqlx::query(
                "UPDATE issues SET compaction_level = ?, compacted_at = ?, \
                 compacted_at_commit = ?, original_size = ?, updated_at = ? WHERE id = ?",
            )
            .bind(i64::from(tier))
            .bind(&now)
            .bind(commit_hash.clone())
            .bind(original_size)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db(DbOp::Exec, format!("compact {}", id), e))?;
            record_event(
                &mut tx,
                Tier::Durable,
                id,
                "compacted",
                "compactor",
                Some(&format!("tier {} ({} bytes)", tier, original_size)),
            )
            .await?;
            Self::commit(tx, "apply compaction").await
        })
        .await?;

        self.commit_version(&format!("bd: compact {} to tier {}", id, tier))
            .await?;
        info!(
            "Compacted {} to tier {} (content at {})",
            id,
            tier,
            commit_hash.as_deref().unwrap_or("no commit")
        );
        Ok(())
    }

    pub async fn get_tier1_candidates(&self) -> Result<Vec<CompactionCandidate>> {
        self.candidates(1).await
    }

    pub async fn get_tier2_candidates(&self) -> Result<Vec<CompactionCandidate>> {
        self.candidates(2).await
    }

    /// Eligible issues for `tier`, oldest closure first.
    async fn candidates(&self, tier: u8) -> Result<Vec<CompactionCandidate>> {
        check_tier(tier)?;
        self.guarded(async {
            let mut conn = self.acquire().await?;
            let thresholds = load_thresholds(&mut conn).await;
            let cutoff = Utc::now() - Duration::days(thresholds.days_for(tier));
            let level = i64::from(tier) - 1;

            let rows = sqlx::query(
                "SELECT i.id, i.closed_at, i.original_size, \
                        i.description, i.design, i.acceptance_criteria, i.notes, \
                        (SELECT COUNT(*) FROM dependencies d WHERE d.depends_on_id = i.id) AS dependent_count \
                 FROM issues i \
                 WHERE i.status = 'closed' AND i.closed_at IS NOT NULL \
                   AND i.compaction_level = ? AND i.closed_at <= ? \
                 ORDER BY i.closed_at ASC",
            )
            .bind(level)
            .bind(encode_time(&cutoff))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Error::db(DbOp::Query, "compaction candidates", e))?;

            rows.iter()
                .map(|row| {
                    let recorded: Option<i64> = column(row, "original_size")?;
                    let mut content = 0i64;
                    for name in ["description", "design", "acceptance_criteria", "notes"] {
                        content += column::<String>(row, name)?.len() as i64;
                    }
                    // Tier 2 measures from the size recorded before tier 1
                    let original = match (tier, recorded) {
                        (2, Some(size)) => size,
                        _ => content,
                    };
                    Ok(CompactionCandidate {
                        id: column(row, "id")?,
                        closed_at: time_column(row, "closed_at")?,
                        original_size: original,
                        estimated_size: estimate(original),
                        dependent_count: column(row, "dependent_count")?,
                    })
                })
                .collect()
        })
        .await
    }

    pub async fn compaction_stats(&self) -> Result<CompactionStats> {
        let rows = self
            .guarded(async {
                sqlx::query("SELECT compaction_level, original_size FROM issues WHERE status = 'closed'")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| Error::db(DbOp::Query, "compaction stats", e))
            })
            .await?;

        let mut stats = CompactionStats::default();
        for row in &rows {
            let level: i64 = column(row, "compaction_level")?;
            let size: Option<i64> = column(row, "original_size")?;
            stats.total_closed += 1;
            stats.original_bytes += size.unwrap_or(0);
            match level {
                0 => stats.level0 += 1,
                1 => stats.level1 += 1,
                _ => stats.level2 += 1,
            }
        }
        Ok(stats)
    }
}
