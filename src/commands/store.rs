use crate::output::UserOutput;
use beads_dolt::store::CompactionCandidate;
use beads_dolt::{IssueStore, ServerManager};
use std::path::Path;

/// Store on this project's dolt server, started on demand.
async fn open_store(root: &Path) -> anyhow::Result<IssueStore> {
    let manager = ServerManager::from_project(root)?;
    Ok(IssueStore::connect(&manager).await?)
}

fn default_actor() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "bd".to_string())
}

pub async fn run_promote(
    root: &Path,
    id: &str,
    actor: Option<&str>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = open_store(root).await?;
    let actor = actor.map(str::to_string).unwrap_or_else(default_actor);
    let issue = store.promote_from_ephemeral(id, &actor).await?;
    out.success(&format!("Promoted {} to a durable issue: {}", issue.id, issue.title));
    Ok(())
}

pub async fn run_compact_stats(root: &Path, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let store = open_store(root).await?;
    let stats = store.compaction_stats().await?;
    let thresholds = store.compaction_thresholds().await?;

    if json {
        let value = serde_json::json!({
            "stats": stats,
            "thresholds": thresholds,
        });
        out.status(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    out.status("Compaction:");
    out.status(&format!("{:-<50}", ""));
    out.status(&format!("  Closed issues:  {}", stats.total_closed));
    out.status(&format!("  Uncompacted:    {}", stats.level0));
    out.status(&format!(
        "  Tier 1:         {} (after {} days)",
        stats.level1, thresholds.tier1_days
    ));
    out.status(&format!(
        "  Tier 2:         {} (after {} days)",
        stats.level2, thresholds.tier2_days
    ));
    out.status(&format!("  Original bytes: {}", stats.original_bytes));
    Ok(())
}

pub async fn run_compact_candidates(
    root: &Path,
    tier: u8,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = open_store(root).await?;
    let candidates: Vec<CompactionCandidate> = match tier {
        1 => store.get_tier1_candidates().await?,
        2 => store.get_tier2_candidates().await?,
        other => anyhow::bail!("compaction tier must be 1 or 2 (got {})", other),
    };

    if json {
        out.status(&serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }
    if candidates.is_empty() {
        out.status(&format!("No tier {} candidates", tier));
        return Ok(());
    }
    for c in &candidates {
        out.status(&format!(
            "{}  closed {}  {} -> ~{} bytes{}",
            c.id,
            c.closed_at.format("%Y-%m-%d"),
            c.original_size,
            c.estimated_size,
            if c.dependent_count > 0 {
                format!("  ({} dependents)", c.dependent_count)
            } else {
                String::new()
            }
        ));
    }
    Ok(())
}

pub async fn run_compact_check(
    root: &Path,
    id: &str,
    tier: u8,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let store = open_store(root).await?;
    let (eligible, reason) = store.check_eligibility(id, tier).await?;
    if eligible {
        out.success(&format!("{} is eligible for tier {} compaction", id, tier));
    } else {
        out.warning(&format!("{} is not eligible for tier {}: {}", id, tier, reason));
    }
    Ok(())
}
