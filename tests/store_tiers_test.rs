//! Routing between the durable and wisp tiers.

use beads_dolt::store::{looks_like_wisp, Issue, IssueStore, Status, Tier};
use beads_dolt::Error;
use tempfile::TempDir;

async fn store() -> IssueStore {
    IssueStore::open_in_memory().await.unwrap()
}

#[tokio::test]
async fn wisp_is_found_ephemerally_then_durably_after_promotion() {
    let store = store().await;
    let wisp = Issue::new("bd-wisp-a1b2", "scratch work").ephemeral();
    store.create_issue(wisp, "alice").await.unwrap();

    assert!(store.is_active_wisp("bd-wisp-a1b2").await.unwrap());
    let (wisps, permanent) = store
        .partition_by_wisp_status(&["bd-wisp-a1b2".to_string()])
        .await
        .unwrap();
    assert_eq!(wisps, vec!["bd-wisp-a1b2".to_string()]);
    assert!(permanent.is_empty());

    let promoted = store
        .promote_from_ephemeral("bd-wisp-a1b2", "alice")
        .await
        .unwrap();
    assert!(!promoted.ephemeral);

    assert!(!store.is_active_wisp("bd-wisp-a1b2").await.unwrap());
    let issue = store.get_issue("bd-wisp-a1b2").await.unwrap();
    assert_eq!(issue.title, "scratch work");
    assert!(!issue.ephemeral);
    let (wisps, permanent) = store
        .partition_by_wisp_status(&["bd-wisp-a1b2".to_string()])
        .await
        .unwrap();
    assert!(wisps.is_empty());
    assert_eq!(permanent, vec!["bd-wisp-a1b2".to_string()]);
}

#[tokio::test]
async fn promoting_missing_wisp_is_not_found_and_writes_nothing() {
    let store = store().await;
    store
        .create_issue(Issue::new("bd-1", "durable"), "alice")
        .await
        .unwrap();

    let err = store
        .promote_from_ephemeral("bd-wisp-missing", "alice")
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {:?}", err);
    assert!(store.get_issue("bd-wisp-missing").await.unwrap_err().is_not_found());

    // Promoting a durable id is also "no such wisp"
    let err = store.promote_from_ephemeral("bd-1", "alice").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.events("bd-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn promotion_carries_labels_dependencies_and_history() {
    let store = store().await;
    store
        .create_issue(Issue::new("bd-10", "parent"), "alice")
        .await
        .unwrap();
    store
        .create_issue(Issue::new("bd-wisp-x9", "child").ephemeral(), "alice")
        .await
        .unwrap();
    store.add_label("bd-wisp-x9", "triage").await.unwrap();
    store.add_label("bd-wisp-x9", "urgent").await.unwrap();
    store
        .add_dependency("bd-wisp-x9", "bd-10", "blocks", "alice")
        .await
        .unwrap();
    store
        .add_comment("bd-wisp-x9", "bob", "looks real")
        .await
        .unwrap();

    store.promote_from_ephemeral("bd-wisp-x9", "bob").await.unwrap();

    assert_eq!(
        store.labels("bd-wisp-x9").await.unwrap(),
        vec!["triage".to_string(), "urgent".to_string()]
    );
    let deps = store.dependencies("bd-wisp-x9").await.unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].depends_on_id, "bd-10");
    assert_eq!(deps[0].dep_type, "blocks");

    let comments = store.comments("bd-wisp-x9").await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].text, "looks real");

    let events: Vec<String> = store
        .events("bd-wisp-x9")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("created"));
    assert_eq!(events.last().map(String::as_str), Some("promoted"));

    assert!(store.get_wisps(&["bd-wisp-x9".to_string()]).await.unwrap().is_empty());
}

#[tokio::test]
async fn wisp_looking_id_never_stored_as_wisp_is_not_a_wisp() {
    let store = store().await;
    assert!(looks_like_wisp("bd-wisp-ghost"));
    assert!(!store.is_active_wisp("bd-wisp-ghost").await.unwrap());

    // Stored durably despite the marker in its name
    store
        .create_issue(Issue::new("bd-wisp-ghost", "named oddly"), "alice")
        .await
        .unwrap();
    assert!(!store.is_active_wisp("bd-wisp-ghost").await.unwrap());
    let (wisps, permanent) = store
        .partition_by_wisp_status(&["bd-wisp-ghost".to_string()])
        .await
        .unwrap();
    assert!(wisps.is_empty());
    assert_eq!(permanent.len(), 1);
}

#[tokio::test]
async fn custom_id_wisp_is_routed_by_table() {
    let store = store().await;
    store
        .create_issue(Issue::new("scratch-7", "custom id").ephemeral(), "alice")
        .await
        .unwrap();

    assert!(!looks_like_wisp("scratch-7"));
    assert!(store.is_active_wisp("scratch-7").await.unwrap());
    store.close_issue("scratch-7", Some("done"), "alice").await.unwrap();
    let issue = store.get_issue("scratch-7").await.unwrap();
    assert_eq!(issue.status, Status::Closed);
    assert!(issue.ephemeral);
}

#[tokio::test]
async fn id_cannot_live_in_both_tiers() {
    let store = store().await;
    store
        .create_issue(Issue::new("bd-5", "durable"), "alice")
        .await
        .unwrap();
    let err = store
        .create_issue(Issue::new("bd-5", "shadow").ephemeral(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TierInvariant { .. }));

    store
        .create_issue(Issue::new("bd-wisp-6", "wisp").ephemeral(), "alice")
        .await
        .unwrap();
    let err = store
        .create_issue(Issue::new("bd-wisp-6", "shadow"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TierInvariant { .. }));
}

#[tokio::test]
async fn partition_preserves_order_across_batches() {
    let store = store().await;
    let mut ids = Vec::new();
    for i in 0..1200 {
        let (id, issue) = if i % 3 == 0 {
            let id = format!("bd-wisp-{}", i);
            (id.clone(), Issue::new(id, "w").ephemeral())
        } else {
            let id = format!("bd-{}", i);
            (id.clone(), Issue::new(id, "d"))
        };
        store.create_issue(issue, "loader").await.unwrap();
        ids.push(id);
    }
    ids.push("bd-unknown".to_string());

    let (wisps, permanent) = store.partition_by_wisp_status(&ids).await.unwrap();
    assert_eq!(wisps.len(), 400);
    assert_eq!(permanent.len(), 801);
    assert_eq!(wisps[0], "bd-wisp-0");
    assert_eq!(wisps[1], "bd-wisp-3");
    assert_eq!(permanent[0], "bd-1");
    assert_eq!(permanent.last().map(String::as_str), Some("bd-unknown"));

    let (none, none_perm) = store.partition_by_wisp_status(&[]).await.unwrap();
    assert!(none.is_empty() && none_perm.is_empty());
}

#[tokio::test]
async fn deleting_a_wisp_removes_its_rows() {
    let store = store().await;
    store
        .create_issue(Issue::new("bd-wisp-d", "gone soon").ephemeral(), "alice")
        .await
        .unwrap();
    store.add_label("bd-wisp-d", "tmp").await.unwrap();
    store.delete_issue("bd-wisp-d").await.unwrap();

    assert!(!store.is_active_wisp("bd-wisp-d").await.unwrap());
    assert!(store.labels("bd-wisp-d").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn tiers_persist_in_a_database_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".beads").join("beads.db");
    {
        let store = IssueStore::open(&path).await.unwrap();
        store
            .create_issue(Issue::new("bd-wisp-p", "kept").ephemeral(), "alice")
            .await
            .unwrap();
        store.close().await;
    }
    let store = IssueStore::open(&path).await.unwrap();
    assert!(store.is_active_wisp("bd-wisp-p").await.unwrap());
    assert_eq!(Tier::Wisp.issues(), "wisps");
}
