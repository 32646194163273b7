use std::sync::Arc;

use leadsync_core::ledger::{self, LedgerStore, SqliteLedger};
use leadsync_core::model::LedgerMetadata;

fn metadata(email: &str, owner: &str) -> LedgerMetadata {
    LedgerMetadata::new(email, owner, "campaign-a")
}

#[tokio::test]
async fn unknown_records_are_not_processed() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    assert!(!ledger.is_processed("c1").await.unwrap());
    assert!(!ledger.is_email_processed("a@x.com").await.unwrap());
    assert!(ledger.entry("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn repeated_marks_converge_on_one_row() {
    let ledger = SqliteLedger::in_memory().await.unwrap();

    ledger
        .mark_processed("c1", &metadata("a@x.com", "o1"))
        .await
        .unwrap();
    let first = ledger.entry("c1").await.unwrap().unwrap();

    ledger
        .mark_processed(
            "c1",
            &metadata("a@x.com", "o1").with_extra("reason", "remote_exists"),
        )
        .await
        .unwrap();
    let second = ledger.entry("c1").await.unwrap().unwrap();

    assert!(second.processed_at >= first.processed_at);
    assert_eq!(
        second.metadata.get("reason").map(String::as_str),
        Some("remote_exists")
    );
    assert_eq!(ledger.stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn email_lookups_ignore_case_and_padding() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    ledger
        .mark_processed("c1", &metadata("  Ada@Example.COM ", "o1"))
        .await
        .unwrap();

    assert!(ledger.is_email_processed("ada@example.com").await.unwrap());
    assert!(ledger.is_email_processed("ADA@EXAMPLE.COM").await.unwrap());
    assert_eq!(
        ledger.entry("c1").await.unwrap().unwrap().email,
        "ada@example.com"
    );
}

#[tokio::test]
async fn stats_group_by_owner_and_day() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    for (id, email, owner) in [
        ("c1", "a@x.com", "o1"),
        ("c2", "b@x.com", "o1"),
        ("c3", "c@x.com", "o2"),
    ] {
        ledger.mark_processed(id, &metadata(email, owner)).await.unwrap();
    }

    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.today, 3);
    assert_eq!(stats.by_owner.get("o1"), Some(&2));
    assert_eq!(stats.by_owner.get("o2"), Some(&1));
}

#[tokio::test]
async fn ensure_schema_is_repeatable() {
    let ledger = SqliteLedger::in_memory().await.unwrap();
    ledger.mark_processed("c1", &metadata("a@x.com", "o1")).await.unwrap();
    ledger.ensure_schema().await.unwrap();
    assert!(ledger.is_processed("c1").await.unwrap());
}

#[tokio::test]
async fn racing_pools_on_one_file_never_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("ledger.db").display());

    let a = ledger::connect(&url, 2).await.unwrap();
    let b = ledger::connect(&url, 2).await.unwrap();

    let mut tasks = Vec::new();
    for (i, store) in [a.clone(), b.clone()].into_iter().cycle().take(20).enumerate() {
        let store: Arc<dyn LedgerStore> = store;
        tasks.push(tokio::spawn(async move {
            let email = format!("lead{}@x.com", i % 5);
            store
                .mark_processed(&format!("c{}", i % 5), &metadata(&email, "o1"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(a.stats().await.unwrap().total, 5);
    assert_eq!(b.stats().await.unwrap().total, 5);
    assert!(b.is_processed("c4").await.unwrap());
}
