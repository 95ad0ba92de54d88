mod common;

use std::collections::HashSet;

use common::{Fixture, reviewer_id, user_id};
use jury_balance::config::StagingConfig;
use jury_balance::model::*;
use jury_balance::staging::StagingStore;
use jury_balance::store::PrimaryStore;

async fn open_memory() -> StagingStore {
    StagingStore::open(JobId::new(), &StagingConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn file_backed_store_is_removed_on_close() {
    let dir = std::env::temp_dir().join(format!("jury-balance-test-{}", uuid::Uuid::new_v4()));
    let job_id = JobId::new();
    let config = StagingConfig {
        dir: Some(dir.clone()),
        batch_size: 10,
    };

    let staging = StagingStore::open(job_id, &config).await.unwrap();
    let file = dir.join(format!("job-{job_id}.sqlite3"));
    assert!(file.exists());

    staging.close().await.unwrap();
    assert!(!file.exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn import_pages_through_all_assignments() {
    let fx = Fixture::new(1).await;
    let r1 = fx.reviewer(1).await;
    for n in 1..=25 {
        let item = fx.item(n, 100).await;
        fx.assignment(&item, (n % 2 == 0).then_some(r1.id), false).await;
    }

    let staging = StagingStore::open(
        JobId::new(),
        &StagingConfig {
            dir: None,
            batch_size: 7,
        },
    )
    .await
    .unwrap();
    let eligible = HashSet::from([r1.id]);
    let imported = staging
        .import_round(fx.store.as_ref(), fx.round_id, &eligible)
        .await
        .unwrap();

    assert_eq!(imported, 25);
    assert_eq!(staging.unassigned_count().await.unwrap(), 13);
    assert!(staging.has_history().await.unwrap());
    staging.close().await.unwrap();
}

#[tokio::test]
async fn claim_skips_own_and_held_items() {
    let fx = Fixture::new(2).await;
    let r1 = fx.reviewer(1).await;
    let own = fx.item(1, 1).await;
    let held = fx.item(2, 100).await;
    let free = fx.item(3, 100).await;
    fx.assignment(&own, None, false).await;
    fx.assignment(&held, Some(r1.id), false).await;
    fx.assignment(&held, None, false).await;
    fx.assignment(&free, None, false).await;
    fx.assignment(&free, None, false).await;

    let staging = open_memory().await;
    staging
        .import_round(fx.store.as_ref(), fx.round_id, &HashSet::from([r1.id]))
        .await
        .unwrap();

    // Only one slot of `free` may go to r1.
    assert_eq!(staging.claim(r1.id, r1.user_id, 10).await.unwrap(), 1);
    assert_eq!(staging.claim(r1.id, r1.user_id, 10).await.unwrap(), 0);
    assert_eq!(staging.holders(free.id).await.unwrap(), vec![r1.id]);

    let changed = staging
        .export_changes(fx.store.as_ref(), JobId::new(), 100)
        .await
        .unwrap();
    assert_eq!(changed, 1);
    staging.close().await.unwrap();
}

#[tokio::test]
async fn release_returns_ineligible_unevaluated_work() {
    let fx = Fixture::new(1).await;
    let r1 = fx.reviewer(1).await;
    let r2 = fx.reviewer(2).await;
    let a = fx.item(1, 100).await;
    let b = fx.item(2, 100).await;
    fx.assignment(&a, Some(r1.id), true).await;
    fx.assignment(&b, Some(r1.id), false).await;

    let staging = open_memory().await;
    staging
        .import_round(fx.store.as_ref(), fx.round_id, &HashSet::from([r2.id]))
        .await
        .unwrap();

    assert_eq!(staging.release_ineligible().await.unwrap(), 1);
    assert_eq!(staging.unassigned_count().await.unwrap(), 1);
    assert_eq!(staging.changed_count().await.unwrap(), 1);

    let slots = staging.open_slots().await.unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].work_item_id, b.id);
    assert_eq!(
        staging.fallback_candidate(slots[0].assignment_id).await.unwrap(),
        Some(r2.id)
    );
    staging.close().await.unwrap();
}

#[tokio::test]
async fn fallback_prefers_least_loaded_then_lowest_id() {
    let fx = Fixture::new(3).await;
    let r1 = fx.reviewer(1).await;
    fx.reviewer(2).await;
    fx.reviewer(3).await;
    let busy = fx.item(1, 100).await;
    fx.assignment(&busy, Some(r1.id), false).await;
    let open = fx.item(2, 100).await;
    let slot = fx.assignment(&open, None, false).await;

    let staging = open_memory().await;
    let eligible = HashSet::from([reviewer_id(1), reviewer_id(2), reviewer_id(3)]);
    staging
        .import_round(fx.store.as_ref(), fx.round_id, &eligible)
        .await
        .unwrap();

    assert_eq!(
        staging.fallback_candidate(slot.id).await.unwrap(),
        Some(reviewer_id(2))
    );
    staging.close().await.unwrap();
}

#[tokio::test]
async fn swap_exchanges_untouched_rows_once() {
    let fx = Fixture::new(1).await;
    let donor = fx.reviewer(1).await;
    let target = fx.reviewer(2).await;
    let x = fx.item(1, 100).await;
    let y = fx.item(2, 100).await;
    fx.assignment(&x, Some(donor.id), false).await;
    fx.assignment(&y, Some(target.id), false).await;

    let staging = open_memory().await;
    staging
        .import_round(fx.store.as_ref(), fx.round_id, &HashSet::from([target.id]))
        .await
        .unwrap();

    let t = (target.id, user_id(2));
    let d = (donor.id, user_id(1));
    assert!(staging.swap(t, d).await.unwrap());
    assert_eq!(staging.holders(x.id).await.unwrap(), vec![target.id]);
    assert_eq!(staging.holders(y.id).await.unwrap(), vec![donor.id]);
    // Both rows are now marked as moved by this job.
    assert!(!staging.swap(t, d).await.unwrap());

    let written = staging
        .export_changes(fx.store.as_ref(), JobId::new(), 1)
        .await
        .unwrap();
    assert_eq!(written, 2);
    let rows = fx.store.list_assignments(fx.round_id, None, 10).await.unwrap();
    assert!(rows.iter().all(|a| a.job_id.is_some()));
    staging.close().await.unwrap();
}

#[tokio::test]
async fn export_clears_moved_rows_before_filling_them() {
    let fx = Fixture::new(2).await;
    let first_donor = fx.reviewer(1).await;
    let second_donor = fx.reviewer(2).await;
    let target = fx.reviewer(3).await;
    let shared = fx.item(1, 100).await;
    let other = fx.item(2, 100).await;
    let kept = fx.item(3, 100).await;
    // The row the target finally takes on `shared` sorts before the one it gives away.
    let incoming = fx.assignment(&shared, Some(second_donor.id), false).await;
    let outgoing = fx.assignment(&shared, Some(target.id), false).await;
    let from_first = fx.assignment(&other, Some(first_donor.id), false).await;
    let to_second = fx.assignment(&kept, Some(target.id), false).await;

    let staging = open_memory().await;
    staging
        .import_round(fx.store.as_ref(), fx.round_id, &HashSet::from([target.id]))
        .await
        .unwrap();
    let t = (target.id, target.user_id);
    assert!(staging.swap(t, (first_donor.id, first_donor.user_id)).await.unwrap());
    assert!(staging.swap(t, (second_donor.id, second_donor.user_id)).await.unwrap());

    let written = staging
        .export_changes(fx.store.as_ref(), JobId::new(), 1)
        .await
        .unwrap();
    assert_eq!(written, 4);

    let rows = fx.store.list_assignments(fx.round_id, None, 10).await.unwrap();
    let reviewer_of = |id: AssignmentId| rows.iter().find(|a| a.id == id).unwrap().reviewer_id;
    assert_eq!(reviewer_of(incoming.id), Some(target.id));
    assert_eq!(reviewer_of(outgoing.id), Some(first_donor.id));
    assert_eq!(reviewer_of(from_first.id), Some(target.id));
    assert_eq!(reviewer_of(to_second.id), Some(second_donor.id));
    fx.assert_constraints().await;
    staging.close().await.unwrap();
}
