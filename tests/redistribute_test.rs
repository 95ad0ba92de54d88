mod common;

use std::collections::HashMap;

use common::{Fixture, reviewer_id};
use jury_balance::config::DistributionConfig;
use jury_balance::model::*;

async fn reviewers_of(fx: &Fixture) -> HashMap<AssignmentId, Option<ReviewerId>> {
    fx.assignments()
        .await
        .into_iter()
        .map(|a| (a.id, a.reviewer_id))
        .collect()
}

#[tokio::test]
async fn swaps_move_items_but_keep_counts() {
    let fx = Fixture::new(1).await;
    let donor = fx.reviewer(1).await;
    let target = fx.reviewer(2).await;

    let mut donor_rows = Vec::new();
    let mut target_rows = Vec::new();
    for n in 1..=3 {
        let item = fx.item(n, 100).await;
        donor_rows.push(fx.assignment(&item, Some(donor.id), false).await);
    }
    for n in 4..=6 {
        let item = fx.item(n, 100).await;
        target_rows.push(fx.assignment(&item, Some(target.id), false).await);
    }
    let before = fx.loads().await;

    let job = fx
        .service()
        .start_redistribution(fx.round_id, vec![donor.id], vec![target.id])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success, "failures: {:?}", job.failures);
    assert!(job.success_count > 0);
    assert_eq!(fx.loads().await, before);

    let after = reviewers_of(&fx).await;
    let moved_to_target = donor_rows
        .iter()
        .filter(|a| after[&a.id] == Some(target.id))
        .count();
    assert!(moved_to_target > 0);
    fx.assert_constraints().await;
    assert_eq!(fx.round().await.status, RoundStatus::Evaluating);
}

#[tokio::test]
async fn evaluated_assignments_never_move() {
    let fx = Fixture::new(1).await;
    let donor = fx.reviewer(1).await;
    let target = fx.reviewer(2).await;

    let mut evaluated = Vec::new();
    for n in 1..=4 {
        let item = fx.item(n, 100).await;
        evaluated.push(fx.assignment(&item, Some(donor.id), true).await);
    }
    let open_item = fx.item(5, 100).await;
    fx.assignment(&open_item, Some(donor.id), false).await;
    let target_item = fx.item(6, 100).await;
    fx.assignment(&target_item, Some(target.id), false).await;

    let job = fx
        .service()
        .start_redistribution(fx.round_id, vec![donor.id], vec![target.id])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Success);

    let after = reviewers_of(&fx).await;
    for a in &evaluated {
        assert_eq!(after[&a.id], Some(donor.id));
    }
    fx.assert_constraints().await;
}

#[tokio::test]
async fn no_donors_claims_unassigned_work() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;
    fx.reviewer(2).await;
    for n in 1..=4 {
        let item = fx.item(n, 100).await;
        fx.assignment(&item, None, false).await;
    }

    let job = fx
        .service()
        .start_redistribution(fx.round_id, vec![], vec![reviewer_id(1), reviewer_id(2)])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.success_count, 4);
    let loads = fx.loads().await;
    assert_eq!(loads[&reviewer_id(1)], 2);
    assert_eq!(loads[&reviewer_id(2)], 2);
}

#[tokio::test]
async fn nothing_to_move_fails_with_no_eligible_work() {
    let fx = Fixture::new(1).await;
    let donor = fx.reviewer(1).await;
    let target = fx.reviewer(2).await;
    let item = fx.item(1, 100).await;
    fx.assignment(&item, Some(donor.id), true).await;

    let job = fx
        .service()
        .start_redistribution(fx.round_id, vec![donor.id], vec![target.id])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(
        job.failures["error"].contains("no eligible assignments"),
        "unexpected error: {:?}",
        job.failures
    );
    assert_eq!(fx.round().await.status, RoundStatus::Evaluating);
}

#[tokio::test]
async fn swap_skips_items_the_target_submitted() {
    let fx = Fixture::new(1).await;
    let donor = fx.reviewer(1).await;
    let target = fx.reviewer(2).await;
    // The target submitted the only item the donor could hand over.
    let own = fx.item(1, 2).await;
    let own_row = fx.assignment(&own, Some(donor.id), false).await;
    let other = fx.item(2, 100).await;
    fx.assignment(&other, Some(target.id), false).await;

    let job = fx
        .service()
        .start_redistribution(fx.round_id, vec![donor.id], vec![target.id])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(reviewers_of(&fx).await[&own_row.id], Some(donor.id));
    fx.assert_constraints().await;
}

#[tokio::test]
async fn swap_chains_export_across_single_row_batches() {
    let fx = Fixture::new(2).await;
    let first_donor = fx.reviewer(1).await;
    let second_donor = fx.reviewer(2).await;
    let target = fx.reviewer(3).await;

    // The target gives `shared` away to the first donor, then takes the
    // second donor's row on the same item. The incoming row sorts first.
    let shared = fx.item(1, 100).await;
    let other = fx.item(2, 100).await;
    let kept = fx.item(3, 100).await;
    let incoming = fx.assignment(&shared, Some(second_donor.id), false).await;
    let outgoing = fx.assignment(&shared, Some(target.id), false).await;
    fx.assignment(&other, Some(first_donor.id), false).await;
    fx.assignment(&kept, Some(target.id), false).await;
    let before = fx.loads().await;

    let config = DistributionConfig {
        primary_batch_size: 1,
        ..Default::default()
    };
    let job = fx
        .service_with(config)
        .start_redistribution(
            fx.round_id,
            vec![first_donor.id, second_donor.id],
            vec![target.id],
        )
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success, "failures: {:?}", job.failures);
    assert_eq!(job.success_count, 2);
    let after = reviewers_of(&fx).await;
    assert_eq!(after[&incoming.id], Some(target.id));
    assert_eq!(after[&outgoing.id], Some(first_donor.id));
    assert_eq!(fx.loads().await, before);
    fx.assert_constraints().await;
}

#[tokio::test]
async fn quorum_two_rebalance_with_small_batches() {
    let fx = Fixture::new(2).await;
    let donors = [fx.reviewer(1).await, fx.reviewer(2).await];
    let targets = [fx.reviewer(3).await, fx.reviewer(4).await];
    for n in 1..=6 {
        let item = fx.item(n, 100).await;
        let first = &donors[(n as usize) % 2];
        let second = &donors[(n as usize + 1) % 2];
        fx.assignment(&item, Some(first.id), false).await;
        fx.assignment(&item, Some(second.id), false).await;
    }
    for n in 7..=8 {
        let item = fx.item(n, 100).await;
        fx.assignment(&item, Some(targets[0].id), false).await;
        fx.assignment(&item, Some(targets[1].id), false).await;
    }
    let total_before: usize = fx.loads().await.values().sum();

    let config = DistributionConfig {
        primary_batch_size: 2,
        ..Default::default()
    };
    let job = fx
        .service_with(config)
        .start_redistribution(
            fx.round_id,
            donors.iter().map(|r| r.id).collect(),
            targets.iter().map(|r| r.id).collect(),
        )
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success, "failures: {:?}", job.failures);
    assert!(job.success_count > 0);
    assert_eq!(fx.loads().await.values().sum::<usize>(), total_before);
    assert!(fx.assignments().await.iter().all(|a| a.reviewer_id.is_some()));
    fx.assert_constraints().await;
}
