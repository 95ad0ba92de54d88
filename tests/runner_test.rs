mod common;

use common::Fixture;
use jury_balance::error::Error;
use jury_balance::model::*;
use jury_balance::store::PrimaryStore;

#[tokio::test]
async fn terminal_job_is_returned_unchanged() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;
    fx.item(1, 100).await;
    let service = fx.service();

    let finished = service
        .start_distribution(fx.round_id, vec![])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    let assignments = fx.assignments().await;

    let again = service.runner().run(finished.id).await.unwrap();
    assert_eq!(again.status, JobStatus::Success);
    assert_eq!(again.updated_at, finished.updated_at);
    assert_eq!(fx.assignments().await, assignments);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let fx = Fixture::new(1).await;
    let err = fx.service().runner().run(JobId::new()).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(_)));
}

#[tokio::test]
async fn running_job_cannot_be_started_twice() {
    let fx = Fixture::new(1).await;
    let job = DistributionJob::new(fx.round_id, JobKind::Distribute { reviewers: vec![] });
    fx.store.create_job(&job).await.unwrap();
    fx.store
        .transition_job(job.id, JobStatus::Pending, JobStatus::Running)
        .await
        .unwrap();

    let err = fx.service().runner().run(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn import_jobs_fail_as_unsupported() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;

    let job = fx
        .service()
        .submit(DistributionJob::new(fx.round_id, JobKind::Import))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.failures["error"].contains("unsupported job"));
    assert_eq!(fx.round().await.status, RoundStatus::Evaluating);
}

#[tokio::test]
async fn round_left_distributing_is_restored_to_evaluating() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;
    fx.item(1, 100).await;
    fx.store
        .set_round_status(fx.round_id, RoundStatus::Distributing)
        .await
        .unwrap();

    let job = fx
        .service()
        .start_distribution(fx.round_id, vec![])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(fx.round().await.status, RoundStatus::Evaluating);
}

#[tokio::test]
async fn previous_round_status_survives_a_run() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;
    fx.item(1, 100).await;
    fx.store
        .set_round_status(fx.round_id, RoundStatus::Paused)
        .await
        .unwrap();

    fx.service()
        .start_distribution(fx.round_id, vec![])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(fx.round().await.status, RoundStatus::Paused);
}

#[tokio::test]
async fn resubmitting_a_job_id_keeps_the_stored_record() {
    let fx = Fixture::new(1).await;
    fx.reviewer(1).await;
    fx.item(1, 100).await;
    let service = fx.service();

    let job = DistributionJob::new(fx.round_id, JobKind::Distribute { reviewers: vec![] });
    let first = service.submit(job.clone()).await.unwrap().wait().await.unwrap();
    assert_eq!(first.status, JobStatus::Success);

    let second = service.submit(job).await.unwrap().wait().await.unwrap();
    assert_eq!(second.status, JobStatus::Success);
    assert_eq!(second.updated_at, first.updated_at);
}

#[tokio::test]
async fn import_jobs_are_rejected_before_the_round_status_changes() {
    let fx = Fixture::new(1).await;
    fx.store
        .set_round_status(fx.round_id, RoundStatus::Distributing)
        .await
        .unwrap();

    let job = fx
        .service()
        .submit(DistributionJob::new(fx.round_id, JobKind::Import))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    // A distribution job would have restored this round to Evaluating.
    assert_eq!(fx.round().await.status, RoundStatus::Distributing);
}
