/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Job lifecycle: creation, idempotent resubmission, the state machine,
//! retry bookkeeping, expiry and manual retry.

use std::time::Duration;

use mercato::dal::{JobFilter, NewTaskSpec, DAL};
use mercato::models::{JobResult, TaskKind, TaskStatus};
use mercato::{JobStatus, StorageError};

use crate::fixtures;
use mercato::Marketplace;

#[tokio::test]
async fn created_job_is_pending_with_catalog_defaults() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let creation = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap();
    assert!(!creation.cached);
    let job = creation.job;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.priority, 0);
    assert!(job.expires_at > job.created_at);

    let fetched = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(fetched.id, job.id);
    assert_eq!(fetched.input, job.input);
}

#[tokio::test]
async fn idempotent_resubmission_returns_the_original_job() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut request = fixtures::job_request(Marketplace::Ebay, fixtures::publish_input("p-1"));
    request.idempotency_key = Some("submit-1".to_string());
    let first = dal.jobs().create(&tenant, request.clone()).await.unwrap();
    assert!(!first.cached);

    // Same key, even with a different payload: the original wins.
    request.input = fixtures::publish_input("p-2");
    let second = dal.jobs().create(&tenant, request).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.job.id, first.job.id);

    let all = dal
        .jobs()
        .list(&tenant, JobFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn invalid_payload_is_rejected_before_any_write() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut input = fixtures::publish_input("p-1");
    if let mercato::models::JobInput::Publish { ref mut product } = input {
        product.title.clear();
    }
    let err = dal
        .jobs()
        .create(&tenant, fixtures::job_request(Marketplace::Vinted, input))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
    assert!(dal
        .jobs()
        .list(&tenant, JobFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn terminal_jobs_are_frozen() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    let claimed = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    dal.jobs()
        .complete(
            &tenant,
            job.id,
            &JobResult::Publish {
                remote_listing_id: "R-1".to_string(),
                listing_url: None,
            },
        )
        .await
        .unwrap();

    let err = dal.jobs().cancel(&tenant, job.id).await.unwrap_err();
    assert!(matches!(err, StorageError::TerminalState(_)));
    let err = dal
        .jobs()
        .fail(&tenant, job.id, "late failure", true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TerminalState(_)));

    let frozen = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(frozen.status, JobStatus::Completed);
}

#[tokio::test]
async fn retryable_failures_requeue_until_the_budget_is_spent() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut request = fixtures::job_request(Marketplace::Etsy, fixtures::publish_input("p-1"));
    request.max_retries = 1;
    let job = dal.jobs().create(&tenant, request).await.unwrap().job;

    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    let after_first = dal
        .jobs()
        .fail(&tenant, job.id, "503 from remote", true, None)
        .await
        .unwrap();
    assert_eq!(after_first.status, JobStatus::Pending);
    assert_eq!(after_first.retry_count, 1);
    assert!(after_first.started_at.is_none());
    assert_eq!(after_first.error_message.as_deref(), Some("503 from remote"));

    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    let after_second = dal
        .jobs()
        .fail(&tenant, job.id, "503 again", true, None)
        .await
        .unwrap();
    assert_eq!(after_second.status, JobStatus::Failed);
    assert_eq!(after_second.retry_count, 1);
    assert!(after_second.completed_at.is_some());
}

#[tokio::test]
async fn non_retryable_failures_skip_the_retry_budget() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    let failed = dal
        .jobs()
        .fail(&tenant, job.id, "422 unprocessable", false, None)
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn paused_jobs_are_invisible_to_claiming_until_resumed() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs().pause(&tenant, job.id).await.unwrap();
    assert!(dal.jobs().claim_next(&tenant).await.unwrap().is_none());

    dal.jobs().resume(&tenant, job.id).await.unwrap();
    let claimed = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Running);
}

#[tokio::test]
async fn completing_a_paused_job_is_an_illegal_transition() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs().pause(&tenant, job.id).await.unwrap();
    let err = dal
        .jobs()
        .complete(
            &tenant,
            job.id,
            &JobResult::Publish {
                remote_listing_id: "R-1".to_string(),
                listing_url: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IllegalTransition { .. }));
}

#[tokio::test]
async fn cancelling_a_job_cascades_to_its_unfinished_tasks() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();

    let (done, _) = dal
        .tasks()
        .get_or_create(
            &tenant,
            job.id,
            NewTaskSpec {
                kind: TaskKind::StorageOp,
                description: "validate product payload".to_string(),
                position: 0,
                payload: serde_json::json!({}),
                method: None,
                path: None,
                carrier: None,
            },
        )
        .await
        .unwrap();
    dal.tasks().mark_running(&tenant, done.id).await.unwrap();
    dal.tasks()
        .mark_completed(&tenant, done.id, &serde_json::json!({"ok": true}))
        .await
        .unwrap();
    dal.tasks()
        .get_or_create(
            &tenant,
            job.id,
            NewTaskSpec {
                kind: TaskKind::RelayHttp,
                description: "create remote listing".to_string(),
                position: 1,
                payload: serde_json::json!({}),
                method: Some("POST".to_string()),
                path: Some("/api/v2/items".to_string()),
                carrier: Some("vinted-web".to_string()),
            },
        )
        .await
        .unwrap();

    dal.jobs().cancel(&tenant, job.id).await.unwrap();

    let tasks = dal.tasks().list_for_job(&tenant, job.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    // completed outcomes stay, unfinished steps are cancelled
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert_eq!(tasks[1].status, TaskStatus::Cancelled);
    assert!(tasks[1].completed_at.is_some());
}

#[tokio::test]
async fn expiry_sweep_terminates_overdue_pending_jobs() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut overdue = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1"));
    overdue.ttl = Duration::ZERO;
    let doomed = dal.jobs().create(&tenant, overdue).await.unwrap().job;
    let fresh = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-2")),
        )
        .await
        .unwrap()
        .job;

    let expired = dal.jobs().sweep_expired(&tenant).await.unwrap();
    assert_eq!(expired, 1);

    let doomed = dal.jobs().get_by_id(&tenant, doomed.id).await.unwrap();
    assert_eq!(doomed.status, JobStatus::Expired);
    assert_eq!(
        doomed.error_message.as_deref(),
        Some("job expired before execution")
    );
    let fresh = dal.jobs().get_by_id(&tenant, fresh.id).await.unwrap();
    assert_eq!(fresh.status, JobStatus::Pending);
}

#[tokio::test]
async fn paused_jobs_outlive_their_ttl() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut request = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1"));
    request.ttl = Duration::ZERO;
    let job = dal.jobs().create(&tenant, request).await.unwrap().job;
    dal.jobs().pause(&tenant, job.id).await.unwrap();

    assert_eq!(dal.jobs().sweep_expired(&tenant).await.unwrap(), 0);
    let held = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(held.status, JobStatus::Paused);
}

#[tokio::test]
async fn stalled_running_jobs_are_requeued_after_the_grace_period() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();

    // zero grace: anything running counts as stalled
    let recovered = dal
        .jobs()
        .recover_stalled(&tenant, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, job.id);
    assert_eq!(recovered[0].status, JobStatus::Pending);
    assert!(recovered[0].started_at.is_none());

    // generous grace: a just-claimed job is left alone
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    let recovered = dal
        .jobs()
        .recover_stalled(&tenant, Duration::from_secs(600))
        .await
        .unwrap();
    assert!(recovered.is_empty());
}

#[tokio::test]
async fn retry_clone_starts_fresh_and_leaves_the_source_frozen() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut request = fixtures::job_request(Marketplace::Ebay, fixtures::publish_input("p-1"));
    request.idempotency_key = Some("submit-1".to_string());
    let job = dal.jobs().create(&tenant, request).await.unwrap().job;
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    dal.jobs()
        .fail(&tenant, job.id, "422 unprocessable", false, None)
        .await
        .unwrap();

    let clone = dal
        .jobs()
        .retry_clone(&tenant, job.id, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_ne!(clone.id, job.id);
    assert_eq!(clone.status, JobStatus::Pending);
    assert_eq!(clone.retry_count, 0);
    assert!(clone.idempotency_key.is_none());
    assert!(clone.batch_id.is_none());
    assert_eq!(clone.input, job.input);

    let source = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(source.status, JobStatus::Failed);
}

#[tokio::test]
async fn retry_clone_rejects_jobs_still_in_flight() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    let err = dal
        .jobs()
        .retry_clone(&tenant, job.id, Duration::from_secs(3600))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IllegalTransition { .. }));
}

#[tokio::test]
async fn listing_filters_by_status_and_marketplace() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let vinted = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    dal.jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::publish_input("p-2")),
        )
        .await
        .unwrap();
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();

    let running = dal
        .jobs()
        .list(
            &tenant,
            JobFilter {
                status: Some(JobStatus::Running),
                ..JobFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(running.len(), 1);

    let on_vinted = dal
        .jobs()
        .list(
            &tenant,
            JobFilter {
                marketplace: Some(Marketplace::Vinted),
                ..JobFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(on_vinted.len(), 1);
    assert_eq!(on_vinted[0].id, vinted.id);
}
