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

//! Claiming: eligibility, ordering and exclusivity under concurrency.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use mercato::dal::DAL;
use mercato::{Database, JobStatus, Marketplace};

use crate::fixtures;

#[tokio::test]
async fn claiming_an_empty_queue_yields_nothing() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    assert!(dal.jobs().claim_next(&tenant).await.unwrap().is_none());
}

#[tokio::test]
async fn higher_priority_wins_then_fifo() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    let mut low_first = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1"));
    low_first.priority = 0;
    let low_first = dal.jobs().create(&tenant, low_first).await.unwrap().job;

    let mut high = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-2"));
    high.priority = 10;
    let high = dal.jobs().create(&tenant, high).await.unwrap().job;

    let mut low_second = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-3"));
    low_second.priority = 0;
    let low_second = dal.jobs().create(&tenant, low_second).await.unwrap().job;

    let first = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(first.id, high.id);
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.started_at.is_some());

    let second = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(second.id, low_first.id);
    let third = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(third.id, low_second.id);
}

#[tokio::test]
async fn jobs_backing_off_are_not_claimable_until_retry_at_passes() {
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
    dal.jobs()
        .fail(
            &tenant,
            job.id,
            "503",
            true,
            Some(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    // pending again, but backing off for an hour
    let requeued = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert!(requeued.retry_at.is_some());
    assert!(dal.jobs().claim_next(&tenant).await.unwrap().is_none());
}

#[tokio::test]
async fn zero_backoff_makes_a_requeued_job_immediately_claimable() {
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
    dal.jobs()
        .fail(&tenant, job.id, "503", true, Some(Duration::ZERO))
        .await
        .unwrap();

    let reclaimed = dal.jobs().claim_next(&tenant).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.retry_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_never_share_a_job() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");

    for i in 0..4 {
        dal.jobs()
            .create(
                &tenant,
                fixtures::job_request(
                    Marketplace::Vinted,
                    fixtures::publish_input(&format!("p-{}", i)),
                ),
            )
            .await
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let dal = dal.clone();
        let tenant = tenant.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            dal.jobs().claim_next(&tenant).await.unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    for handle in handles {
        let job = handle.await.unwrap().expect("a job for every claimer");
        assert!(claimed.insert(job.id), "job claimed twice");
    }
    assert_eq!(claimed.len(), 4);
    assert!(dal.jobs().claim_next(&tenant).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_backed_database_supports_concurrent_claimers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("claiming.db");
    let database = Database::new(path.to_str().unwrap(), "", 1);
    database.run_migrations().await.unwrap();
    let dal = DAL::new(database);
    let tenant = fixtures::tenant("acme");

    dal.jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let dal = dal.clone();
        let tenant = tenant.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            dal.jobs().claim_next(&tenant).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
