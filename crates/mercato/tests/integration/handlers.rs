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

//! Handlers through the processor: step trails, idempotent re-entry and
//! marketplace wire shapes.

use std::sync::Arc;

use mercato::dal::DAL;
use mercato::handler::{InMemoryLinkStore, ListingLink, ListingLinkStore};
use mercato::models::{JobResult, TaskKind, TaskStatus};
use mercato::{JobStatus, Marketplace, ProcessOutcome};

use crate::fixtures::{self, FlakyLinkStore, MockTransport};

#[tokio::test]
async fn publish_runs_the_full_step_sequence() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;

    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);

    let tasks = dal.tasks().list_for_job(&tenant, job.id).await.unwrap();
    let kinds: Vec<TaskKind> = tasks.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TaskKind::StorageOp,
            TaskKind::FileOp,
            TaskKind::RelayHttp,
            TaskKind::RelayHttp,
            TaskKind::StorageOp,
        ]
    );
    for (position, task) in tasks.iter().enumerate() {
        assert_eq!(task.position, position as i32);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].path, "/api/v2/photos");
    assert_eq!(calls[0].carrier.as_deref(), Some("vinted-web"));
    assert_eq!(calls[1].path, "/api/v2/items");

    let done = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    match done.parsed_result().unwrap().unwrap() {
        JobResult::Publish {
            remote_listing_id,
            listing_url,
        } => {
            assert_eq!(remote_listing_id, "R-1");
            assert_eq!(listing_url.as_deref(), Some("https://market.example/l/R-1"));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn publish_without_media_skips_the_media_steps() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::publish_input_no_media("p-1")),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);

    let tasks = dal.tasks().list_for_job(&tenant, job.id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[1].kind, TaskKind::DirectHttp);
    assert_eq!(tasks[1].path.as_deref(), Some("/sell/listing/v1/listings"));
    assert!(tasks[1].carrier.is_none());
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn republishing_a_live_product_touches_nothing_remote() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let links = Arc::new(InMemoryLinkStore::new());
    links
        .put(
            &tenant,
            Marketplace::Vinted,
            "p-1",
            ListingLink {
                remote_listing_id: "R-77".to_string(),
                listing_url: None,
            },
        )
        .await
        .unwrap();
    let processor = fixtures::processor_with_links(dal.clone(), &transport, links);

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);
    assert_eq!(transport.call_count(), 0);
    assert!(dal
        .tasks()
        .list_for_job(&tenant, job.id)
        .await
        .unwrap()
        .is_empty());

    let done = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    match done.parsed_result().unwrap().unwrap() {
        JobResult::Publish {
            remote_listing_id, ..
        } => assert_eq!(remote_listing_id, "R-77"),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn a_retried_job_resumes_at_the_failed_step() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    // media upload succeeds, listing creation hits a 503
    transport.push_response(fixtures::ok_envelope());
    transport.push_response(fixtures::status_envelope(503));

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(
        report.outcome,
        ProcessOutcome::Retrying {
            attempt: 1,
            delay: std::time::Duration::ZERO
        }
    );
    assert_eq!(transport.call_count(), 2);

    // second attempt: only the create step goes back to the wire
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(transport.calls()[2].path, "/api/v2/items");

    let tasks = dal.tasks().list_for_job(&tenant, job.id).await.unwrap();
    let create_step = tasks
        .iter()
        .find(|t| t.description == "create remote listing")
        .unwrap();
    assert_eq!(create_step.retry_count, 1);
    assert_eq!(create_step.status, TaskStatus::Completed);
    let upload_step = tasks
        .iter()
        .find(|t| t.description == "upload media")
        .unwrap();
    assert_eq!(upload_step.retry_count, 0);
}

#[tokio::test]
async fn a_success_response_missing_the_listing_id_is_permanent() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    transport.push_response(fixtures::status_envelope(200)); // empty body

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Etsy, fixtures::publish_input_no_media("p-1")),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Failed);
    let failed = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn a_failed_link_write_retries_without_duplicating_the_listing() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let links = Arc::new(FlakyLinkStore::new());
    let processor = fixtures::processor_with_links(dal.clone(), &transport, links.clone());

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::publish_input_no_media("p-1")),
        )
        .await
        .unwrap()
        .job;

    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert!(matches!(report.outcome, ProcessOutcome::Retrying { .. }));
    let calls_after_first = transport.call_count();
    assert_eq!(calls_after_first, 1);

    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);
    // the create-listing response was replayed, not re-sent
    assert_eq!(transport.call_count(), calls_after_first);
    assert!(links
        .get(&tenant, Marketplace::Ebay, "p-1")
        .await
        .unwrap()
        .is_some());

    let done = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
async fn delete_treats_an_already_gone_listing_as_success() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let links = Arc::new(InMemoryLinkStore::new());
    links
        .put(
            &tenant,
            Marketplace::Vinted,
            "p-1",
            ListingLink {
                remote_listing_id: "R-9".to_string(),
                listing_url: None,
            },
        )
        .await
        .unwrap();
    let processor = fixtures::processor_with_links(dal.clone(), &transport, links.clone());

    transport.push_response(fixtures::status_envelope(404));

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::delete_input("p-1", "R-9")),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "DELETE");
    assert_eq!(calls[0].path, "/api/v2/items/R-9");
    assert!(links
        .get(&tenant, Marketplace::Vinted, "p-1")
        .await
        .unwrap()
        .is_none());

    let tasks = dal.tasks().list_for_job(&tenant, job.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].description, "remove listing link");
}

#[tokio::test]
async fn update_patches_only_the_changed_fields() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    dal.jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Etsy, fixtures::update_input("p-1", "R-5")),
        )
        .await
        .unwrap();
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "PATCH");
    assert_eq!(calls[0].path, "/v3/application/listings/R-5");
    assert_eq!(calls[0].body["title"], "Wool coat, reduced");
    assert_eq!(calls[0].body["price_cents"], 3900);
    assert!(calls[0].body.get("description").is_none());
    assert!(calls[0].body.get("quantity").is_none());
}

#[tokio::test]
async fn sync_puts_the_quantity_to_the_quantity_endpoint() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::sync_input("p-1", "R-5", 7)),
        )
        .await
        .unwrap()
        .job;
    // catalog gives sync jobs elevated priority
    assert_eq!(job.priority, 10);

    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Completed);

    let calls = transport.calls();
    assert_eq!(calls[0].method, "PUT");
    assert_eq!(calls[0].path, "/sell/listing/v1/listings/R-5/quantity");
    assert_eq!(calls[0].body, serde_json::json!({"quantity": 7}));

    let done = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    match done.parsed_result().unwrap().unwrap() {
        JobResult::Sync {
            remote_listing_id,
            quantity,
        } => {
            assert_eq!(remote_listing_id, "R-5");
            assert_eq!(quantity, 7);
        }
        other => panic!("unexpected result {:?}", other),
    }
}
