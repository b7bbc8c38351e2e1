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

//! Tenant isolation: no read, claim or mutation crosses a tenant
//! partition.

use std::time::Duration;

use mercato::dal::{BatchItem, BatchRequest, DAL};
use mercato::{ActionCode, Marketplace, StorageError};

use crate::fixtures;

#[tokio::test]
async fn jobs_are_invisible_across_tenants() {
    let dal = DAL::new(fixtures::test_database().await);
    let acme = fixtures::tenant("acme");
    let globex = fixtures::tenant("globex");

    let job = dal
        .jobs()
        .create(
            &acme,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;

    let err = dal.jobs().get_by_id(&globex, job.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    assert!(dal
        .jobs()
        .list(&globex, Default::default())
        .await
        .unwrap()
        .is_empty());

    // and globex cannot mutate acme's work either
    let err = dal.jobs().cancel(&globex, job.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn claiming_honors_the_tenant_partition() {
    let dal = DAL::new(fixtures::test_database().await);
    let acme = fixtures::tenant("acme");
    let globex = fixtures::tenant("globex");

    dal.jobs()
        .create(
            &acme,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap();

    assert!(dal.jobs().claim_next(&globex).await.unwrap().is_none());
    assert!(dal.jobs().claim_next(&acme).await.unwrap().is_some());
}

#[tokio::test]
async fn batches_are_invisible_across_tenants() {
    let dal = DAL::new(fixtures::test_database().await);
    let acme = fixtures::tenant("acme");
    let globex = fixtures::tenant("globex");

    let (batch, _) = dal
        .batches()
        .create(
            &acme,
            BatchRequest {
                batch_key: "acme-batch".to_string(),
                marketplace: Marketplace::Ebay,
                action: ActionCode::Publish,
                priority: 0,
                max_retries: 3,
                ttl: Duration::from_secs(3600),
                items: vec![BatchItem {
                    input: fixtures::publish_input("p-1"),
                    target_entity_id: None,
                    idempotency_key: None,
                }],
            },
        )
        .await
        .unwrap();

    let err = dal.batches().get_by_id(&globex, batch.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    let err = dal.batches().cancel(&globex, batch.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    assert!(dal.batches().list(&globex, 50, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn idempotency_keys_are_scoped_per_tenant() {
    let dal = DAL::new(fixtures::test_database().await);
    let acme = fixtures::tenant("acme");
    let globex = fixtures::tenant("globex");

    let mut request = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1"));
    request.idempotency_key = Some("shared-key".to_string());

    let first = dal.jobs().create(&acme, request.clone()).await.unwrap();
    let second = dal.jobs().create(&globex, request).await.unwrap();
    assert!(!first.cached);
    assert!(!second.cached);
    assert_ne!(first.job.id, second.job.id);
}

#[tokio::test]
async fn task_trails_are_tenant_scoped() {
    let dal = DAL::new(fixtures::test_database().await);
    let acme = fixtures::tenant("acme");
    let globex = fixtures::tenant("globex");

    let job = dal
        .jobs()
        .create(
            &acme,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1")),
        )
        .await
        .unwrap()
        .job;
    assert!(dal
        .tasks()
        .list_for_job(&globex, job.id)
        .await
        .unwrap()
        .is_empty());
}
