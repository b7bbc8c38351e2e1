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

//! Processor outcomes: unknown actions, backoff scheduling, exhausted
//! budgets, maintenance and the cancellation race.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mercato::dal::{BatchItem, BatchRequest, DAL};
use mercato::handler::InMemoryLinkStore;
use mercato::transport::{HttpTaskSpec, ResponseEnvelope, Transport, TransportRegistry};
use mercato::{
    ActionCode, ActionRegistry, BatchStatus, CoreConfig, JobStatus, Marketplace,
    ProcessOutcome, Processor, TenantContext, TransportError,
};

use crate::fixtures::{self, MockTransport};

#[tokio::test]
async fn unknown_actions_fail_permanently() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    // a processor deployed with an empty catalog
    let processor = Processor::new(
        dal.clone(),
        Arc::new(ActionRegistry::from_catalog(Vec::new())),
        fixtures::mock_transports(&transport),
        Arc::new(InMemoryLinkStore::new()),
        CoreConfig::default(),
    );

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
    assert_eq!(report.outcome, ProcessOutcome::Failed);
    assert_eq!(transport.call_count(), 0);

    let failed = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("no action registered"));
}

#[tokio::test]
async fn transient_failures_schedule_a_backoff() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    transport.push_error(TransportError::Connection("refused".to_string()));
    // real backoff so the requeued job visibly waits
    let processor = Processor::new(
        dal.clone(),
        Arc::new(ActionRegistry::builtin().clone()),
        fixtures::mock_transports(&transport),
        Arc::new(InMemoryLinkStore::new()),
        CoreConfig::default(),
    );

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::sync_input("p-1", "R-1", 3)),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    match report.outcome {
        ProcessOutcome::Retrying { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert!(delay > Duration::ZERO);
        }
        other => panic!("expected a retry, got {:?}", other),
    }

    let waiting = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(waiting.status, JobStatus::Pending);
    assert!(waiting.retry_at.is_some());
    // backing off, so not claimable yet
    assert!(processor.process_next(&tenant).await.unwrap().is_none());
}

#[tokio::test]
async fn an_exhausted_retry_budget_is_terminal() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    transport.push_error(TransportError::Connection("refused".to_string()));
    let processor = fixtures::processor(dal.clone(), &transport);

    let mut request = fixtures::job_request(Marketplace::Ebay, fixtures::sync_input("p-1", "R-1", 3));
    request.max_retries = 0;
    let job = dal.jobs().create(&tenant, request).await.unwrap().job;

    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Failed);
    let failed = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
}

#[tokio::test]
async fn drain_empties_the_queue() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    for i in 0..3 {
        dal.jobs()
            .create(
                &tenant,
                fixtures::job_request(
                    Marketplace::Ebay,
                    fixtures::sync_input(&format!("p-{}", i), "R-1", 1),
                ),
            )
            .await
            .unwrap();
    }

    let reports = processor.drain(&tenant).await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports
        .iter()
        .all(|r| r.outcome == ProcessOutcome::Completed));
    assert!(processor.process_next(&tenant).await.unwrap().is_none());
}

#[tokio::test]
async fn maintenance_expires_and_recovers_in_one_pass() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = Processor::new(
        dal.clone(),
        Arc::new(ActionRegistry::builtin().clone()),
        fixtures::mock_transports(&transport),
        Arc::new(InMemoryLinkStore::new()),
        CoreConfig {
            stalled_grace: Duration::ZERO,
            ..CoreConfig::default()
        },
    );

    let mut overdue = fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-1"));
    overdue.ttl = Duration::ZERO;
    dal.jobs().create(&tenant, overdue).await.unwrap();

    dal.jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Vinted, fixtures::publish_input("p-2")),
        )
        .await
        .unwrap();
    dal.jobs().claim_next(&tenant).await.unwrap().unwrap();

    let report = processor.run_maintenance(&tenant).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.recovered, 1);
}

#[tokio::test]
async fn maintenance_settles_a_batch_whose_final_recount_was_lost() {
    let database = fixtures::test_database().await;
    let dal = DAL::new(database.clone());
    let tenant = fixtures::tenant("acme");
    let transport = MockTransport::new();
    let processor = fixtures::processor(dal.clone(), &transport);

    let (batch, _) = dal
        .batches()
        .create(
            &tenant,
            BatchRequest {
                batch_key: "restock".to_string(),
                marketplace: Marketplace::Ebay,
                action: ActionCode::Sync,
                priority: 0,
                max_retries: 3,
                ttl: Duration::from_secs(3600),
                items: vec![
                    BatchItem {
                        input: fixtures::sync_input("p-1", "R-1", 4),
                        target_entity_id: None,
                        idempotency_key: None,
                    },
                    BatchItem {
                        input: fixtures::sync_input("p-2", "R-2", 9),
                        target_entity_id: None,
                        idempotency_key: None,
                    },
                ],
            },
        )
        .await
        .unwrap();
    processor.drain(&tenant).await.unwrap();
    let settled = dal.batches().get_by_id(&tenant, batch.id).await.unwrap();
    assert_eq!(settled.status, BatchStatus::Completed);

    // wind the row back, as if the process died before the recount
    fixtures::force_batch_status(&database, batch.id, "running").await;

    let report = processor.run_maintenance(&tenant).await.unwrap();
    assert_eq!(report.batches_settled, 1);
    let healed = dal.batches().get_by_id(&tenant, batch.id).await.unwrap();
    assert_eq!(healed.status, BatchStatus::Completed);
    assert_eq!(healed.completed_count, 2);
    assert_eq!(healed.total_count, 2);
}

/// Cancels its own Job mid-execution, modelling a user cancellation
/// racing the handler.
struct CancellingTransport {
    dal: DAL,
    tenant: TenantContext,
}

#[async_trait]
impl Transport for CancellingTransport {
    async fn execute(
        &self,
        _tenant: &TenantContext,
        _request: &HttpTaskSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let running = self
            .dal
            .jobs()
            .list(
                &self.tenant,
                mercato::dal::JobFilter {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        for job in running {
            self.dal
                .jobs()
                .cancel(&self.tenant, job.id)
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
        }
        Ok(fixtures::ok_envelope())
    }
}

#[tokio::test]
async fn a_result_arriving_after_cancellation_is_discarded() {
    let dal = DAL::new(fixtures::test_database().await);
    let tenant = fixtures::tenant("acme");
    let transport: Arc<dyn Transport> = Arc::new(CancellingTransport {
        dal: dal.clone(),
        tenant: tenant.clone(),
    });
    let processor = Processor::new(
        dal.clone(),
        Arc::new(ActionRegistry::builtin().clone()),
        TransportRegistry::new().with(Marketplace::Ebay, transport),
        Arc::new(InMemoryLinkStore::new()),
        CoreConfig::default(),
    );

    let job = dal
        .jobs()
        .create(
            &tenant,
            fixtures::job_request(Marketplace::Ebay, fixtures::sync_input("p-1", "R-1", 2)),
        )
        .await
        .unwrap()
        .job;
    let report = processor.process_next(&tenant).await.unwrap().unwrap();
    assert_eq!(report.outcome, ProcessOutcome::Discarded);

    // the user's cancellation stands
    let cancelled = dal.jobs().get_by_id(&tenant, job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.result.is_none());
}
