//! Dispatcher lifecycle integration tests.
//!
//! These tests run the dispatcher loop against a mock queue:
//! lease -> run pipeline -> delete or release
//! and check the concurrency bound, poison handling and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pixelq_core::{
    stage::Stage,
    testing::{fixtures, MockQueue, MockStageExecutor, MockStorage, QueueEvent, StageFailure},
    Dispatcher, DispatcherConfig, LeasePolicy, PipelineConfig, PipelineController,
};

const POLL: Duration = Duration::from_millis(20);

/// Test helper wiring a dispatcher to mocks.
struct TestHarness {
    queue: Arc<MockQueue>,
    storage: Arc<MockStorage>,
    executor: Arc<MockStageExecutor>,
    work_dir: TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        let storage = Arc::new(MockStorage::new());
        storage.seed_blob("models/m1", b"blend-scene").await;

        Self {
            queue: Arc::new(MockQueue::new()),
            storage,
            executor: Arc::new(MockStageExecutor::new()),
            work_dir: TempDir::new().expect("Failed to create work dir"),
        }
    }

    fn dispatcher(&self, max_concurrent_jobs: usize) -> Dispatcher {
        self.dispatcher_with_policy(max_concurrent_jobs, LeasePolicy::default())
    }

    fn dispatcher_with_policy(&self, max_concurrent_jobs: usize, policy: LeasePolicy) -> Dispatcher {
        let controller = Arc::new(PipelineController::new(
            self.storage.clone(),
            self.executor.clone(),
            PipelineConfig::new(self.work_dir.path()),
        ));
        let config = DispatcherConfig {
            max_concurrent_jobs,
            ..Default::default()
        };

        Dispatcher::new(config, policy, self.queue.clone(), controller).with_poll_interval(POLL)
    }

    /// Wait until `count` messages have been deleted or released.
    async fn wait_for_settlements(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let settled = self
                .queue
                .events()
                .await
                .iter()
                .filter(|e| matches!(e, QueueEvent::Deleted(_) | QueueEvent::Released(_)))
                .count();
            if settled >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} settlements, got {}",
                count,
                settled
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn test_successful_job_is_deleted() {
    let harness = TestHarness::new().await;
    let message_id = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let dispatcher = harness.dispatcher(2);
    dispatcher.start().await;
    harness.wait_for_settlements(1).await;
    dispatcher.stop().await;

    assert_eq!(
        harness.queue.settlement_events().await,
        vec![
            QueueEvent::Leased(message_id.clone()),
            QueueEvent::Deleted(message_id)
        ]
    );
    assert!(harness
        .storage
        .blob("renders/images/m1/abc.png")
        .await
        .is_some());

    let status = dispatcher.status();
    assert!(!status.running);
    assert_eq!(status.leased_total, 1);
    assert_eq!(status.succeeded_total, 1);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn test_single_slot_runs_jobs_one_after_another() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .set_run_duration(Duration::from_millis(80))
        .await;
    let first = harness
        .queue
        .push_request(&fixtures::image_request("job-1", "m1"))
        .await;
    let second = harness
        .queue
        .push_request(&fixtures::image_request("job-2", "m1"))
        .await;

    let dispatcher = harness.dispatcher(1);
    dispatcher.start().await;
    harness.wait_for_settlements(2).await;
    dispatcher.stop().await;

    assert_eq!(
        harness.queue.settlement_events().await,
        vec![
            QueueEvent::Leased(first.clone()),
            QueueEvent::Deleted(first),
            QueueEvent::Leased(second.clone()),
            QueueEvent::Deleted(second),
        ]
    );
    assert_eq!(harness.executor.max_concurrent_runs(), 1);
}

#[tokio::test]
async fn test_in_flight_jobs_never_exceed_limit() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .set_run_duration(Duration::from_millis(60))
        .await;
    for i in 0..5 {
        harness
            .queue
            .push_request(&fixtures::image_request(&format!("job-{}", i), "m1"))
            .await;
    }

    let dispatcher = harness.dispatcher(2);
    dispatcher.start().await;

    let mut observed_max = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while dispatcher.status().succeeded_total < 5 {
        observed_max = observed_max.max(dispatcher.status().in_flight);
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    dispatcher.stop().await;

    assert!(observed_max <= 2);
    assert!(harness.executor.max_concurrent_runs() <= 2);
    assert_eq!(harness.queue.pending_count().await, 0);
}

#[tokio::test]
async fn test_poison_messages_are_deleted() {
    let harness = TestHarness::new().await;
    let garbage = harness.queue.push_body("not json at all").await;
    let mut unsafe_request = fixtures::image_request("abc", "m1");
    unsafe_request.id = "../../etc".to_string();
    let unsafe_id = harness.queue.push_request(&unsafe_request).await;
    let good = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let dispatcher = harness.dispatcher(1);
    dispatcher.start().await;
    harness.wait_for_settlements(3).await;
    dispatcher.stop().await;

    let events = harness.queue.settlement_events().await;
    assert!(events.contains(&QueueEvent::Deleted(garbage)));
    assert!(events.contains(&QueueEvent::Deleted(unsafe_id)));
    assert!(events.contains(&QueueEvent::Deleted(good)));

    let status = dispatcher.status();
    assert_eq!(status.poison_total, 2);
    assert_eq!(status.leased_total, 1);
    assert!(!harness.work_dir.path().join("etc").exists());
}

#[tokio::test]
async fn test_duplicate_job_id_is_not_run_concurrently() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .set_run_duration(Duration::from_millis(100))
        .await;
    let first = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;
    let duplicate = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let dispatcher = harness.dispatcher(2);
    dispatcher.start().await;
    harness.wait_for_settlements(1).await;
    dispatcher.stop().await;

    assert_eq!(
        harness.queue.settlement_events().await,
        vec![
            QueueEvent::Leased(first.clone()),
            QueueEvent::Leased(duplicate),
            QueueEvent::Deleted(first),
        ]
    );
    assert_eq!(harness.executor.max_concurrent_runs(), 1);
    assert!(harness
        .storage
        .blob("renders/images/m1/abc.png")
        .await
        .is_some());

    let status = dispatcher.status();
    assert_eq!(status.leased_total, 1);
    assert_eq!(status.succeeded_total, 1);
    assert_eq!(status.deferred_total, 1);
    assert_eq!(status.failed_total, 0);
}

#[tokio::test]
async fn test_failed_job_is_released_until_attempts_run_out() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .fail_stage(Stage::Render, StageFailure::Exit(2))
        .await;
    let message_id = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let policy = LeasePolicy {
        max_delivery_attempts: 2,
        ..Default::default()
    };
    let dispatcher = harness.dispatcher_with_policy(1, policy);
    dispatcher.start().await;
    harness.wait_for_settlements(2).await;
    dispatcher.stop().await;

    assert_eq!(
        harness.queue.settlement_events().await,
        vec![
            QueueEvent::Leased(message_id.clone()),
            QueueEvent::Released(message_id.clone()),
            QueueEvent::Leased(message_id.clone()),
            QueueEvent::Deleted(message_id),
        ]
    );
    assert_eq!(dispatcher.status().failed_total, 2);
}

#[tokio::test]
async fn test_exhausted_message_is_deleted_immediately() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .fail_stage(Stage::Upscale, StageFailure::NoOutput)
        .await;
    let body = fixtures::request_json(&fixtures::image_request("abc", "m1"));
    let message_id = harness.queue.push_with_count(body, 2).await;

    let dispatcher = harness.dispatcher(1);
    dispatcher.start().await;
    harness.wait_for_settlements(1).await;
    dispatcher.stop().await;

    assert_eq!(
        harness.queue.settlement_events().await,
        vec![
            QueueEvent::Leased(message_id.clone()),
            QueueEvent::Deleted(message_id)
        ]
    );
}

#[tokio::test]
async fn test_loop_survives_lease_errors_and_failures() {
    let harness = TestHarness::new().await;
    harness.queue.fail_next_leases(3).await;
    harness
        .queue
        .push_request(&fixtures::image_request("missing", "no-such-model"))
        .await;
    harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let policy = LeasePolicy {
        max_delivery_attempts: 1,
        ..Default::default()
    };
    let dispatcher = harness.dispatcher_with_policy(1, policy);
    dispatcher.start().await;
    harness.wait_for_settlements(2).await;
    dispatcher.stop().await;

    let status = dispatcher.status();
    assert_eq!(status.failed_total, 1);
    assert_eq!(status.succeeded_total, 1);
}

#[tokio::test]
async fn test_lease_is_renewed_during_long_job() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .set_run_duration(Duration::from_millis(150))
        .await;
    let message_id = harness
        .queue
        .push_request(&fixtures::image_request("abc", "m1"))
        .await;

    let policy = LeasePolicy {
        renew_interval: Duration::from_millis(30),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher_with_policy(1, policy);
    dispatcher.start().await;
    harness.wait_for_settlements(1).await;
    dispatcher.stop().await;

    assert!(harness.queue.renewal_count().await >= 2);
    let events = harness.queue.events().await;
    assert!(events.contains(&QueueEvent::Renewed(message_id.clone())));
    assert_eq!(events.last(), Some(&QueueEvent::Deleted(message_id)));
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_and_stops_leasing() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .set_run_duration(Duration::from_millis(100))
        .await;
    let first = harness
        .queue
        .push_request(&fixtures::image_request("job-1", "m1"))
        .await;

    let dispatcher = harness.dispatcher(1);
    dispatcher.start().await;

    // wait for the first job to be picked up
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dispatcher.status().leased_total == 0 {
        assert!(tokio::time::Instant::now() < deadline, "job was never leased");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    harness
        .queue
        .push_request(&fixtures::image_request("job-2", "m1"))
        .await;

    dispatcher.stop().await;

    assert_eq!(dispatcher.status().in_flight, 0);
    assert!(harness
        .queue
        .events()
        .await
        .contains(&QueueEvent::Deleted(first)));
    assert_eq!(harness.queue.pending_count().await, 1);

    let calls = harness.queue.lease_calls().await;
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(harness.queue.lease_calls().await, calls);
}
