//! End-to-end runs of the controller against the in-memory service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{quick_settings, MockTaskService, StaticProbe};
use deai_loadtest_core::{
    ErrorKind, LoadTestError, LoadTestSettings, PerformanceTargets, TransportErrorKind,
};
use deai_loadtest_engine::{LoadController, StopReason, TargetStatus};

fn controller(service: Arc<MockTaskService>, settings: LoadTestSettings) -> LoadController {
    LoadController::new(service, settings)
        .unwrap()
        .with_probe(StaticProbe)
        .with_seed(7)
}

#[tokio::test(start_paused = true)]
async fn test_every_accepted_task_gets_one_outcome() {
    let service = Arc::new(MockTaskService::new().fail_every(5));
    let report = controller(Arc::clone(&service), quick_settings(4, 20))
        .run()
        .await
        .unwrap();

    let stats = &report.stats;
    assert_eq!(stats.tasks_submitted, 20);
    assert_eq!(stats.outcomes_recorded, stats.tasks_submitted);
    assert_eq!(stats.tasks_completed, 16);
    assert_eq!(stats.tasks_failed, 4);
    assert_eq!(stats.tasks_timed_out, 0);
    assert_eq!(stats.forced_timeouts, 0);
    assert_eq!(service.accepted_tasks(), 20);
    assert_eq!(stats.node_distribution.values().sum::<u64>(), 16);
    assert_eq!(stats.error_counts.get(&ErrorKind::TaskFailed), Some(&4));
    assert_eq!(stats.success_rate_pct, Some(80.0));
    assert!(report
        .users
        .iter()
        .all(|u| u.stop_reason == StopReason::BudgetExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_per_user_budget_never_exceeds_ceiling() {
    let service = Arc::new(MockTaskService::new());
    let report = controller(service, quick_settings(3, 10))
        .run()
        .await
        .unwrap();

    let per_user: Vec<u64> = report.stats.per_user_submitted.values().copied().collect();
    assert_eq!(per_user, vec![4, 3, 3]);
    assert_eq!(report.stats.tasks_submitted, 10);
    for user in &report.users {
        assert!(user.attempted <= 4);
        assert_eq!(user.accepted, user.budget);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_attempts_use_up_the_budget() {
    let service = Arc::new(MockTaskService::new().reject_every(2));
    let report = controller(Arc::clone(&service), quick_settings(1, 4))
        .run()
        .await
        .unwrap();

    let user = &report.users[0];
    assert_eq!(user.budget, 4);
    assert_eq!(user.attempted, 4);
    assert_eq!(user.accepted, 2);
    assert_eq!(user.rejected, 2);
    assert_eq!(user.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(service.submit_calls(), 4);
    assert_eq!(report.stats.tasks_attempted, 4);
    assert_eq!(report.stats.outcomes_recorded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_stay_under_ceiling_with_rejections() {
    let service = Arc::new(MockTaskService::new().reject_every(3));
    let report = controller(Arc::clone(&service), quick_settings(3, 10))
        .run()
        .await
        .unwrap();

    // ceil(10 / 3)
    assert!(report.users.iter().all(|u| u.attempted <= 4));
    assert_eq!(report.users.iter().map(|u| u.attempted).sum::<u64>(), 10);
    assert_eq!(service.submit_calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_processing_latency_spans_submission() {
    let service = Arc::new(
        MockTaskService::new()
            .submit_latency(Duration::from_secs(3))
            .processing_time(Duration::from_secs(1)),
    );
    let mut settings = quick_settings(1, 2);
    settings.load.poll_interval_secs = 0.1;
    let report = controller(service, settings).run().await.unwrap();

    let stats = &report.stats;
    assert_eq!(stats.tasks_completed, 2);
    let submission = stats.submission_latency.unwrap();
    let processing = stats.processing_latency.unwrap();
    assert!(submission.max >= 3.0 && submission.max < 3.1, "{}", submission.max);
    // Three seconds in flight to the gateway plus one second of work
    assert!(processing.min >= 4.0, "{}", processing.min);
    assert!(processing.max < 4.2, "{}", processing.max);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_tasks_time_out() {
    let service = Arc::new(MockTaskService::new().never_complete());
    let mut settings = quick_settings(2, 6);
    settings.load.task_timeout_secs = 5.0;
    let report = controller(service, settings).run().await.unwrap();

    let stats = &report.stats;
    assert_eq!(stats.tasks_submitted, 6);
    assert_eq!(stats.tasks_timed_out, 6);
    assert_eq!(stats.outcomes_recorded, 6);
    assert_eq!(stats.forced_timeouts, 0);
    assert_eq!(stats.error_counts.get(&ErrorKind::TimedOut), Some(&6));
    assert!(stats.processing_latency.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hard_deadline_finalises_trackers() {
    let service = Arc::new(MockTaskService::new().never_complete());
    let mut settings = quick_settings(2, 4);
    settings.load.task_timeout_secs = 600.0;
    settings.load.ramp_down_secs = 3.0;
    let report = controller(service, settings).run().await.unwrap();

    let stats = &report.stats;
    assert_eq!(stats.tasks_timed_out, 4);
    assert_eq!(stats.outcomes_recorded, stats.tasks_submitted);
    // Well before the task timeout: the ramp-down grace cut it short
    assert!(stats.wall_clock_secs < 30.0, "{}", stats.wall_clock_secs);
}

#[tokio::test(start_paused = true)]
async fn test_gate_caps_concurrent_submissions() {
    let service = Arc::new(
        MockTaskService::new().submit_latency(Duration::from_millis(300)),
    );
    let mut settings = quick_settings(10, 50);
    settings.load.ramp_up_secs = 0.0;
    settings.load.think_time_secs = 0.0;
    settings.load.submission_concurrency = 2;
    let report = controller(Arc::clone(&service), settings)
        .run()
        .await
        .unwrap();

    assert!(service.peak_submissions() <= 2, "{}", service.peak_submissions());
    assert_eq!(service.peak_submissions(), 2);
    assert_eq!(report.stats.tasks_submitted, 50);
}

#[tokio::test(start_paused = true)]
async fn test_failed_setup_degrades_concurrency() {
    let service = Arc::new(MockTaskService::new().failed_registrations(2));
    let report = controller(service, quick_settings(5, 9))
        .run()
        .await
        .unwrap();

    let stats = &report.stats;
    assert_eq!(stats.users_requested, 5);
    assert_eq!(stats.users_started, 3);
    assert_eq!(stats.error_counts.get(&ErrorKind::Setup), Some(&2));
    assert_eq!(report.users.len(), 3);
    // Budgets are spread over the users that actually started
    assert_eq!(stats.tasks_submitted, 9);
}

#[tokio::test(start_paused = true)]
async fn test_no_users_is_fatal() {
    let service = Arc::new(MockTaskService::new().failed_registrations(3));
    let result = controller(service, quick_settings(3, 9)).run().await;

    assert!(matches!(
        result,
        Err(LoadTestError::NoVirtualUsers { requested: 3 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rejections_do_not_stop_users() {
    let service = Arc::new(MockTaskService::new().reject_every(3).drop_every(7));
    let report = controller(Arc::clone(&service), quick_settings(2, 10))
        .run()
        .await
        .unwrap();

    // Calls 3, 6 and 9 are refused, call 7 never connects
    let stats = &report.stats;
    assert_eq!(stats.tasks_attempted, 10);
    assert_eq!(stats.tasks_submitted, 6);
    assert_eq!(stats.tasks_rejected, 4);
    assert_eq!(stats.tasks_attempted, service.submit_calls());
    assert_eq!(stats.error_counts.get(&ErrorKind::Http(503)), Some(&3));
    assert_eq!(
        stats
            .error_counts
            .get(&ErrorKind::Transport(TransportErrorKind::Connect)),
        Some(&1)
    );
    assert_eq!(stats.outcomes_recorded, 6);
    assert!(report
        .users
        .iter()
        .all(|u| u.stop_reason == StopReason::BudgetExhausted));
}

#[tokio::test(start_paused = true)]
async fn test_duration_bounds_the_run() {
    let service = Arc::new(MockTaskService::new());
    let mut settings = quick_settings(2, 10_000);
    settings.load.ramp_up_secs = 1.0;
    settings.load.sustained_secs = 9.0;
    settings.load.think_time_secs = 1.0;
    let report = controller(service, settings).run().await.unwrap();

    assert!(report.stats.tasks_submitted < 10_000);
    assert!(report
        .users
        .iter()
        .all(|u| u.stop_reason != StopReason::BudgetExhausted));
    assert_eq!(report.stats.outcomes_recorded, report.stats.tasks_submitted);
    // Load phase plus the one-second tail of in-flight trackers
    assert!(report.stats.wall_clock_secs >= 10.0);
    assert!(report.stats.wall_clock_secs < 15.0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_run_early() {
    let service = Arc::new(MockTaskService::new());
    let mut settings = quick_settings(3, 10_000);
    settings.load.sustained_secs = 600.0;
    let controller = controller(service, settings);
    let cancel = controller.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });

    let report = controller.run().await.unwrap();
    assert!(report.stats.wall_clock_secs < 60.0);
    assert!(report
        .users
        .iter()
        .all(|u| u.stop_reason == StopReason::Cancelled));
    assert_eq!(report.stats.outcomes_recorded, report.stats.tasks_submitted);
}

#[tokio::test(start_paused = true)]
async fn test_probes_feed_resources_and_uptime() {
    let service = Arc::new(MockTaskService::new().nodes(2));
    let mut settings = quick_settings(2, 10);
    settings.targets = PerformanceTargets {
        max_cpu_usage_pct: Some(75.0),
        min_uptime_pct: Some(99.0),
        min_success_rate_pct: Some(95.0),
        ..PerformanceTargets::none()
    };
    let report = controller(service, settings).run().await.unwrap();

    let stats = &report.stats;
    assert!(stats.resource_samples > 0);
    assert_eq!(stats.cpu.unwrap().max, 40.0);
    assert!(stats.health_checks_total > 0);
    assert_eq!(stats.uptime_pct, Some(100.0));
    assert_eq!(stats.active_nodes, Some(2));
    assert!(report.verdict.passed);
    assert!(report
        .verdict
        .results
        .iter()
        .all(|r| r.status == TargetStatus::Pass));

    let exposition = report.live.render().unwrap();
    assert!(exposition.contains("deai_loadtest_submissions_total"));
    let json = report.to_json().unwrap();
    assert!(json.contains("\"verdict\""));
}
