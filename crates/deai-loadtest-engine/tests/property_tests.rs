// Property-based tests for the statistics and bookkeeping of a run
//
// Properties tested:
// 1. Percentiles are deterministic and independent of sample order
// 2. Percentiles lie within [min, max] and grow with p
// 3. Every accepted task is counted exactly once, whatever outcomes arrive
// 4. Per-user budgets sum to the total and never exceed ceil(total / users)

use std::time::Duration;

use chrono::Utc;
use deai_loadtest_core::{
    SubmissionResult, TaskId, TaskOutcome, TaskSubmission, TestConfiguration, VirtualUserId,
};
use deai_loadtest_engine::{percentile, LatencySummary, MetricsAggregator};
use proptest::prelude::*;

fn durations(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|ms| Duration::from_millis(*ms)).collect()
}

// ============================================================================
// Property 1: Determinism and order independence
// ============================================================================

proptest! {
    #[test]
    fn prop_summary_is_deterministic(samples in prop::collection::vec(0u64..120_000, 1..500)) {
        let first = LatencySummary::from_samples(&durations(&samples));
        let second = LatencySummary::from_samples(&durations(&samples));
        prop_assert_eq!(first, second);

        let mut reversed = samples.clone();
        reversed.reverse();
        let third = LatencySummary::from_samples(&durations(&reversed));
        prop_assert_eq!(first.map(|s| (s.p95, s.p99, s.max)), third.map(|s| (s.p95, s.p99, s.max)));
    }
}

// ============================================================================
// Property 2: Bounds and monotonicity
// ============================================================================

proptest! {
    #[test]
    fn prop_percentile_bounded_and_monotone(
        mut values in prop::collection::vec(0.0f64..1_000.0, 1..300),
        p in 0.0f64..=100.0,
        q in 0.0f64..=100.0,
    ) {
        values.sort_by(f64::total_cmp);
        let lo = p.min(q);
        let hi = p.max(q);

        let at_lo = percentile(&values, lo).unwrap();
        let at_hi = percentile(&values, hi).unwrap();
        prop_assert!(at_lo <= at_hi);
        prop_assert!(at_lo >= values[0]);
        prop_assert!(at_hi <= values[values.len() - 1]);
        // Nearest rank always returns an observed sample
        prop_assert!(values.contains(&at_hi));
    }
}

// ============================================================================
// Property 3: Exactly-once outcomes
// ============================================================================

proptest! {
    #[test]
    fn prop_outcomes_counted_once(
        accepted in 1usize..60,
        reports in prop::collection::vec((0usize..80, 0u8..3), 0..200),
    ) {
        let aggregator = MetricsAggregator::new().unwrap();
        let recorder = aggregator.recorder();
        let user = VirtualUserId::new(0);

        for i in 0..accepted {
            recorder.record_submission(&TaskSubmission {
                user,
                submitted_at: Utc::now(),
                sent_at: std::time::Instant::now(),
                latency: Duration::from_millis(10),
                result: SubmissionResult::Accepted(TaskId::new(format!("t{i}"))),
            });
        }

        // Arbitrary, possibly duplicated or unknown, outcome reports
        for (task, kind) in reports {
            let id = TaskId::new(format!("t{task}"));
            let outcome = match kind {
                0 => TaskOutcome::completed(id, user, Duration::from_secs(1), None),
                1 => TaskOutcome::failed(id, user, None),
                _ => TaskOutcome::timed_out(id, user),
            };
            recorder.record_outcome(outcome);
        }
        aggregator.force_timeout_pending();

        let stats = aggregator.compute();
        prop_assert_eq!(stats.tasks_submitted, accepted as u64);
        prop_assert_eq!(stats.outcomes_recorded, accepted as u64);
        prop_assert_eq!(aggregator.pending_count(), 0);
    }
}

// ============================================================================
// Property 4: Budget split
// ============================================================================

proptest! {
    #[test]
    fn prop_budgets_cover_total(total in 0u64..10_000, users in 1u32..200) {
        let config = TestConfiguration {
            total_tasks: total,
            concurrent_users: users,
            ..TestConfiguration::default()
        };
        let ceiling = total.div_ceil(u64::from(users));

        let budgets: Vec<u64> = (0..users).map(|i| config.user_budget(i, users)).collect();
        prop_assert_eq!(budgets.iter().sum::<u64>(), total);
        prop_assert!(budgets.iter().all(|b| *b <= ceiling));
    }
}
