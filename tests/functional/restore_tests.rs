//! QdrantRestore reconciler tests.
//!
//! The restore pass polls its Job every few seconds, so these tests run on
//! a paused clock and let tokio auto-advance through the poll interval.

use std::time::Duration;

use qdrant_operator::controller::common::ResourceKind;
use qdrant_operator::controller::reconciler::{ReconcileOutcome, Reconciler};
use qdrant_operator::controller::restore_reconciler::{
    RESTORE_POLL_ATTEMPTS, RESTORE_POLL_DEADLINE, RestoreReconciler,
};
use qdrant_operator::crd::{QdrantRestoreStatus, RestorePhase};
use qdrant_operator::platform::JobState;

use crate::mock_platform::{Harness, restore_key, test_restore};

fn harness_with_restore(name: &str) -> (Harness, RestoreReconciler) {
    let h = Harness::new();
    h.platform
        .insert_restore(test_restore(name, "vectors", "docs"));
    let reconciler = RestoreReconciler::new(h.ctx.clone());
    (h, reconciler)
}

#[tokio::test(start_paused = true)]
async fn test_restore_completes() {
    let (h, reconciler) = harness_with_restore("nightly");
    h.platform.script_jobs([
        None,
        Some(JobState::Running),
        Some(JobState::Succeeded),
    ]);

    let outcome = reconciler.reconcile(&restore_key("nightly")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    let status = h.platform.restore_status("nightly");
    assert_eq!(status.phase, RestorePhase::Completed);
    assert_eq!(status.job_name.as_deref(), Some("nightly-restore"));
    assert!(status.started_at.is_some());
    assert!(status.completed_at.is_some());
    assert_eq!(status.error_detail, None);
    assert_eq!(h.platform.calls("launch_restore_job"), 1);
    assert_eq!(h.platform.calls("read_job_status"), 3);
    assert_eq!(h.platform.events_with_reason("Completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_fails_restore() {
    let (h, reconciler) = harness_with_restore("nightly");
    h.platform.script_jobs([Some(JobState::Failed)]);

    reconciler.reconcile(&restore_key("nightly")).await.unwrap();

    let status = h.platform.restore_status("nightly");
    assert_eq!(status.phase, RestorePhase::Failed);
    assert_eq!(status.message.as_deref(), Some("Restore job failed"));
    assert_eq!(h.platform.events_with_reason("Failed"), 1);
    assert!(h.platform.state().events.iter().all(|e| e.object == "nightly"));
}

#[tokio::test(start_paused = true)]
async fn test_restore_times_out_after_poll_budget() {
    let (h, reconciler) = harness_with_restore("slow");
    h.platform.state().job_default = Some(JobState::Running);

    let outcome = reconciler.reconcile(&restore_key("slow")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    let status = h.platform.restore_status("slow");
    assert_eq!(status.phase, RestorePhase::Failed);
    assert!(
        status
            .message
            .unwrap()
            .contains(&format!("timed out after {RESTORE_POLL_ATTEMPTS} polls"))
    );
    assert_eq!(
        h.platform.calls("read_job_status"),
        RESTORE_POLL_ATTEMPTS as usize
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_job_reads_hit_the_deadline() {
    let (h, reconciler) = harness_with_restore("slow");
    {
        let mut state = h.platform.state();
        state.job_default = Some(JobState::Running);
        state.job_read_delay = Duration::from_secs(10);
    }
    let started = tokio::time::Instant::now();

    let outcome = reconciler.reconcile(&restore_key("slow")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    let status = h.platform.restore_status("slow");
    assert_eq!(status.phase, RestorePhase::Failed);
    assert!(status.message.unwrap().contains("timed out after"));
    // Each attempt took three intervals, so the clock ran out first
    assert!(h.platform.calls("read_job_status") < RESTORE_POLL_ATTEMPTS as usize);
    assert!(started.elapsed() <= RESTORE_POLL_DEADLINE + Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_error_fails_restore() {
    let (h, reconciler) = harness_with_restore("nightly");
    h.platform.fail_next("launch_restore_job", 1);

    let outcome = reconciler.reconcile(&restore_key("nightly")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    let status = h.platform.restore_status("nightly");
    assert_eq!(status.phase, RestorePhase::Failed);
    assert!(status.error_detail.unwrap().contains("injected"));
    assert_eq!(h.metrics.restore_errors_total.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_restore_is_not_relaunched() {
    for phase in [RestorePhase::Completed, RestorePhase::Failed] {
        let h = Harness::new();
        let mut restore = test_restore("done", "vectors", "docs");
        restore.status = Some(QdrantRestoreStatus {
            phase,
            ..Default::default()
        });
        h.platform.insert_restore(restore);
        let reconciler = RestoreReconciler::new(h.ctx.clone());

        let outcome = reconciler.reconcile(&restore_key("done")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(h.platform.calls("launch_restore_job"), 0);
        assert_eq!(h.platform.calls("patch_restore_status"), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_restore_fails_without_job() {
    let h = Harness::new();
    let mut restore = test_restore("bad", "vectors", "docs");
    restore.spec.priority = Some("fastest".to_string());
    h.platform.insert_restore(restore);
    let reconciler = RestoreReconciler::new(h.ctx.clone());

    reconciler.reconcile(&restore_key("bad")).await.unwrap();

    let status = h.platform.restore_status("bad");
    assert_eq!(status.phase, RestorePhase::Failed);
    assert!(status.error_detail.unwrap().contains("priority"));
    assert_eq!(h.metrics.validation_error_count(ResourceKind::Restore), 1);
    assert_eq!(h.platform.calls("launch_restore_job"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_progress_restore_resumes_polling() {
    let h = Harness::new();
    let mut restore = test_restore("resumed", "vectors", "docs");
    restore.status = Some(QdrantRestoreStatus {
        phase: RestorePhase::InProgress,
        job_name: Some("resumed-restore".to_string()),
        ..Default::default()
    });
    h.platform.insert_restore(restore);
    h.platform.script_jobs([Some(JobState::Succeeded)]);
    let reconciler = RestoreReconciler::new(h.ctx.clone());

    reconciler.reconcile(&restore_key("resumed")).await.unwrap();

    // Launch is idempotent and the recorded job name already matches, so the
    // only status write is the terminal one
    assert_eq!(h.platform.calls("launch_restore_job"), 1);
    assert_eq!(h.platform.calls("patch_restore_status"), 1);
    assert_eq!(
        h.platform.restore_status("resumed").phase,
        RestorePhase::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_pass_does_not_poll_twice() {
    let (h, reconciler) = harness_with_restore("nightly");
    h.platform
        .script_jobs([Some(JobState::Running), Some(JobState::Succeeded)]);
    let key = restore_key("nightly");

    let (first, second) = tokio::join!(reconciler.reconcile(&key), reconciler.reconcile(&key));

    assert_eq!(first.unwrap(), ReconcileOutcome::Done);
    assert_eq!(second.unwrap(), ReconcileOutcome::Done);
    assert_eq!(h.platform.calls("launch_restore_job"), 1);
    assert_eq!(
        h.platform.restore_status("nightly").phase,
        RestorePhase::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_restore_in_progress() {
    let (h, reconciler) = harness_with_restore("nightly");
    h.platform.state().job_default = Some(JobState::Running);
    let key = restore_key("nightly");

    let (outcome, ()) = tokio::join!(reconciler.reconcile(&key), async {
        tokio::time::sleep(std::time::Duration::from_secs(12)).await;
        h.gate.begin_shutdown();
    });

    assert_eq!(outcome.unwrap(), ReconcileOutcome::Done);
    let status = h.platform.restore_status("nightly");
    assert_eq!(status.phase, RestorePhase::InProgress);
    assert_eq!(status.job_name.as_deref(), Some("nightly-restore"));
    assert_eq!(h.platform.calls("read_job_status"), 3);
    assert_eq!(h.metrics.restore_errors_total.get(), 0);
}
