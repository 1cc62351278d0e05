//! Metrics instrumentation for zone-manager.
//!
//! All metrics are prefixed with `zone_manager.`

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

use crate::model::ExportStatus;

/// Register help text for every metric with the installed recorder.
pub fn describe() {
    describe_counter!("zone_manager.task.run.count", "Periodic task runs by outcome");
    describe_histogram!(
        "zone_manager.task.run.duration.seconds",
        Unit::Seconds,
        "Wall time of one periodic task run"
    );
    describe_counter!("zone_manager.task.items.count", "Items handled by task runs");
    describe_counter!(
        "zone_manager.task.overrun.count",
        "Runs that outlasted their interval"
    );
    describe_counter!(
        "zone_manager.transaction.retry.count",
        "Retryable storage failures"
    );
    describe_counter!("zone_manager.transaction.count", "Transactions by outcome");
    describe_counter!(
        "zone_manager.alias.resolution.count",
        "ALIAS target lookups by result"
    );
    describe_counter!(
        "zone_manager.alias.flatten.count",
        "Mirrored A recordset reconciliations by action"
    );
    describe_histogram!(
        "zone_manager.alias.flatten.addresses",
        Unit::Count,
        "Addresses written per reconciliation"
    );
    describe_counter!("zone_manager.zone.purged.count", "Zones hard-deleted");
    describe_counter!(
        "zone_manager.zone.propagation.count",
        "Zone propagations requested"
    );
    describe_counter!("zone_manager.zone.export.count", "Zone exports by status");
    describe_gauge!(
        "zone_manager.partition.shards",
        Unit::Count,
        "Shards owned by this worker"
    );
    describe_gauge!(
        "zone_manager.partition.members",
        Unit::Count,
        "Workers in the membership view"
    );
}

/// Record one periodic task run.
pub fn record_task_run(task: &str, outcome: TaskOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        TaskOutcome::Success => "success",
        TaskOutcome::Error => "error",
    };

    counter!("zone_manager.task.run.count", "task" => task.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("zone_manager.task.run.duration.seconds", "task" => task.to_string())
        .record(duration.as_secs_f64());
}

/// Task run outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum TaskOutcome {
    /// Run completed.
    Success,
    /// Run failed and was abandoned until the next tick.
    Error,
}

/// Record items handled by a task run.
pub fn record_task_items(task: &str, count: usize) {
    counter!("zone_manager.task.items.count", "task" => task.to_string()).increment(count as u64);
}

/// Record a run that outlasted its interval (the next tick is skipped).
pub fn record_task_overrun(task: &str) {
    counter!("zone_manager.task.overrun.count", "task" => task.to_string()).increment(1);
}

/// Record a retryable storage failure.
pub fn record_transaction_retry() {
    counter!("zone_manager.transaction.retry.count").increment(1);
}

/// Record a transaction outcome.
pub fn record_transaction(outcome: TransactionOutcome) {
    let outcome_str = match outcome {
        TransactionOutcome::Commit => "commit",
        TransactionOutcome::Rollback => "rollback",
    };

    counter!("zone_manager.transaction.count", "outcome" => outcome_str).increment(1);
}

/// Transaction outcomes.
#[derive(Debug, Clone, Copy)]
pub enum TransactionOutcome {
    /// Work committed.
    Commit,
    /// Work rolled back.
    Rollback,
}

/// Record an external name resolution.
pub fn record_resolution(result: ResolutionResult) {
    let result_str = match result {
        ResolutionResult::Success => "success",
        ResolutionResult::NotFound => "not_found",
        ResolutionResult::Transport => "transport",
        ResolutionResult::InvalidName => "invalid_name",
    };

    counter!("zone_manager.alias.resolution.count", "result" => result_str).increment(1);
}

/// Resolution outcomes.
#[derive(Debug, Clone, Copy)]
pub enum ResolutionResult {
    /// Target resolved to at least one address.
    Success,
    /// Target has no A records.
    NotFound,
    /// Upstream unreachable.
    Transport,
    /// Target is not a valid DNS name.
    InvalidName,
}

/// Record a reconciliation of a mirrored A recordset.
pub fn record_flatten(action: FlattenAction, addresses: usize) {
    let action_str = match action {
        FlattenAction::Created => "created",
        FlattenAction::Updated => "updated",
        FlattenAction::Deleted => "deleted",
        FlattenAction::Noop => "noop",
    };

    counter!("zone_manager.alias.flatten.count", "action" => action_str).increment(1);
    histogram!("zone_manager.alias.flatten.addresses").record(addresses as f64);
}

/// Reconciler actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenAction {
    /// New mirrored recordset.
    Created,
    /// Records of the mirrored recordset replaced.
    Updated,
    /// Mirrored recordset removed.
    Deleted,
    /// Nothing to delete.
    Noop,
}

/// Record zones purged from storage.
pub fn record_zones_purged(count: usize) {
    counter!("zone_manager.zone.purged.count").increment(count as u64);
}

/// Record a zone propagation request.
pub fn record_propagation() {
    counter!("zone_manager.zone.propagation.count").increment(1);
}

/// Record a settled zone export.
pub fn record_export(status: ExportStatus) {
    let status_str = match status {
        ExportStatus::Pending => "pending",
        ExportStatus::Complete => "complete",
        ExportStatus::Error => "error",
    };

    counter!("zone_manager.zone.export.count", "status" => status_str).increment(1);
}

/// Record the owned partition after recomputation.
pub fn record_partition(shards: usize, members: usize) {
    gauge!("zone_manager.partition.shards").set(shards as f64);
    gauge!("zone_manager.partition.members").set(members as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
