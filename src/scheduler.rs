//! Periodic task registry and scheduler.
//!
//! Each enabled task gets its own timer loop. A tick reads the partition
//! currently owned by this worker, runs the task body to completion and
//! waits for the next tick. Ticks missed while a run was in flight are
//! skipped, never queued. Runs of the same task never overlap, whether they
//! come from the timer or from [`Scheduler::trigger`].

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::coordination::{Partition, PartitionAssigner};
use crate::error::{Error, Result};
use crate::metrics::{self, TaskOutcome, Timer};

/// Static settings of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Registry name, also used in config and the allow-list.
    pub name: String,
    /// Time between ticks.
    pub interval: Duration,
    /// Maximum rows handled per tick.
    pub batch_size: usize,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Task name.
    pub task: String,
    /// Items handled.
    pub processed: usize,
}

impl TaskReport {
    /// Report for `task`.
    pub fn new(task: impl Into<String>, processed: usize) -> Self {
        Self {
            task: task.into(),
            processed,
        }
    }
}

/// A maintenance task driven by the scheduler.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Name, interval and batch size.
    fn descriptor(&self) -> &TaskDescriptor;

    /// Registry name.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Process up to one batch of work inside `partition`.
    async fn run(&self, ctx: &RequestContext, partition: Partition) -> Result<TaskReport>;
}

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No timer.
    Stopped,
    /// Timer armed.
    Running,
}

/// One registered task plus its single-flight lock.
#[derive(Clone)]
struct Entry {
    task: Arc<dyn PeriodicTask>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

/// Ordered set of tasks known to the worker.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: Vec<Entry>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. A task with the same name replaces the earlier one.
    pub fn register(&mut self, task: Arc<dyn PeriodicTask>) {
        self.entries.retain(|e| e.task.name() != task.name());
        self.entries.push(Entry {
            task,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        });
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, task: Arc<dyn PeriodicTask>) -> Self {
        self.register(task);
        self
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.task.name()).collect()
    }

    /// Look up a task by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn PeriodicTask>> {
        self.entry(name).map(|e| Arc::clone(&e.task))
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tasks named in `allow_list`. An absent or empty list enables all.
    pub fn enabled(&self, allow_list: Option<&[String]>) -> Vec<Arc<dyn PeriodicTask>> {
        self.enabled_entries(allow_list)
            .into_iter()
            .map(|e| e.task)
            .collect()
    }

    fn enabled_entries(&self, allow_list: Option<&[String]>) -> Vec<Entry> {
        match allow_list {
            Some(names) if !names.is_empty() => {
                for name in names {
                    if self.entry(name).is_none() {
                        warn!(task = %name, "enabled task is not registered");
                    }
                }
                self.entries
                    .iter()
                    .filter(|e| names.iter().any(|n| n == e.task.name()))
                    .cloned()
                    .collect()
            }
            _ => self.entries.clone(),
        }
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.task.name() == name)
    }
}

struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Drives the enabled tasks of a [`TaskRegistry`].
pub struct Scheduler {
    registry: TaskRegistry,
    enabled: Vec<Entry>,
    assigner: PartitionAssigner,
    states: Arc<RwLock<HashMap<String, TaskState>>>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    /// Scheduler for the tasks of `registry` allowed by `allow_list`.
    pub fn new(
        registry: TaskRegistry,
        allow_list: Option<&[String]>,
        assigner: PartitionAssigner,
    ) -> Self {
        let enabled = registry.enabled_entries(allow_list);
        let states = enabled
            .iter()
            .map(|e| (e.task.name().to_string(), TaskState::Stopped))
            .collect();

        Self {
            registry,
            enabled,
            assigner,
            states: Arc::new(RwLock::new(states)),
            running: Mutex::new(None),
        }
    }

    /// Names of the tasks this scheduler will run.
    pub fn enabled_tasks(&self) -> Vec<&str> {
        self.enabled.iter().map(|e| e.task.name()).collect()
    }

    /// State of an enabled task; `None` for tasks not scheduled here.
    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.states.read().get(name).copied()
    }

    /// True while timers are armed.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Arm one timer per enabled task. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("scheduler already started");
            return;
        }

        let token = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.enabled.len());
        for entry in &self.enabled {
            let name = entry.task.name().to_string();
            self.states.write().insert(name.clone(), TaskState::Running);
            info!(
                task = %name,
                interval_secs = entry.task.descriptor().interval.as_secs_f64(),
                batch_size = entry.task.descriptor().batch_size,
                "starting periodic task"
            );
            handles.push(tokio::spawn(timer_loop(
                entry.clone(),
                self.assigner.clone(),
                token.clone(),
            )));
        }

        *running = Some(Running { token, handles });
    }

    /// Disarm the timers and wait for in-flight runs to finish.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.token.cancel();
        for result in join_all(running.handles).await {
            if let Err(e) = result {
                error!("periodic task loop panicked: {}", e);
            }
        }

        for state in self.states.write().values_mut() {
            *state = TaskState::Stopped;
        }
        info!("scheduler stopped");
    }

    /// Run a registered task once, outside its timer.
    ///
    /// Waits for an in-flight run of the same task first. Works whether or
    /// not the scheduler is started, and for tasks left out of the
    /// allow-list.
    pub async fn trigger(&self, name: &str) -> Result<TaskReport> {
        let entry = self
            .registry
            .entry(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTask(name.to_string()))?;

        info!(task = %name, "triggering task out of band");
        run_entry(&entry, self.assigner.current()).await
    }
}

async fn timer_loop(entry: Entry, assigner: PartitionAssigner, token: CancellationToken) {
    let interval = entry.task.descriptor().interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(task = %entry.task.name(), "periodic task shutting down");
                return;
            }

            _ = ticker.tick() => {}
        }

        // Not raced against the token: a started run always completes.
        let timer = Timer::start();
        let _ = run_entry(&entry, assigner.current()).await;
        if timer.elapsed() > interval {
            warn!(
                task = %entry.task.name(),
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "run outlasted its interval, skipping missed ticks"
            );
            metrics::record_task_overrun(entry.task.name());
        }
    }
}

async fn run_entry(entry: &Entry, partition: Partition) -> Result<TaskReport> {
    let _in_flight = entry.in_flight.lock().await;
    let name = entry.task.name();

    if partition.is_empty() {
        debug!(task = %name, "no owned partition, skipping run");
        return Ok(TaskReport::new(name, 0));
    }

    let ctx = RequestContext::new();
    let timer = Timer::start();
    let result = entry.task.run(&ctx, partition).await;
    let elapsed = timer.elapsed();

    match &result {
        Ok(report) => {
            debug!(
                task = %name,
                request_id = %ctx.request_id(),
                processed = report.processed,
                elapsed_ms = elapsed.as_millis() as u64,
                "periodic task run finished"
            );
            metrics::record_task_run(name, TaskOutcome::Success, elapsed);
            metrics::record_task_items(name, report.processed);
        }
        Err(e) => {
            error!(
                task = %name,
                request_id = %ctx.request_id(),
                error = %e,
                "periodic task run failed"
            );
            metrics::record_task_run(name, TaskOutcome::Error, elapsed);
        }
    }

    result
}
