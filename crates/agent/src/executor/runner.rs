//! Bounded-concurrency workflow runner (spec §4.3). Jobs are tracked
//! in-memory keyed by execution id under a reader-writer lock — reads
//! dominate during health exports (spec §5) — and parallel execution
//! across workflows is bounded by a semaphore of capacity
//! `max_concurrent`, the teacher's own idiom for gating concurrent work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meridian_core::models::{ExecutionResult, ExecutionStatus, HookDefinition, StepDefinition, StepResult, StepStatus, WorkflowDefinition};
use meridian_core::{Clock, Error, Result};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::steps::{self, StepContext};

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, execution_id: Uuid, status: ExecutionStatus, result: ExecutionResult);
}

struct JobRecord {
    workflow_id: Uuid,
    status: ExecutionStatus,
    result: Option<ExecutionResult>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub result: Option<ExecutionResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct WorkflowExecutor {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    semaphore: Arc<Semaphore>,
    active_count: AtomicUsize,
    reporter: Arc<dyn ReportSink>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    control_base_url: String,
    shutdown_window: Duration,
    retention: Duration,
}

impl WorkflowExecutor {
    pub fn new(max_concurrent: usize, reporter: Arc<dyn ReportSink>, clock: Arc<dyn Clock>, control_base_url: String, shutdown_window: Duration, retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active_count: AtomicUsize::new(0),
            reporter,
            clock,
            http: reqwest::Client::new(),
            control_base_url,
            shutdown_window,
            retention,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Accepts a new job and spawns it; attempting to run it when the
    /// semaphore is saturated blocks the spawned task, it never rejects
    /// (spec §4.3 "must wait, not reject").
    pub async fn submit(self: &Arc<Self>, execution_id: Uuid, workflow_id: Uuid, definition: WorkflowDefinition, parameters: HashMap<String, String>) -> Result<()> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.get(&execution_id).is_some_and(|job| !job.status.is_terminal()) {
                return Err(Error::conflict(format!("execution {execution_id} already running")));
            }
            jobs.insert(
                execution_id,
                JobRecord { workflow_id, status: ExecutionStatus::Pending, result: None, started_at: None, completed_at: None, cancel: CancellationToken::new() },
            );
        }

        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run_job(execution_id, workflow_id, definition, parameters).await });
        Ok(())
    }

    pub async fn status(&self, execution_id: Uuid) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.get(&execution_id).map(|job| JobSnapshot {
            execution_id,
            workflow_id: job.workflow_id,
            status: job.status,
            result: job.result.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        })
    }

    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&execution_id).ok_or_else(|| Error::not_found(format!("execution {execution_id} not found")))?;
        if job.status.is_terminal() {
            return Err(Error::conflict("execution already reached a terminal status"));
        }
        job.cancel.cancel();
        Ok(())
    }

    /// Evicts terminal job records older than the configured retention
    /// (spec §4.3 "Cleanup").
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => executor.sweep_once().await,
                    () = cancel.cancelled() => return,
                }
            }
        })
    }

    async fn sweep_once(&self) {
        let cutoff = self.clock.now() - chrono::Duration::from_std(self.retention).unwrap_or_default();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff)));
        let evicted = before - jobs.len();
        if evicted > 0 {
            info!(evicted, "swept completed job records");
        }
    }

    async fn run_job(self: Arc<Self>, execution_id: Uuid, workflow_id: Uuid, definition: WorkflowDefinition, parameters: HashMap<String, String>) {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        self.active_count.fetch_add(1, Ordering::Relaxed);

        let cancel = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(&execution_id).expect("job record inserted by submit");
            job.status = ExecutionStatus::Running;
            job.started_at = Some(self.clock.now());
            job.cancel.clone()
        };

        let ctx = StepContext { vars: definition.vars.clone(), parameters, http: self.http.clone(), control_base_url: self.control_base_url.clone() };

        // Whole-graph cap (spec §4.3 "timeout (whole-graph cap; default 30
        // min)", §8 "workflow timeout fires precisely once"). Expiry
        // cancels the same token the running step's per-step timeout
        // watches, so it winds down immediately instead of racing its own,
        // possibly longer, per-step deadline; the steps already completed
        // are kept rather than discarded.
        let graph_timeout = Duration::from_secs(definition.timeout_secs);
        let run_steps = async {
            let mut steps = Vec::with_capacity(definition.steps.len());
            let mut failed = false;
            for step in &definition.steps {
                if cancel.is_cancelled() {
                    break;
                }
                let result = self.run_step(step, &ctx, &cancel).await;
                let step_failed = result.status == StepStatus::Failed;
                steps.push(result);
                if step_failed && !step.continue_on_error {
                    failed = true;
                    break;
                }
            }
            (steps, failed)
        };
        tokio::pin!(run_steps);

        let (mut steps, failed, timed_out) = tokio::select! {
            (steps, failed) = &mut run_steps => (steps, failed, false),
            () = tokio::time::sleep(graph_timeout) => {
                cancel.cancel();
                let (steps, failed) = run_steps.await;
                (steps, failed, true)
            }
        };

        let (final_status, hooks) = if timed_out {
            (ExecutionStatus::Timeout, &definition.on_failure)
        } else if cancel.is_cancelled() {
            (ExecutionStatus::Cancelled, &definition.on_cancel)
        } else if failed {
            (ExecutionStatus::Failed, &definition.on_failure)
        } else {
            (ExecutionStatus::Success, &definition.on_success)
        };

        // Hooks run in a bounded, separate context (spec §8 "workflow
        // timeout fires precisely once; subsequent hook execution uses
        // a separate, short context") — failures are recorded but never
        // cascade back into the workflow's own terminal status.
        let hook_results = self.run_hooks(hooks, &ctx).await;
        steps.extend(hook_results);

        let error = if timed_out {
            Some(format!("workflow {workflow_id} exceeded its {}s timeout", definition.timeout_secs))
        } else if failed {
            Some(format!("workflow {workflow_id} failed"))
        } else {
            None
        };
        let result = ExecutionResult { steps, error };

        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&execution_id) {
                job.status = final_status;
                job.result = Some(result.clone());
                job.completed_at = Some(self.clock.now());
            }
        }

        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.reporter.report(execution_id, final_status, result).await;
    }

    async fn run_step(&self, step: &StepDefinition, ctx: &StepContext, cancel: &CancellationToken) -> StepResult {
        if let Some(condition) = &step.condition {
            if !steps::evaluate_condition(condition, ctx).await {
                return StepResult { step_id: step.id.clone(), status: StepStatus::Skipped, output: String::new(), exit_code: None, attempts: 0, duration_ms: 0 };
            }
        }

        let started = std::time::Instant::now();
        let timeout = Duration::from_secs(step.timeout_secs);
        let mut attempts = 0;
        let mut last_outcome = None;

        loop {
            attempts += 1;
            let attempt = tokio::select! {
                outcome = tokio::time::timeout(timeout, steps::execute(&step.step_type, ctx)) => outcome,
                () = cancel.cancelled() => {
                    return StepResult { step_id: step.id.clone(), status: StepStatus::Cancelled, output: "cancelled".into(), exit_code: None, attempts, duration_ms: elapsed_ms(started) };
                }
            };

            let outcome = match attempt {
                Ok(outcome) => outcome,
                Err(_) => steps::StepOutcome { output: format!("step {} timed out after {:?}", step.id, timeout), exit_code: None, changed: false },
            };

            let succeeded = outcome.exit_code == Some(0);
            if succeeded || attempts > step.retry_count {
                last_outcome = Some(outcome);
                break;
            }
            last_outcome = Some(outcome);
            if step.retry_delay_secs > 0 {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(step.retry_delay_secs)) => {}
                    () = cancel.cancelled() => break,
                }
            }
        }

        let outcome = last_outcome.expect("loop always runs at least once");
        let status = if outcome.exit_code == Some(0) { StepStatus::Success } else { StepStatus::Failed };
        StepResult { step_id: step.id.clone(), status, output: outcome.output, exit_code: outcome.exit_code, attempts, duration_ms: elapsed_ms(started) }
    }

    async fn run_hooks(&self, hooks: &[HookDefinition], ctx: &StepContext) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let started = std::time::Instant::now();
            let outcome = match tokio::time::timeout(Duration::from_secs(hook.timeout_secs), steps::execute(&hook.step_type, ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => steps::StepOutcome { output: format!("hook {} timed out", hook.id), exit_code: None, changed: false },
            };
            let status = if outcome.exit_code == Some(0) { StepStatus::Success } else { StepStatus::Failed };
            if status == StepStatus::Failed {
                warn!(hook_id = %hook.id, "hook failed, not cascading to workflow status");
            }
            results.push(StepResult { step_id: hook.id.clone(), status, output: outcome.output, exit_code: outcome.exit_code, attempts: 1, duration_ms: elapsed_ms(started) });
        }
        results
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use meridian_core::clock::FixedClock;
    use meridian_core::models::StepType;
    use tokio::sync::Notify;

    use super::*;

    struct CapturingSink {
        reported: Mutex<Option<(ExecutionStatus, ExecutionResult)>>,
        notify: Notify,
    }

    impl CapturingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { reported: Mutex::new(None), notify: Notify::new() })
        }

        async fn wait(&self) -> (ExecutionStatus, ExecutionResult) {
            loop {
                if let Some(report) = self.reported.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                    return report;
                }
                self.notify.notified().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl ReportSink for CapturingSink {
        async fn report(&self, _execution_id: Uuid, status: ExecutionStatus, result: ExecutionResult) {
            *self.reported.lock().unwrap_or_else(|e| e.into_inner()) = Some((status, result));
            self.notify.notify_one();
        }
    }

    fn command_step(id: &str, command: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: id.to_string(),
            step_type: StepType::Command { command: command.to_string(), args: vec![] },
            timeout_secs: 5,
            retry_count: 0,
            retry_delay_secs: 0,
            continue_on_error: false,
            condition: None,
        }
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition { name: "w".into(), timeout_secs: 30, vars: HashMap::new(), steps, on_success: vec![], on_failure: vec![], on_cancel: vec![] }
    }

    fn workflow_with_timeout(steps: Vec<StepDefinition>, timeout_secs: u64) -> WorkflowDefinition {
        WorkflowDefinition { timeout_secs, ..workflow(steps) }
    }

    #[tokio::test]
    async fn successful_workflow_reports_success() {
        let sink = CapturingSink::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let executor = WorkflowExecutor::new(2, sink.clone(), clock, "http://127.0.0.1:0".to_string(), Duration::from_secs(1), Duration::from_secs(60));

        let execution_id = Uuid::new_v4();
        executor.submit(execution_id, Uuid::new_v4(), workflow(vec![command_step("s1", "true")]), HashMap::new()).await.expect("submit");

        let (status, result) = sink.wait().await;
        assert_eq!(status, ExecutionStatus::Success);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn failing_step_halts_workflow_without_continue_on_error() {
        let sink = CapturingSink::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let executor = WorkflowExecutor::new(2, sink.clone(), clock, "http://127.0.0.1:0".to_string(), Duration::from_secs(1), Duration::from_secs(60));

        let execution_id = Uuid::new_v4();
        executor.submit(execution_id, Uuid::new_v4(), workflow(vec![command_step("s1", "false"), command_step("s2", "true")]), HashMap::new()).await.expect("submit");

        let (status, result) = sink.wait().await;
        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(result.steps.len(), 1, "second step must not run once the first fails");
    }

    #[tokio::test]
    async fn duplicate_submit_while_running_is_rejected() {
        let sink = CapturingSink::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let executor = WorkflowExecutor::new(1, sink.clone(), clock, "http://127.0.0.1:0".to_string(), Duration::from_secs(1), Duration::from_secs(60));

        let execution_id = Uuid::new_v4();
        executor.submit(execution_id, Uuid::new_v4(), workflow(vec![command_step("s1", "sleep 1")]), HashMap::new()).await.expect("first submit");

        let err = executor.submit(execution_id, Uuid::new_v4(), workflow(vec![command_step("s1", "true")]), HashMap::new()).await.unwrap_err();
        assert_eq!(err.kind, meridian_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn whole_graph_timeout_fires_before_a_longer_step_timeout() {
        let sink = CapturingSink::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let executor = WorkflowExecutor::new(2, sink.clone(), clock, "http://127.0.0.1:0".to_string(), Duration::from_secs(1), Duration::from_secs(60));

        let mut step = command_step("s1", "sleep 5");
        step.timeout_secs = 10;
        let execution_id = Uuid::new_v4();
        executor.submit(execution_id, Uuid::new_v4(), workflow_with_timeout(vec![step], 1), HashMap::new()).await.expect("submit");

        let (status, result) = sink.wait().await;
        assert_eq!(status, ExecutionStatus::Timeout);
        assert!(result.error.is_some_and(|e| e.contains("timeout")));
    }
}
