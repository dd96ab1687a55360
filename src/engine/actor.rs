//! The engine task.
//!
//! Every mutation of pending requests, task states, in-flight contexts and
//! history happens here, on one tokio task. Commands arrive over the handle's
//! channel; supervisors report finished runs over a second, internal channel.
//! A pass timer re-runs the scheduling pass so that requests left pending by
//! an admission denial or a failed submission are retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::handle::{EngineCommand, EngineHandle};
use super::snapshot::{EngineSnapshot, SNAPSHOT_HISTORY_LEN};
use crate::config::{GlobalConfig, TasksConfig};
use crate::domain::{
    ExecutionOutcome, ExecutionRecord, SessionMonitor, TaskDescriptor, TaskId, TaskState,
};
use crate::error::{CadenceError, Result};
use crate::execution::{
    ExecutionContextManager, ExecutionFinished, ExecutionHistory, ExpiredBy, RunResult, Stats, supervise,
};
use crate::power::{Admission, AdmissionController, BatteryMonitor, DenyReason};
use crate::scheduler::{FireEvent, OsScheduler, PendingQueue, PendingRequest, SubmitRequest, TaskRegistry, WindowPlanner};
use crate::storage::{QUIET_ANCHOR_KEY, STATS_KEY, StateStore, load_typed, save_typed};
use crate::tasks::{BodyReport, TaskBody};

const COMMAND_CHANNEL_SIZE: usize = 100;

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineDeps {
    pub os: Arc<dyn OsScheduler>,
    pub power: Arc<dyn BatteryMonitor>,
    pub session: Arc<dyn SessionMonitor>,
    pub store: Arc<dyn StateStore>,
}

enum Flow {
    Continue,
    Stop(tokio::sync::oneshot::Sender<()>),
}

/// Background task orchestration engine.
pub struct Engine {
    enabled: bool,
    registry: TaskRegistry,
    queue: PendingQueue,
    states: HashMap<TaskId, TaskState>,
    contexts: ExecutionContextManager,
    history: ExecutionHistory,
    admission: AdmissionController,
    planner: WindowPlanner,
    tasks_config: TasksConfig,
    max_concurrent: Option<usize>,
    pass_interval: Duration,
    deps: EngineDeps,
    commands: mpsc::Receiver<EngineCommand>,
    finished_tx: mpsc::UnboundedSender<ExecutionFinished>,
    finished_rx: mpsc::UnboundedReceiver<ExecutionFinished>,
}

impl Engine {
    /// Build an engine and the handle that drives it.
    ///
    /// Stats and the quiet anchor are restored from the state store. A store
    /// that cannot be read is logged and the engine starts fresh.
    pub fn new(config: &GlobalConfig, deps: EngineDeps) -> Result<(Self, EngineHandle)> {
        if config.engine.max_execution_budget().is_zero() {
            return Err(CadenceError::Config("max execution budget must be > 0".to_string()));
        }
        if config.engine.pass_interval().is_zero() {
            return Err(CadenceError::Config("pass interval must be > 0".to_string()));
        }

        let stats = match load_typed::<Stats>(deps.store.as_ref(), STATS_KEY) {
            Ok(stats) => stats.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted stats, starting fresh");
                Stats::default()
            }
        };
        let anchor = match load_typed::<DateTime<Utc>>(deps.store.as_ref(), QUIET_ANCHOR_KEY) {
            Ok(anchor) => anchor,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load quiet anchor");
                None
            }
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let engine = Self {
            enabled: config.engine.enabled,
            registry: TaskRegistry::new(),
            queue: PendingQueue::new(),
            states: HashMap::new(),
            contexts: ExecutionContextManager::new(config.engine.max_execution_budget()),
            history: ExecutionHistory::with_stats(config.engine.max_history_size, stats),
            admission: AdmissionController::new(&config.power),
            planner: WindowPlanner::new(&config.window)?.with_anchor(anchor),
            tasks_config: config.tasks.clone(),
            max_concurrent: config.engine.max_concurrent_tasks,
            pass_interval: config.engine.pass_interval(),
            deps,
            commands: command_rx,
            finished_tx,
            finished_rx,
        };
        Ok((engine, EngineHandle::new(command_tx)))
    }

    /// Register a task type. Returns false if the identifier was already known.
    pub fn register(&mut self, descriptor: TaskDescriptor, body: Arc<dyn TaskBody>) -> bool {
        let id = descriptor.id.clone();
        let added = self.registry.register(descriptor, body);
        if added {
            self.states.insert(id, TaskState::Idle);
        }
        added
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Spawn the engine on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(tasks = self.registry.len(), enabled = self.enabled, "Engine starting");

        if self.enabled {
            self.schedule_all();
        }

        let mut pass_timer = tokio::time::interval_at(Instant::now() + self.pass_interval, self.pass_interval);
        pass_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop_reply = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Flow::Stop(reply) = self.handle_command(command) {
                            break Some(reply);
                        }
                    }
                    None => break None,
                },
                Some(finished) = self.finished_rx.recv() => self.handle_finished(finished),
                _ = pass_timer.tick() => {
                    let submitted = self.run_pass();
                    tracing::debug!(submitted, pending = self.queue.len(), "Natural scheduling pass");
                }
            }
        };

        let aborted = self.contexts.abort_all();
        self.persist_stats();
        tracing::info!(aborted, "Engine stopped");

        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: EngineCommand) -> Flow {
        match command {
            EngineCommand::Register { descriptor, body, reply } => {
                let _ = reply.send(self.register(descriptor, body));
            }
            EngineCommand::Schedule { task_id, delay, reply } => {
                let _ = reply.send(self.schedule(&task_id, delay));
            }
            EngineCommand::Enable { reply } => {
                self.enable();
                let _ = reply.send(());
            }
            EngineCommand::Disable { reply } => {
                self.disable();
                let _ = reply.send(());
            }
            EngineCommand::Fire(event) => self.handle_fire(event),
            EngineCommand::RunPass { reply } => {
                let _ = reply.send(self.run_pass());
            }
            EngineCommand::SetQuietAnchor { anchor, reply } => {
                self.set_quiet_anchor(anchor);
                let _ = reply.send(());
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineCommand::Shutdown { reply } => return Flow::Stop(reply),
        }
        Flow::Continue
    }

    /// Delay before the next run: the config override, else the task's policy.
    fn default_delay(&self, descriptor: &TaskDescriptor) -> Duration {
        self.tasks_config
            .delay_override(descriptor.id.as_str())
            .unwrap_or_else(|| descriptor.delay.delay(self.deps.session.as_ref()))
    }

    fn set_state(&mut self, task_id: &TaskId, next: TaskState) {
        let current = self.states.get(task_id).copied().unwrap_or(TaskState::Idle);
        if !current.can_transition_to(next) {
            tracing::debug!(task_id = %task_id, from = ?current, to = ?next, "Out of order state change");
        }
        self.states.insert(task_id.clone(), next);
    }

    /// Queue a request without running a pass.
    fn enqueue(&mut self, descriptor: &TaskDescriptor, delay: Duration) {
        let earliest_eligible = eligible_after(Utc::now(), delay);
        let replaced = self.queue.upsert(PendingRequest::new(
            descriptor.id.clone(),
            descriptor.priority,
            earliest_eligible,
        ));
        // A running task keeps its state until the run is recorded
        if !self.contexts.is_running(&descriptor.id) {
            self.set_state(&descriptor.id, TaskState::Scheduled);
        }
        tracing::debug!(
            task_id = %descriptor.id,
            delay_secs = delay.as_secs(),
            replaced,
            "Request queued"
        );
    }

    /// Create or replace the pending request for a task and run a pass.
    pub fn schedule(&mut self, task_id: &TaskId, delay: Option<Duration>) -> Result<()> {
        let descriptor = self
            .registry
            .descriptor(task_id)
            .cloned()
            .ok_or_else(|| CadenceError::UnknownTask(task_id.to_string()))?;

        if !self.enabled {
            tracing::info!(task_id = %task_id, "Engine disabled, not scheduling");
            return Ok(());
        }

        let delay = delay.unwrap_or_else(|| self.default_delay(&descriptor));
        self.enqueue(&descriptor, delay);
        self.run_pass();
        Ok(())
    }

    /// Schedule every registered task at its default delay.
    fn schedule_all(&mut self) {
        let descriptors: Vec<TaskDescriptor> = self
            .registry
            .ids()
            .iter()
            .filter_map(|id| self.registry.descriptor(id).cloned())
            .collect();
        for descriptor in &descriptors {
            let delay = self.default_delay(descriptor);
            self.enqueue(descriptor, delay);
        }
        self.run_pass();
    }

    /// Submit admitted pending requests to the OS scheduler, highest first.
    ///
    /// Denied requests and failed submissions stay pending for the next pass.
    pub fn run_pass(&mut self) -> usize {
        if !self.enabled || self.queue.is_empty() {
            return 0;
        }

        let power = self.deps.power.snapshot();
        let in_window = self.planner.is_in_window(Local::now());
        let mut kept = Vec::new();
        let mut submitted = 0;

        for request in self.queue.drain_ordered() {
            let Some(descriptor) = self.registry.descriptor(&request.task_id) else {
                continue;
            };

            if let Admission::Deny(reason) = self.admission.evaluate(descriptor, power, in_window) {
                tracing::info!(
                    task_id = %request.task_id,
                    reason = %reason,
                    battery = power.battery_level,
                    charging = power.is_charging,
                    "Admission denied, keeping request pending"
                );
                // An older submission must not fire ahead of the pending request
                self.deps.os.cancel(&request.task_id);
                kept.push(request);
                continue;
            }

            let submit = SubmitRequest {
                task_id: request.task_id.clone(),
                earliest_eligible: request.earliest_eligible,
                requires_network: descriptor.requires_network,
                requires_external_power: descriptor.requires_external_power,
            };
            match self.deps.os.submit(submit) {
                Ok(()) => {
                    tracing::debug!(
                        task_id = %request.task_id,
                        earliest_eligible = %request.earliest_eligible,
                        "Submitted to OS scheduler"
                    );
                    submitted += 1;
                }
                Err(e) => {
                    tracing::warn!(task_id = %request.task_id, error = %e, "Submission failed, keeping request pending");
                    kept.push(request);
                }
            }
        }

        for request in kept {
            self.queue.upsert(request);
        }
        submitted
    }

    /// Handle a fire event from the OS scheduler.
    pub fn handle_fire(&mut self, event: FireEvent) {
        let task_id = event.task_id.clone();

        let Some(task) = self.registry.get(&task_id).cloned() else {
            tracing::warn!(task_id = %task_id, "Fire for unknown task");
            event.completion.complete(false);
            return;
        };

        if self.contexts.is_running(&task_id) {
            tracing::warn!(task_id = %task_id, "Task already running, rejecting fire");
            event.completion.complete(false);
            return;
        }

        if !self.enabled {
            tracing::info!(task_id = %task_id, "Engine disabled, skipping fire");
            event.completion.complete(true);
            return;
        }

        let power = self.deps.power.snapshot();
        let in_window = self.planner.is_in_window(Local::now());
        let mut admission = self.admission.evaluate(&task.descriptor, power, in_window);
        let at_capacity = self
            .max_concurrent
            .is_some_and(|cap| self.contexts.active_count() >= cap);
        if admission.is_admitted() && at_capacity {
            admission = Admission::Deny(DenyReason::ConcurrencyLimit);
        }

        if let Admission::Deny(reason) = admission {
            tracing::info!(task_id = %task_id, reason = %reason, "Fire denied, rescheduling");
            event.completion.complete(true);
            let delay = self.default_delay(&task.descriptor);
            self.enqueue(&task.descriptor, delay);
            self.run_pass();
            return;
        }

        self.set_state(&task_id, TaskState::Admitted);
        let ticket = match self.contexts.begin(task_id.clone(), power, event.completion) {
            Ok(ticket) => ticket,
            Err(completion) => {
                completion.complete(false);
                return;
            }
        };
        self.set_state(&task_id, TaskState::Running);
        tracing::info!(task_id = %task_id, execution_id = ticket.execution_id, "Task started");

        let finished_tx = self.finished_tx.clone();
        let body = task.body.clone();
        let expiration = event.expiration;
        let run_ticket = ticket.clone();
        let supervisor = tokio::spawn(async move {
            let result = supervise(body, run_ticket.deadline, expiration).await;
            let _ = finished_tx.send(ExecutionFinished {
                task_id: run_ticket.task_id,
                execution_id: run_ticket.execution_id,
                result,
                elapsed: run_ticket.started.elapsed(),
            });
        });
        self.contexts
            .attach(&ticket.task_id, ticket.execution_id, supervisor.abort_handle());
    }

    /// Record a finished run, resolve its fire event and reschedule.
    pub fn handle_finished(&mut self, finished: ExecutionFinished) {
        let Some(mut ctx) = self.contexts.finish(&finished.task_id, finished.execution_id) else {
            tracing::debug!(task_id = %finished.task_id, execution_id = finished.execution_id, "Stale completion ignored");
            return;
        };

        let (outcome, report, duration) = match finished.result {
            RunResult::Completed(Ok(report)) => (ExecutionOutcome::Succeeded, report, finished.elapsed),
            RunResult::Completed(Err(e)) => (ExecutionOutcome::Failed(e.to_string()), BodyReport::default(), finished.elapsed),
            RunResult::Expired(ExpiredBy::Deadline) => {
                (ExecutionOutcome::Expired, BodyReport::default(), self.contexts.budget())
            }
            RunResult::Expired(ExpiredBy::Platform) => (ExecutionOutcome::Expired, BodyReport::default(), finished.elapsed),
        };

        let record = ExecutionRecord {
            task_id: ctx.task_id.clone(),
            started_at: ctx.started_at,
            ended_at: ctx.started_at + TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero()),
            duration,
            outcome,
            battery_level: ctx.power.battery_level,
            is_charging: ctx.power.is_charging,
        };
        let success = record.success();
        let expired = record.expired();

        match &record.outcome {
            ExecutionOutcome::Succeeded => {
                tracing::info!(task_id = %record.task_id, duration_ms = duration.as_millis() as u64, "Task succeeded")
            }
            ExecutionOutcome::Failed(reason) => {
                tracing::warn!(task_id = %record.task_id, error = %reason, "Task failed")
            }
            ExecutionOutcome::Expired => {
                tracing::warn!(task_id = %record.task_id, duration_ms = duration.as_millis() as u64, "Task expired")
            }
        }

        let task_id = record.task_id.clone();
        self.history.record(record, &report);
        self.persist_stats();
        ctx.complete(success);

        let terminal = if expired {
            TaskState::Expired
        } else {
            TaskState::Completed { success }
        };
        self.set_state(&task_id, terminal);

        if !self.enabled {
            return;
        }
        if let Some(descriptor) = self.registry.descriptor(&task_id).cloned() {
            let delay = self.default_delay(&descriptor);
            self.enqueue(&descriptor, delay);
            self.run_pass();
        }
    }

    /// Turn the engine on and schedule every registered task.
    pub fn enable(&mut self) {
        tracing::info!("Engine enabled");
        self.enabled = true;
        self.schedule_all();
        self.persist_stats();
    }

    /// Turn the engine off: drop pending requests and cancel submitted ones.
    ///
    /// Runs in flight finish and are recorded, but are not rescheduled.
    pub fn disable(&mut self) {
        tracing::info!(pending = self.queue.len(), running = self.contexts.active_count(), "Engine disabled");
        self.enabled = false;
        self.queue.clear();
        self.deps.os.cancel_all();

        let idle: Vec<TaskId> = self
            .registry
            .ids()
            .iter()
            .filter(|id| !self.contexts.is_running(id))
            .cloned()
            .collect();
        for id in idle {
            self.set_state(&id, TaskState::Idle);
        }
        self.persist_stats();
    }

    /// Remember a new quiet-period anchor and re-run the pass for the new window.
    pub fn set_quiet_anchor(&mut self, anchor: DateTime<Utc>) {
        self.planner.set_anchor(anchor);
        if let Err(e) = save_typed(self.deps.store.as_ref(), QUIET_ANCHOR_KEY, &anchor) {
            tracing::warn!(error = %e, "Failed to persist quiet anchor");
        }
        let window = self.planner.current_window(Local::now());
        tracing::info!(anchor = %anchor, window_start = %window.start, window_end = %window.end, "Quiet anchor updated");
        self.run_pass();
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let stats = self.history.stats().clone();
        EngineSnapshot {
            enabled: self.enabled,
            pending: self.queue.ordered(),
            states: self.states.iter().map(|(id, state)| (id.clone(), *state)).collect(),
            running: self.contexts.running_ids(),
            success_rate: stats.success_rate(),
            stats,
            recent: self.history.recent(SNAPSHOT_HISTORY_LEN),
            window: self.planner.current_window(Local::now()),
            quiet_anchor: self.planner.anchor(),
        }
    }

    fn persist_stats(&self) {
        if let Err(e) = save_typed(self.deps.store.as_ref(), STATS_KEY, self.history.stats()) {
            tracing::warn!(error = %e, "Failed to persist stats");
        }
    }
}

/// `now + delay`, saturating at the latest representable instant.
fn eligible_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DelayPolicy, Priority, SessionFlag};
    use crate::power::FixedPowerMonitor;
    use crate::scheduler::MockOsScheduler;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingBody {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingBody {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl TaskBody for CountingBody {
        async fn run(&self) -> Result<BodyReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CadenceError::Collaborator("upload rejected".to_string()));
            }
            Ok(BodyReport::default())
        }
    }

    struct HangingBody;

    #[async_trait]
    impl TaskBody for HangingBody {
        async fn run(&self) -> Result<BodyReport> {
            std::future::pending::<()>().await;
            Ok(BodyReport::default())
        }
    }

    struct Fixture {
        engine: Engine,
        _handle: EngineHandle,
        os: Arc<MockOsScheduler>,
        power: Arc<FixedPowerMonitor>,
        session: Arc<SessionFlag>,
        store: Arc<MemoryStore>,
    }

    fn fixture_with(config: GlobalConfig) -> Fixture {
        let os = Arc::new(MockOsScheduler::new());
        let power = Arc::new(FixedPowerMonitor::new(0.9, false));
        let session = Arc::new(SessionFlag::new(false));
        let store = Arc::new(MemoryStore::new());
        let deps = EngineDeps {
            os: os.clone(),
            power: power.clone(),
            session: session.clone(),
            store: store.clone(),
        };
        let (engine, handle) = Engine::new(&config, deps).unwrap();
        Fixture {
            engine,
            _handle: handle,
            os,
            power,
            session,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GlobalConfig::default())
    }

    fn fixed(id: &str, priority: Priority, secs: u64) -> TaskDescriptor {
        TaskDescriptor::new(id, priority, DelayPolicy::Fixed(Duration::from_secs(secs)))
    }

    fn id(s: &str) -> TaskId {
        TaskId::from(s)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let mut f = fixture();
        assert!(f.engine.register(fixed("sync", Priority::Medium, 60), CountingBody::new(false)));
        assert!(!f.engine.register(fixed("sync", Priority::Low, 10), CountingBody::new(false)));
        assert_eq!(f.engine.registry.len(), 1);
        assert_eq!(
            f.engine.registry.descriptor(&id("sync")).map(|d| d.priority),
            Some(Priority::Medium)
        );
        assert_eq!(f.engine.snapshot().state_of(&id("sync")), Some(TaskState::Idle));
    }

    #[tokio::test]
    async fn test_schedule_unknown_task() {
        let mut f = fixture();
        let result = f.engine.schedule(&id("nope"), None);
        assert!(matches!(result, Err(CadenceError::UnknownTask(_))));
    }

    #[tokio::test]
    async fn test_schedule_submits_request() {
        let mut f = fixture();
        f.engine
            .register(fixed("sync", Priority::Medium, 3600).with_network(), CountingBody::new(false));

        let before = Utc::now();
        f.engine.schedule(&id("sync"), Some(Duration::from_secs(120))).unwrap();
        let after = Utc::now();

        let submissions = f.os.submissions_for(&id("sync"));
        assert_eq!(submissions.len(), 1);
        let submit = &submissions[0];
        assert!(submit.requires_network);
        assert!(!submit.requires_external_power);
        assert!(submit.earliest_eligible >= before + TimeDelta::seconds(120));
        assert!(submit.earliest_eligible <= after + TimeDelta::seconds(120));
        assert!(f.engine.queue.is_empty());
        assert_eq!(f.engine.snapshot().state_of(&id("sync")), Some(TaskState::Scheduled));
    }

    #[tokio::test]
    async fn test_huge_delay_saturates() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 60), CountingBody::new(false));

        f.engine.schedule(&id("sync"), Some(Duration::MAX)).unwrap();
        f.engine
            .schedule(&id("sync"), Some(Duration::from_secs(10_000_000_000_000)))
            .unwrap();

        let submissions = f.os.submissions_for(&id("sync"));
        assert_eq!(submissions.len(), 2);
        for submit in submissions {
            assert_eq!(submit.earliest_eligible, DateTime::<Utc>::MAX_UTC);
        }
    }

    #[test]
    fn test_eligible_after() {
        let now = Utc::now();
        assert_eq!(eligible_after(now, Duration::from_secs(90)), now + TimeDelta::seconds(90));
        assert_eq!(eligible_after(now, Duration::ZERO), now);
        assert_eq!(eligible_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn test_session_dependent_delay() {
        let mut f = fixture();
        let analysis = TaskDescriptor::new("analysis", Priority::High, DelayPolicy::monitoring());
        f.engine.register(analysis.clone(), CountingBody::new(false));

        f.session.set_active(true);
        assert_eq!(f.engine.default_delay(&analysis), Duration::from_secs(300));
        f.session.set_active(false);
        assert_eq!(f.engine.default_delay(&analysis), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_delay_override_wins() {
        let mut config = GlobalConfig::default();
        config.tasks.delay_overrides.insert("sync".to_string(), 42);
        let f = fixture_with(config);
        let sync = fixed("sync", Priority::Medium, 3600);
        assert_eq!(f.engine.default_delay(&sync), Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_denied_request_stays_pending_until_power_recovers() {
        let mut f = fixture();
        f.engine.register(fixed("cleanup", Priority::Low, 600), CountingBody::new(false));
        f.power.set(0.15, false);

        f.engine.schedule(&id("cleanup"), None).unwrap();
        assert!(f.os.submissions().is_empty());
        assert!(f.engine.queue.contains(&id("cleanup")));
        assert_eq!(f.os.cancelled(), vec![id("cleanup")]);

        f.power.set(0.15, true);
        assert_eq!(f.engine.run_pass(), 1);
        assert!(f.engine.queue.is_empty());
        assert_eq!(f.os.submissions_for(&id("cleanup")).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_submission_stays_pending() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 60), CountingBody::new(false));
        f.os.set_reject(true);

        f.engine.schedule(&id("sync"), None).unwrap();
        assert!(f.engine.queue.contains(&id("sync")));

        f.os.set_reject(false);
        assert_eq!(f.engine.run_pass(), 1);
        assert!(f.engine.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pass_submits_in_priority_order() {
        let mut f = fixture();
        f.os.set_reject(true);
        f.engine.register(fixed("low", Priority::Low, 60), CountingBody::new(false));
        f.engine.register(fixed("critical", Priority::Critical, 60), CountingBody::new(false));
        f.engine.register(fixed("medium", Priority::Medium, 60), CountingBody::new(false));
        for name in ["low", "critical", "medium"] {
            f.engine.schedule(&id(name), None).unwrap();
        }

        f.os.set_reject(false);
        assert_eq!(f.engine.run_pass(), 3);
        let order: Vec<TaskId> = f.os.submissions().into_iter().map(|s| s.task_id).collect();
        assert_eq!(order, vec![id("critical"), id("medium"), id("low")]);
    }

    #[tokio::test]
    async fn test_fire_runs_body_and_reschedules() {
        let mut f = fixture();
        let body = CountingBody::new(false);
        f.engine.register(fixed("sync", Priority::Medium, 3600), body.clone());
        f.engine.schedule(&id("sync"), None).unwrap();

        let (event, mut fire) = FireEvent::new("sync");
        f.engine.handle_fire(event);
        assert_eq!(f.engine.snapshot().state_of(&id("sync")), Some(TaskState::Running));

        let finished = f.engine.finished_rx.recv().await.unwrap();
        f.engine.handle_finished(finished);

        assert_eq!(fire.completion().await, Some(true));
        assert_eq!(body.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.history.len(), 1);
        assert_eq!(f.engine.history.stats().successful_executions, 1);
        assert_eq!(f.engine.snapshot().state_of(&id("sync")), Some(TaskState::Scheduled));
        assert_eq!(f.os.submissions_for(&id("sync")).len(), 2);
        assert!(f.store.keys().contains(&STATS_KEY.to_string()));
    }

    #[tokio::test]
    async fn test_failed_body_records_failure() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 3600), CountingBody::new(true));

        let (event, mut fire) = FireEvent::new("sync");
        f.engine.handle_fire(event);
        let finished = f.engine.finished_rx.recv().await.unwrap();
        f.engine.handle_finished(finished);

        assert_eq!(fire.completion().await, Some(false));
        let record = f.engine.history.last_for(&id("sync")).cloned().unwrap();
        assert!(matches!(record.outcome, ExecutionOutcome::Failed(ref reason) if reason.contains("upload rejected")));
        assert!(f.engine.queue.is_empty());
        assert_eq!(f.os.submissions_for(&id("sync")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_body_expires_at_budget() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 3600), Arc::new(HangingBody));

        let (event, mut fire) = FireEvent::new("sync");
        let before = Utc::now();
        f.engine.handle_fire(event);
        let finished = f.engine.finished_rx.recv().await.unwrap();
        f.engine.handle_finished(finished);

        assert_eq!(fire.completion().await, Some(false));
        let record = f.engine.history.last_for(&id("sync")).cloned().unwrap();
        assert!(!record.success());
        assert!(record.expired());
        assert_eq!(record.duration, Duration::from_secs(25));
        assert_eq!(f.engine.snapshot().state_of(&id("sync")), Some(TaskState::Scheduled));

        let resubmitted = f.os.submissions_for(&id("sync"));
        assert_eq!(resubmitted.len(), 1);
        assert!(resubmitted[0].earliest_eligible >= before + TimeDelta::seconds(3600));
        assert_eq!(f.engine.history.stats().counters(&id("sync")).expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_expiration() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 3600), Arc::new(HangingBody));

        let (event, mut fire) = FireEvent::new("sync");
        f.engine.handle_fire(event);
        fire.expire();
        let finished = f.engine.finished_rx.recv().await.unwrap();
        f.engine.handle_finished(finished);

        assert_eq!(fire.completion().await, Some(false));
        let record = f.engine.history.last_for(&id("sync")).cloned().unwrap();
        assert!(record.expired());
        assert!(record.duration < Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_fire_while_running_is_rejected() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 3600), Arc::new(HangingBody));

        let (first, _first_fire) = FireEvent::new("sync");
        let (second, mut second_fire) = FireEvent::new("sync");
        f.engine.handle_fire(first);
        f.engine.handle_fire(second);

        assert_eq!(second_fire.completion().await, Some(false));
        assert_eq!(f.engine.contexts.active_count(), 1);
        assert_eq!(f.engine.snapshot().running, vec![id("sync")]);
    }

    #[tokio::test]
    async fn test_fire_for_unknown_task() {
        let mut f = fixture();
        let (event, mut fire) = FireEvent::new("ghost");
        f.engine.handle_fire(event);
        assert_eq!(fire.completion().await, Some(false));
        assert_eq!(f.engine.contexts.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_denied_completes_true_and_reschedules() {
        let mut f = fixture();
        let body = CountingBody::new(false);
        f.engine.register(fixed("cleanup", Priority::Low, 600), body.clone());
        f.power.set(0.1, false);

        let (event, mut fire) = FireEvent::new("cleanup");
        f.engine.handle_fire(event);

        assert_eq!(fire.completion().await, Some(true));
        assert_eq!(body.calls.load(Ordering::SeqCst), 0);
        assert!(f.engine.history.is_empty());
        assert!(f.engine.queue.contains(&id("cleanup")));
        assert_eq!(f.engine.snapshot().state_of(&id("cleanup")), Some(TaskState::Scheduled));
    }

    #[tokio::test]
    async fn test_fire_while_disabled_is_skipped() {
        let mut f = fixture();
        let body = CountingBody::new(false);
        f.engine.register(fixed("sync", Priority::Medium, 60), body.clone());
        f.engine.disable();

        let (event, mut fire) = FireEvent::new("sync");
        f.engine.handle_fire(event);

        assert_eq!(fire.completion().await, Some(true));
        assert_eq!(body.calls.load(Ordering::SeqCst), 0);
        assert!(f.engine.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_denies_extra_fires() {
        let mut config = GlobalConfig::default();
        config.engine.max_concurrent_tasks = Some(1);
        let mut f = fixture_with(config);
        f.engine.register(fixed("a", Priority::High, 60), Arc::new(HangingBody));
        f.engine.register(fixed("b", Priority::High, 60), Arc::new(HangingBody));

        let (a, _a_fire) = FireEvent::new("a");
        let (b, mut b_fire) = FireEvent::new("b");
        f.engine.handle_fire(a);
        f.engine.handle_fire(b);

        assert_eq!(b_fire.completion().await, Some(true));
        assert_eq!(f.engine.contexts.running_ids(), vec![id("a")]);
        assert_eq!(f.os.submissions_for(&id("b")).len(), 1);
    }

    #[tokio::test]
    async fn test_disable_enable_never_duplicates() {
        let mut f = fixture();
        f.os.set_reject(true);
        for (name, priority) in [("a", Priority::Critical), ("b", Priority::Medium), ("c", Priority::Low)] {
            f.engine.register(fixed(name, priority, 60), CountingBody::new(false));
        }
        f.engine.enable();
        assert_eq!(f.engine.queue.len(), 3);

        f.engine.disable();
        assert!(f.engine.queue.is_empty());
        assert_eq!(f.os.cancel_all_calls(), 1);
        assert_eq!(f.engine.snapshot().state_of(&id("a")), Some(TaskState::Idle));

        f.engine.enable();
        f.engine.enable();
        assert_eq!(f.engine.queue.len(), 3);
        let snapshot = f.engine.snapshot();
        assert_eq!(snapshot.pending.len(), 3);
        assert_eq!(snapshot.pending[0].task_id, id("a"));
    }

    #[tokio::test]
    async fn test_schedule_while_disabled_is_ignored() {
        let mut f = fixture();
        f.engine.register(fixed("sync", Priority::Medium, 60), CountingBody::new(false));
        f.engine.disable();

        f.engine.schedule(&id("sync"), None).unwrap();
        assert!(f.engine.queue.is_empty());
        assert!(f.os.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_anchor_is_persisted_and_restored() {
        let mut f = fixture();
        let anchor = Utc::now() - TimeDelta::hours(1);
        f.engine.set_quiet_anchor(anchor);
        assert_eq!(f.engine.snapshot().quiet_anchor, Some(anchor));

        let deps = EngineDeps {
            os: f.os.clone(),
            power: f.power.clone(),
            session: f.session.clone(),
            store: f.store.clone(),
        };
        let (restored, _handle) = Engine::new(&GlobalConfig::default(), deps).unwrap();
        assert_eq!(restored.planner.anchor(), Some(anchor));
    }

    #[tokio::test]
    async fn test_stats_restored_from_store() {
        let store = Arc::new(MemoryStore::new());
        let stats = Stats {
            total_executions: 4,
            successful_executions: 3,
            ..Default::default()
        };
        save_typed(store.as_ref(), STATS_KEY, &stats).unwrap();

        let deps = EngineDeps {
            os: Arc::new(MockOsScheduler::new()),
            power: Arc::new(FixedPowerMonitor::default()),
            session: Arc::new(SessionFlag::new(false)),
            store,
        };
        let (engine, _handle) = Engine::new(&GlobalConfig::default(), deps).unwrap();
        assert_eq!(engine.snapshot().success_rate, 0.75);
    }

    #[tokio::test]
    async fn test_corrupt_store_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        store.save(STATS_KEY, &serde_json::json!("garbage")).unwrap();

        let deps = EngineDeps {
            os: Arc::new(MockOsScheduler::new()),
            power: Arc::new(FixedPowerMonitor::default()),
            session: Arc::new(SessionFlag::new(false)),
            store,
        };
        let (engine, _handle) = Engine::new(&GlobalConfig::default(), deps).unwrap();
        assert_eq!(engine.snapshot().stats, Stats::default());
    }
}
