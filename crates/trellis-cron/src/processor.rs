//! The time-wheel processor.
//!
//! A [`Processor`] keeps every scheduled task instance in one slot of a
//! fixed circular wheel. A single loop advances the wheel once per `span`;
//! tasks found in the new slot either spend one revolution or, when due, are
//! evicted, re-armed for their next occurrence and handed to the dispatch
//! engine on their own tokio task.
//!
//! # Placement
//!
//! A task due `delay` from now is placed `ticks` slots ahead of the current
//! index, where `ticks` is the number of future ticks that must pass before
//! the due time is reached (at least one). The task then waits
//! `(ticks - 1) / length` extra revolutions. Time already elapsed since the
//! last tick counts towards the delay, so a task never fires before it is
//! due and at most one `span` late.
//!
//! # Concurrency
//!
//! Slot membership and the current index live behind one mutex shared by
//! `add`, `remove` and the tick step. Task execution happens outside it, and
//! a recurring task is re-armed before its current run starts, so a run that
//! outlasts the task's period overlaps with the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use trellis_core::{BoxedRequest, Engine, Services};
use uuid::Uuid;

use crate::error::{CronError, CronResult, TaskFailure};
use crate::task::{CronTask, Task};

/// Real time represented by one slot.
pub const DEFAULT_SPAN: Duration = Duration::from_secs(1);

/// Number of slots; with the default span one revolution is a minute.
pub const DEFAULT_LENGTH: usize = 60;

/// Lifecycle state of a [`Processor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Running,
    Paused,
    Closed,
}

/// The instant a placement is computed from.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Anchor {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

struct Wheel {
    slots: Vec<HashMap<Uuid, Arc<CronTask>>>,
    index: usize,
    last_tick: Instant,
}

struct Inner {
    engine: Engine,
    services: Services,
    span: Duration,
    length: usize,
    wheel: Mutex<Wheel>,
    paused: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
}

/// Recurring job scheduler built on the dispatch engine.
///
/// Cloning is cheap; clones drive the same wheel.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    /// Creates a processor with the default one-second, sixty-slot wheel.
    pub fn new(engine: Engine, services: Services) -> Self {
        Self::build(engine, services, DEFAULT_SPAN, DEFAULT_LENGTH)
    }

    /// Creates a processor with a custom wheel.
    pub fn with_wheel(
        engine: Engine,
        services: Services,
        span: Duration,
        length: usize,
    ) -> CronResult<Self> {
        if span.is_zero() || length == 0 {
            return Err(CronError::InvalidWheel);
        }
        Ok(Self::build(engine, services, span, length))
    }

    fn build(engine: Engine, services: Services, span: Duration, length: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                services,
                span,
                length,
                wheel: Mutex::new(Wheel {
                    slots: (0..length).map(|_| HashMap::new()).collect(),
                    index: 0,
                    last_tick: Instant::now(),
                }),
                paused: AtomicBool::new(false),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The engine tasks are dispatched through.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn span(&self) -> Duration {
        self.inner.span
    }

    pub fn length(&self) -> usize {
        self.inner.length
    }

    pub fn state(&self) -> ProcessorState {
        if self.is_closed() {
            ProcessorState::Closed
        } else if self.inner.paused.load(Ordering::Acquire) {
            ProcessorState::Paused
        } else {
            ProcessorState::Running
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Schedules `tasks`.
    ///
    /// Each task's service gets a route unless the engine already matches it.
    /// A task that fails (bad schedule, unknown service) is reported in
    /// [`CronError::Rejected`] without affecting the others. Disabled tasks
    /// are skipped. Once the processor is closed this accepts and drops
    /// everything.
    pub fn add<I>(&self, tasks: I) -> CronResult<()>
    where
        I: IntoIterator<Item = Task>,
    {
        if self.is_closed() {
            debug!("Processor closed, ignoring added tasks");
            return Ok(());
        }

        let failures: Vec<TaskFailure> = tasks
            .into_iter()
            .filter(|task| {
                if task.disable {
                    debug!(task = task.name(), "Skipping disabled task");
                }
                !task.disable
            })
            .filter_map(|task| {
                let name = task.name().to_string();
                self.add_one(task).err().map(|error| {
                    warn!(task = %name, error = %error, "Task rejected");
                    TaskFailure {
                        task: name,
                        error: Box::new(error),
                    }
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CronError::Rejected(failures))
        }
    }

    /// Validates `tasks` as [`add`](Self::add) would, without scheduling
    /// them or registering routes.
    ///
    /// Disabled tasks are skipped. Failures are reported together in
    /// [`CronError::Rejected`].
    pub fn check<'a, I>(&self, tasks: I) -> CronResult<()>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let now = Utc::now();
        let failures: Vec<TaskFailure> = tasks
            .into_iter()
            .filter(|task| !task.disable)
            .filter_map(|task| {
                self.check_one(task, now).err().map(|error| TaskFailure {
                    task: task.name().to_string(),
                    error: Box::new(error),
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CronError::Rejected(failures))
        }
    }

    fn check_one(&self, task: &Task, now: DateTime<Utc>) -> CronResult<()> {
        let instance = CronTask::new(task.clone())?;
        if instance.schedule().next_after(now).is_none() {
            return Err(CronError::InvalidSchedule {
                task: task.name().to_string(),
                expr: task.cron.clone(),
                reason: "no future fire time".to_string(),
            });
        }
        if !self.inner.engine.find(&task.service) {
            self.inner.services.get(&task.service)?;
        }
        Ok(())
    }

    fn add_one(&self, task: Task) -> CronResult<()> {
        let task = Arc::new(CronTask::new(task)?);
        self.ensure_route(&task)?;

        let mut wheel = self.inner.wheel.lock();
        if self.is_closed() {
            return Ok(());
        }
        let (offset, round) = self.place(&mut wheel, Arc::clone(&task), Anchor::now())?;
        debug!(task = task.task().name(), offset, round, "Task scheduled");
        Ok(())
    }

    fn ensure_route(&self, task: &CronTask) -> CronResult<()> {
        let spec = task.task();
        if self.inner.engine.find(&spec.service) {
            return Ok(());
        }
        let handler = self.inner.services.get(&spec.service)?;
        self.inner.engine.handle(&spec.method, spec.service.clone(), handler)?;
        debug!(service = %spec.service, method = %spec.method, "Registered task route");
        Ok(())
    }

    /// Computes the task's next slot and inserts it. Returns `(offset, round)`.
    fn place(
        &self,
        wheel: &mut Wheel,
        task: Arc<CronTask>,
        anchor: Anchor,
    ) -> CronResult<(usize, u64)> {
        let invalid = |reason: &str| CronError::InvalidSchedule {
            task: task.task().name().to_string(),
            expr: task.task().cron.clone(),
            reason: reason.to_string(),
        };

        let next = task
            .schedule()
            .next_after(anchor.wall)
            .ok_or_else(|| invalid("no future fire time"))?;
        let delay = (next - anchor.wall)
            .to_std()
            .map_err(|_| invalid("next fire time is in the past"))?;
        if delay.is_zero() {
            return Err(invalid("next fire time is not in the future"));
        }

        let lead = anchor
            .at
            .saturating_duration_since(wheel.last_tick)
            .min(self.inner.span);
        let ticks = (lead + delay).as_nanos().div_ceil(self.inner.span.as_nanos()).max(1);
        let ticks = u64::try_from(ticks)
            .map_err(|_| CronError::Internal(format!("delay {delay:?} overflows the wheel")))?;

        let length = self.inner.length as u64;
        let round = (ticks - 1) / length;
        let offset = (wheel.index + (ticks % length) as usize) % self.inner.length;

        task.set_round(round);
        wheel.slots[offset].insert(Uuid::new_v4(), task);
        Ok((offset, round))
    }

    /// Removes every task instance named `name` and disables it.
    ///
    /// Returns the number of instances removed.
    pub fn remove(&self, name: &str) -> usize {
        let mut wheel = self.inner.wheel.lock();

        let matched: Vec<(usize, Uuid)> = wheel
            .slots
            .iter()
            .enumerate()
            .flat_map(|(slot, tasks)| {
                tasks
                    .iter()
                    .filter(|(_, task)| task.task().name() == name)
                    .map(move |(id, _)| (slot, *id))
            })
            .collect();

        for (slot, id) in &matched {
            if let Some(task) = wheel.slots[*slot].remove(id) {
                task.disable();
            }
        }

        if !matched.is_empty() {
            debug!(task = name, removed = matched.len(), "Task removed");
        }
        matched.len()
    }

    /// Stops invoking task handlers. The wheel keeps turning and tasks keep
    /// being re-armed.
    pub fn pause(&self) -> CronResult<()> {
        if self.is_closed() {
            return Err(CronError::Closed);
        }
        self.inner.paused.store(true, Ordering::Release);
        info!("Processor paused");
        Ok(())
    }

    pub fn resume(&self) -> CronResult<()> {
        if self.is_closed() {
            return Err(CronError::Closed);
        }
        self.inner.paused.store(false, Ordering::Release);
        info!("Processor resumed");
        Ok(())
    }

    /// Stops the tick loop. Idempotent; in-flight executions are not
    /// cancelled.
    pub fn close(&self) {
        let _wheel = self.inner.wheel.lock();
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            info!("Processor closed");
        }
    }

    /// Returns `true` if an instance named `name` is in the wheel.
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .wheel
            .lock()
            .slots
            .iter()
            .flat_map(HashMap::values)
            .any(|task| task.task().name() == name)
    }

    /// Number of task instances in the wheel.
    pub fn len(&self) -> usize {
        self.inner.wheel.lock().slots.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the task instances in the wheel.
    pub fn tasks(&self) -> Vec<Arc<CronTask>> {
        self.inner
            .wheel
            .lock()
            .slots
            .iter()
            .flat_map(HashMap::values)
            .cloned()
            .collect()
    }

    /// Spawns the tick loop.
    pub fn start(&self) -> JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move { processor.run().await })
    }

    /// Runs the tick loop until [`close`](Self::close) is called.
    ///
    /// Only the first call drives the wheel; later calls return immediately.
    pub async fn run(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!("Tick loop already running");
            return;
        }

        let span = self.inner.span;
        let start = Instant::now();
        self.inner.wheel.lock().last_tick = start;

        let mut ticker = tokio::time::interval_at(start + span, span);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(span = ?span, length = self.inner.length, "Time wheel started");

        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for task in self.tick() {
                        tokio::spawn(self.clone().execute(task));
                    }
                }
            }
        }

        info!("Time wheel stopped");
    }

    /// Advances the wheel one slot and returns the tasks that fell due.
    ///
    /// Due tasks are re-armed before they are returned.
    fn tick(&self) -> Vec<Arc<CronTask>> {
        let anchor = Anchor::now();
        let mut wheel = self.inner.wheel.lock();
        wheel.index = (wheel.index + 1) % self.inner.length;
        wheel.last_tick = anchor.at;

        let index = wheel.index;
        let slot = &mut wheel.slots[index];
        let mut due_ids = Vec::new();
        for (id, task) in slot.iter() {
            if task.is_disabled() || !task.spend_round() {
                due_ids.push(*id);
            }
        }
        let due: Vec<Arc<CronTask>> = due_ids.iter().filter_map(|id| slot.remove(id)).collect();

        let mut fired = Vec::with_capacity(due.len());
        for task in due {
            if task.is_disabled() {
                continue;
            }
            if let Err(err) = self.place(&mut wheel, Arc::clone(&task), anchor) {
                warn!(task = task.task().name(), error = %err, "Task could not be re-armed");
            }
            fired.push(task);
        }
        trace!(index, fired = fired.len(), "Wheel advanced");
        fired
    }

    async fn execute(self, task: Arc<CronTask>) {
        if task.is_disabled() || self.is_closed() {
            return;
        }
        if self.inner.paused.load(Ordering::Acquire) {
            trace!(task = task.task().name(), "Processor paused, skipping run");
            return;
        }

        let executed = task.mark_executed();
        let name = task.task().name().to_string();
        let request: BoxedRequest = task;
        match self.inner.engine.handle_request(request).await {
            Ok(response) => {
                debug!(task = %name, executed, status = response.status(), "Task executed");
            }
            Err(err) => {
                warn!(task = %name, executed, error = %err, "Task failed");
            }
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("span", &self.inner.span)
            .field("length", &self.inner.length)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use trellis_core::{BoxedHandler, DispatchError, ServiceError, handler_fn};

    fn counting(count: &Arc<AtomicUsize>) -> BoxedHandler {
        let count = Arc::clone(count);
        handler_fn(move |_req| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(())
            }
        })
    }

    fn processor(services: Services) -> Processor {
        Processor::with_wheel(Engine::new(), services, Duration::from_secs(1), 60).unwrap()
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[test]
    fn zero_sized_wheel_is_rejected() {
        let err = Processor::with_wheel(Engine::new(), Services::new(), Duration::ZERO, 60);
        assert!(matches!(err, Err(CronError::InvalidWheel)));
        let err = Processor::with_wheel(Engine::new(), Services::new(), DEFAULT_SPAN, 0);
        assert!(matches!(err, Err(CronError::InvalidWheel)));
    }

    #[tokio::test(start_paused = true)]
    async fn add_registers_route_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/sync", counting(&count)));

        p.add([
            Task::new("/sync", "@every 1s").with_name("a"),
            Task::new("/sync", "@every 2s").with_name("b"),
        ])
        .unwrap();

        assert!(p.engine().find("/sync"));
        assert_eq!(p.engine().route_count(), 1);
        assert_eq!(p.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn placement_uses_rounds_for_long_delays() {
        let p = processor(Services::new().with("/report", counting(&Arc::new(AtomicUsize::new(0)))));
        p.add([Task::new("/report", "@every 90s")]).unwrap();

        let wheel = p.inner.wheel.lock();
        let task = wheel.slots[30].values().next().expect("task in slot 30");
        assert_eq!(task.round(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_fires_early() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/report", counting(&count)));
        p.add([Task::new("/report", "@every 90s")]).unwrap();
        let _loop = p.start();

        advance(89.5).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        advance(1.0).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn task_fires_every_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/tick", counting(&count)));
        p.add([Task::new("/tick", "@every 1s")]).unwrap();
        let _loop = p.start();

        advance(0.5).await;
        let mut last = 0;
        for _ in 0..5 {
            advance(1.0).await;
            let executed = p.tasks()[0].executed();
            assert!(executed > last, "counter must increase on every fire");
            last = executed;
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_invocations_but_keeps_task_armed() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/tick", counting(&count)));
        p.add([Task::new("/tick", "@every 1s")]).unwrap();
        let _loop = p.start();

        advance(2.5).await;
        p.pause().unwrap();
        assert_eq!(p.state(), ProcessorState::Paused);
        let before = count.load(Ordering::SeqCst);
        assert!(before >= 2);

        advance(3.5).await;
        assert_eq!(count.load(Ordering::SeqCst), before);
        assert!(p.contains("/tick"));

        p.resume().unwrap();
        advance(1.5).await;
        assert!(count.load(Ordering::SeqCst) > before);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_overlap_with_next_occurrence() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let slow = handler_fn(move |_req| {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ServiceError>(())
            }
        });
        let p = processor(Services::new().with("/slow", slow));
        p.add([Task::new("/slow", "@every 1s")]).unwrap();
        let _loop = p.start();

        advance(1.5).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(p.contains("/slow"));

        advance(2.0).await;
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_only_touches_named_tasks() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/sync", counting(&count)));
        p.add([
            Task::new("/sync", "@every 1s").with_name("a"),
            Task::new("/sync", "@every 1s").with_name("b"),
        ])
        .unwrap();
        let removed: Vec<_> = p.tasks().into_iter().filter(|t| t.task().name() == "a").collect();

        assert_eq!(p.remove("a"), 1);
        assert_eq!(p.remove("a"), 0);
        assert!(!p.contains("a"));
        assert!(p.contains("b"));
        assert!(removed[0].is_disabled());
        assert!(p.tasks().iter().all(|t| !t.is_disabled()));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_task_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/sync", counting(&count)));

        let err = p
            .add([
                Task::new("/sync", "@every 1s"),
                Task::new("/sync", "not a cron").with_name("broken"),
                Task::new("/missing", "@every 1s"),
                Task::new("/sync", "@every 9999999999999999h").with_name("huge"),
                Task::new("/sync", "@every 18446744073709551615s1s").with_name("sum"),
            ])
            .unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 4);
        assert_eq!(failures[0].task, "broken");
        assert!(matches!(*failures[0].error, CronError::InvalidSchedule { .. }));
        assert!(matches!(
            *failures[1].error,
            CronError::Dispatch(DispatchError::UnknownService(_))
        ));
        assert_eq!(failures[2].task, "huge");
        assert!(matches!(*failures[2].error, CronError::InvalidSchedule { .. }));
        assert_eq!(failures[3].task, "sum");
        assert!(matches!(*failures[3].error, CronError::InvalidSchedule { .. }));
        assert!(p.contains("/sync"));
        assert_eq!(p.len(), 1);
    }

    #[tokio::test]
    async fn check_reports_without_scheduling() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/sync", counting(&count)));

        let mut off = Task::new("/sync", "not a cron").with_name("off");
        off.disable = true;
        let tasks = [
            Task::new("/sync", "@every 1s").with_name("ok"),
            Task::new("/sync", "@every 9999999999999999h").with_name("huge"),
            Task::new("/missing", "@every 1s").with_name("orphan"),
            off,
        ];
        let err = p.check(&tasks).unwrap_err();
        let names: Vec<_> = err.failures().iter().map(|f| f.task.as_str()).collect();
        assert_eq!(names, ["huge", "orphan"]);

        p.check(&tasks[..1]).unwrap();
        assert!(p.is_empty());
        assert!(!p.engine().find("/sync"));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_tasks_are_skipped() {
        let p = processor(Services::new().with("/sync", counting(&Arc::new(AtomicUsize::new(0)))));
        let mut task = Task::new("/sync", "@every 1s");
        task.disable = true;
        p.add([task]).unwrap();
        assert!(p.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_final() {
        let count = Arc::new(AtomicUsize::new(0));
        let p = processor(Services::new().with("/tick", counting(&count)));
        let handle = p.start();
        advance(1.5).await;

        p.close();
        p.close();
        handle.await.unwrap();

        assert_eq!(p.state(), ProcessorState::Closed);
        assert!(p.add([Task::new("/tick", "@every 1s")]).is_ok());
        assert!(p.is_empty());
        assert!(matches!(p.pause(), Err(CronError::Closed)));
        assert!(matches!(p.resume(), Err(CronError::Closed)));
    }
}
