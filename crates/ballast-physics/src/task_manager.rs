//! Work scheduled onto the physics thread.
//!
//! One-shot tasks are drained each tick under a count cap and a wall-clock
//! budget; whatever is left runs on a later tick. Recurring tasks run every
//! tick by priority. Only [`TaskPriority::Background`] tasks can be skipped
//! when the recurring budget runs out, and they rotate so every background
//! task eventually runs. A panicking task is logged and the rest still run.
//!
//! Any thread can schedule through a cloned [`TaskSender`]; the
//! [`TaskManager`] itself lives on the physics thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::error;

use ballast_config::TaskBudgetConfig;

/// Runs once on the physics thread.
pub type OneShotTask<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// Runs every tick on the physics thread until removed.
pub type TickTask<C> = Box<dyn FnMut(&mut C) + Send + 'static>;

/// Handle for removing a recurring task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Recurring task class. Lower classes run first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Always runs, before everything else.
    Critical,
    /// Always runs.
    Normal,
    /// Runs while the recurring budget lasts.
    Background,
}

impl TaskPriority {
    /// All classes in execution order.
    pub const ALL: [TaskPriority; 3] = [
        TaskPriority::Critical,
        TaskPriority::Normal,
        TaskPriority::Background,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

const MIN_BUDGET: Duration = Duration::from_micros(100);

enum Registration<C> {
    Add(TaskId, TaskPriority, TickTask<C>),
    Remove(TaskId),
}

/// Per-tick task statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskMetrics {
    /// One-shot tasks run this tick.
    pub one_shot_executed: usize,
    /// One-shot tasks left for later ticks.
    pub one_shot_deferred: usize,
    /// Tasks that panicked this tick.
    pub failed: usize,
    /// Time spent on one-shot tasks.
    pub one_shot_time: Duration,
    /// Time spent on recurring tasks.
    pub recurring_time: Duration,
    /// Recurring time by [`TaskPriority`].
    pub recurring_time_by_priority: [Duration; 3],
    /// Recurring tasks skipped by [`TaskPriority`].
    pub skipped_by_priority: [usize; 3],
    /// Registered recurring tasks.
    pub recurring_count: usize,
}

impl TaskMetrics {
    /// Recurring time spent in one class.
    pub fn recurring_time(&self, priority: TaskPriority) -> Duration {
        self.recurring_time_by_priority[priority.index()]
    }

    /// Recurring tasks skipped in one class.
    pub fn skipped(&self, priority: TaskPriority) -> usize {
        self.skipped_by_priority[priority.index()]
    }
}

/// Schedules work onto a [`TaskManager`] from any thread.
pub struct TaskSender<C> {
    one_shots: Sender<OneShotTask<C>>,
    registrations: Sender<Registration<C>>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for TaskSender<C> {
    fn clone(&self) -> Self {
        Self {
            one_shots: self.one_shots.clone(),
            registrations: self.registrations.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<C> TaskSender<C> {
    /// Queues a one-shot task. Returns `false` once the manager is gone.
    pub fn schedule(&self, task: impl FnOnce(&mut C) + Send + 'static) -> bool {
        self.one_shots.send(Box::new(task)).is_ok()
    }

    /// Registers a recurring task. It starts running on the next tick.
    pub fn add_tick_task(
        &self,
        priority: TaskPriority,
        task: impl FnMut(&mut C) + Send + 'static,
    ) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _ = self
            .registrations
            .send(Registration::Add(id, priority, Box::new(task)));
        id
    }

    /// Removes a recurring task. Unknown ids are ignored.
    pub fn remove_tick_task(&self, id: TaskId) {
        let _ = self.registrations.send(Registration::Remove(id));
    }

    /// One-shot tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.one_shots.len()
    }
}

struct TaskGroup<C> {
    tasks: Vec<(TaskId, TickTask<C>)>,
    cursor: usize,
}

impl<C> Default for TaskGroup<C> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            cursor: 0,
        }
    }
}

/// Runs scheduled work against a context `C` once per tick.
pub struct TaskManager<C> {
    one_shots: Receiver<OneShotTask<C>>,
    registrations: Receiver<Registration<C>>,
    sender: TaskSender<C>,
    groups: [TaskGroup<C>; 3],
    max_one_shot: usize,
    one_shot_budget: Duration,
    recurring_budget: Duration,
}

impl<C> TaskManager<C> {
    /// Creates a manager with the given budgets.
    pub fn new(config: &TaskBudgetConfig) -> Self {
        let (one_shot_tx, one_shot_rx) = unbounded();
        let (registration_tx, registration_rx) = unbounded();
        let mut manager = Self {
            one_shots: one_shot_rx,
            registrations: registration_rx,
            sender: TaskSender {
                one_shots: one_shot_tx,
                registrations: registration_tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            groups: Default::default(),
            max_one_shot: 1,
            one_shot_budget: MIN_BUDGET,
            recurring_budget: MIN_BUDGET,
        };
        manager.update_limits(config);
        manager
    }

    /// Applies new budgets (after a config reload).
    pub fn update_limits(&mut self, config: &TaskBudgetConfig) {
        self.max_one_shot = config.max_one_shot_per_tick.max(1);
        self.one_shot_budget = config.one_shot_budget().max(MIN_BUDGET);
        self.recurring_budget = config.recurring_budget().max(MIN_BUDGET);
    }

    /// A sender for scheduling onto this manager.
    pub fn sender(&self) -> TaskSender<C> {
        self.sender.clone()
    }

    /// Registered recurring tasks (after applying queued registrations).
    pub fn recurring_count(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    fn apply_registrations(&mut self) {
        while let Ok(registration) = self.registrations.try_recv() {
            match registration {
                Registration::Add(id, priority, task) => {
                    self.groups[priority.index()].tasks.push((id, task));
                }
                Registration::Remove(id) => {
                    for group in &mut self.groups {
                        if let Some(at) = group.tasks.iter().position(|(t, _)| *t == id) {
                            let (_, removed) = group.tasks.remove(at);
                            drop(removed);
                            if at < group.cursor {
                                group.cursor -= 1;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Runs due one-shot tasks, then every recurring task.
    pub fn run_all(&mut self, ctx: &mut C) -> TaskMetrics {
        let mut metrics = TaskMetrics::default();

        let start = Instant::now();
        while metrics.one_shot_executed < self.max_one_shot {
            let Ok(task) = self.one_shots.try_recv() else {
                break;
            };
            if catch_unwind(AssertUnwindSafe(|| task(ctx))).is_err() {
                metrics.failed += 1;
                error!("one-shot physics task panicked");
            }
            metrics.one_shot_executed += 1;
            if start.elapsed() >= self.one_shot_budget {
                break;
            }
        }
        metrics.one_shot_time = start.elapsed();
        metrics.one_shot_deferred = self.one_shots.len();

        self.apply_registrations();
        let recurring_start = Instant::now();
        for priority in TaskPriority::ALL {
            self.run_group(priority, ctx, recurring_start, &mut metrics);
        }
        metrics.recurring_time = recurring_start.elapsed();
        metrics.recurring_count = self.recurring_count();
        metrics
    }

    fn run_group(
        &mut self,
        priority: TaskPriority,
        ctx: &mut C,
        recurring_start: Instant,
        metrics: &mut TaskMetrics,
    ) {
        let budgeted = priority == TaskPriority::Background;
        let budget = self.recurring_budget;
        let group = &mut self.groups[priority.index()];
        let size = group.tasks.len();
        if size == 0 {
            return;
        }

        let first = group.cursor % size;
        let mut executed = 0;
        for i in 0..size {
            if budgeted && recurring_start.elapsed() >= budget {
                metrics.skipped_by_priority[priority.index()] += size - executed;
                break;
            }
            let (id, task) = &mut group.tasks[(first + i) % size];
            let task_start = Instant::now();
            if catch_unwind(AssertUnwindSafe(|| task(ctx))).is_err() {
                metrics.failed += 1;
                error!(task = id.0, ?priority, "recurring physics task panicked");
            }
            metrics.recurring_time_by_priority[priority.index()] += task_start.elapsed();
            executed += 1;
        }

        group.cursor = if budgeted {
            (group.cursor + executed) % size
        } else {
            0
        };
    }
}
