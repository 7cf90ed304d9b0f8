//! Cooperative task scheduler
//!
//! The scheduler never runs code itself. Tasks carry a payload `T` and
//! [`Scheduler::poll`] hands back the payloads that are due; the owner then
//! acts on them. This keeps timers free of references into the state they
//! act on: a payload is plain data (an id, a node number), so a task that
//! outlives its target simply finds nothing to do.
//!
//! Time is passed in explicitly so tests can drive it deterministically.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use skein_core::scheduler::{FirstRun, Scheduler};
//!
//! let start = Instant::now();
//! let mut scheduler = Scheduler::new();
//! let id = scheduler.schedule_repeating(Duration::from_secs(1), "sync", start, FirstRun::AfterInterval);
//!
//! assert!(scheduler.poll(start).is_empty());
//! assert_eq!(scheduler.poll(start + Duration::from_secs(1)), vec!["sync"]);
//!
//! scheduler.force_next_iteration(id, start + Duration::from_millis(1100));
//! assert_eq!(scheduler.poll(start + Duration::from_millis(1100)), vec!["sync"]);
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Identifier of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

/// How often a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Once,
    Forever,
}

/// When a repeating task runs for the first time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstRun {
    /// On the next poll
    Immediately,
    /// One interval from now
    AfterInterval,
}

#[derive(Debug)]
struct Task<T> {
    payload: T,
    interval: Duration,
    iterations: Iterations,
    next_run: Instant,
}

/// Cooperative scheduler of one-shot and repeating tasks
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: BTreeMap<TaskId, Task<T>>,
    next_id: u64,
}

impl<T: Clone> Scheduler<T> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, task: Task<T>) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(id, task);
        id
    }

    /// Run `payload` once, `delay` after `now`
    pub fn schedule_once(&mut self, delay: Duration, payload: T, now: Instant) -> TaskId {
        self.insert(Task {
            payload,
            interval: delay,
            iterations: Iterations::Once,
            next_run: now + delay,
        })
    }

    /// Run `payload` every `interval`
    pub fn schedule_repeating(
        &mut self,
        interval: Duration,
        payload: T,
        now: Instant,
        first_run: FirstRun,
    ) -> TaskId {
        let next_run = match first_run {
            FirstRun::Immediately => now,
            FirstRun::AfterInterval => now + interval,
        };
        self.insert(Task {
            payload,
            interval,
            iterations: Iterations::Forever,
            next_run,
        })
    }

    /// Push the next run of a task to `delay` after `now`
    ///
    /// Returns `false` if the task is no longer scheduled.
    pub fn delay(&mut self, id: TaskId, delay: Duration, now: Instant) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.next_run = now + delay;
                true
            }
            None => false,
        }
    }

    /// Make a task due on the next poll at or after `now`
    pub fn force_next_iteration(&mut self, id: TaskId, now: Instant) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.next_run = task.next_run.min(now);
                true
            }
            None => false,
        }
    }

    /// Remove a task; returns whether it was still scheduled
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Whether a task is still scheduled
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Next run of a task, if scheduled
    pub fn next_run(&self, id: TaskId) -> Option<Instant> {
        self.tasks.get(&id).map(|task| task.next_run)
    }

    /// Earliest deadline over all tasks
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.values().map(|task| task.next_run).min()
    }

    /// Number of scheduled tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is scheduled
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Collect every task due at `now`, in deadline order
    ///
    /// One-shot tasks are removed; repeating tasks are re-armed one interval
    /// after `now`. Tasks scheduled while the caller handles the returned
    /// payloads are only considered on the next poll.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        let mut due: Vec<(Instant, TaskId)> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.next_run <= now)
            .map(|(id, task)| (task.next_run, *id))
            .collect();
        due.sort();

        let mut payloads = Vec::with_capacity(due.len());
        for (_, id) in due {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            payloads.push(task.payload.clone());
            match task.iterations {
                Iterations::Once => {
                    self.tasks.remove(&id);
                }
                Iterations::Forever => {
                    task.next_run = now + task.interval;
                }
            }
        }
        payloads
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
