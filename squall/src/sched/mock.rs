use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{DeadlineQueue, SchedError, Scheduler, Task, TaskFn, TaskHandle};
use crate::lock;

/// Deterministic virtual clock for tests.  Time starts at zero and
/// only moves when [Scheduler::set_time] is called; every due task
/// fires synchronously inside that call, in deadline order with ties
/// broken by registration order.
#[derive(Default)]
pub struct MockScheduler {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    now: i64,
    next_id: u64,
    tasks: HashMap<u64, Task>,
    queue: DeadlineQueue,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_task(&self, task: TaskFn, interval: i64, once: bool) -> TaskHandle {
        let interval = if once { interval.max(0) } else { interval.max(1) };
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        let deadline = inner.now + interval;
        inner.tasks.insert(
            id,
            Task {
                task,
                interval,
                once,
            },
        );
        inner.queue.push(id, deadline);

        let weak = Arc::downgrade(&self.inner);
        TaskHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock(&inner);
                inner.tasks.remove(&id);
                inner.queue.remove(id);
            }
        })
    }
}

impl Scheduler for MockScheduler {
    fn add_periodic_task(&self, task: TaskFn, interval: i64) -> Result<TaskHandle, SchedError> {
        Ok(self.add_task(task, interval, false))
    }

    fn add_once_task(&self, task: TaskFn, delay: i64) -> Result<TaskHandle, SchedError> {
        Ok(self.add_task(task, delay, true))
    }

    fn unix_time(&self) -> i64 {
        lock(&self.inner).now
    }

    fn set_time(&self, t: i64) {
        loop {
            // Pop one due task per pass; the callback runs with the
            // registry unlocked so it may push events or register
            // further tasks.
            let job = {
                let mut inner = lock(&self.inner);
                if !inner.queue.pending(t) {
                    inner.now = t;
                    break;
                }
                let Some((id, deadline)) = inner.queue.pop() else {
                    inner.now = t;
                    break;
                };
                inner.now = deadline;
                let info = inner
                    .tasks
                    .get(&id)
                    .map(|task| (task.task.clone(), task.interval, task.once));
                match info {
                    Some((f, interval, once)) => {
                        if once {
                            inner.tasks.remove(&id);
                        } else {
                            inner.queue.push(id, deadline + interval);
                        }
                        Some(f)
                    }
                    // cancelled since it was queued
                    None => None,
                }
            };
            if let Some(f) = job {
                f();
            }
        }
    }

    fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.tasks.clear();
        inner.queue.clear();
    }
}
