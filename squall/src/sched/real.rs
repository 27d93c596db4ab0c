use chrono::Utc;
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{DeadlineQueue, SchedError, Scheduler, Task, TaskFn, TaskHandle};
use crate::lock;

const DEFAULT_TASK_CAPACITY: usize = 1024;

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Wall-clock scheduler.  A timer thread watches the deadline queue
/// and hands due callbacks to a pool of worker threads over a channel.
/// Firing order across workers within one tick is unspecified; each
/// periodic task's own deadline sequence is monotone.
pub struct RealScheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    inner: Mutex<RealInner>,
    signal: Condvar,
}

struct RealInner {
    next_id: u64,
    tasks: HashMap<u64, Task>,
    queue: DeadlineQueue,
    capacity: usize,
    shutdown: bool,
}

impl RealScheduler {
    pub fn new(threads: usize) -> Self {
        Self::with_capacity(threads, DEFAULT_TASK_CAPACITY)
    }

    pub fn with_capacity(threads: usize, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(RealInner {
                next_id: 0,
                tasks: HashMap::new(),
                queue: DeadlineQueue::new(),
                capacity,
                shutdown: false,
            }),
            signal: Condvar::new(),
        });
        let (tx, rx) = channel::unbounded::<TaskFn>();
        let workers = (0..threads.max(1))
            .map(|_| {
                let rx: Receiver<TaskFn> = rx.clone();
                thread::spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })
            })
            .collect();
        let timer = {
            let shared = shared.clone();
            thread::spawn(move || Self::timer_loop(shared, tx))
        };
        RealScheduler {
            shared,
            timer: Mutex::new(Some(timer)),
            workers: Mutex::new(workers),
        }
    }

    fn timer_loop(shared: Arc<Shared>, jobs: Sender<TaskFn>) {
        let mut inner = lock(&shared.inner);
        loop {
            if inner.shutdown {
                break;
            }
            let now = unix_now();
            while inner.queue.pending(now) {
                let Some((id, deadline)) = inner.queue.pop() else {
                    break;
                };
                let info = inner
                    .tasks
                    .get(&id)
                    .map(|task| (task.task.clone(), task.interval, task.once));
                if let Some((f, interval, once)) = info {
                    if once {
                        inner.tasks.remove(&id);
                    } else {
                        inner.queue.push(id, deadline + interval);
                    }
                    if jobs.send(f).is_err() {
                        return;
                    }
                }
            }
            inner = match inner.queue.next_deadline() {
                Some(deadline) => {
                    let wait = Duration::from_secs(deadline.saturating_sub(now).max(1) as u64);
                    shared
                        .signal
                        .wait_timeout(inner, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => shared
                    .signal
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn add_task(&self, task: TaskFn, interval: i64, once: bool) -> Result<TaskHandle, SchedError> {
        let mut inner = lock(&self.shared.inner);
        if inner.shutdown {
            return Err(SchedError::ShutDown);
        }
        if inner.tasks.len() >= inner.capacity {
            return Err(SchedError::TasksExhausted(inner.capacity));
        }
        let interval = if once { interval.max(0) } else { interval.max(1) };
        let id = inner.next_id;
        inner.next_id += 1;
        inner.tasks.insert(
            id,
            Task {
                task,
                interval,
                once,
            },
        );
        inner.queue.push(id, unix_now() + interval);
        drop(inner);
        self.shared.signal.notify_all();

        let weak = Arc::downgrade(&self.shared);
        Ok(TaskHandle::new(move || {
            if let Some(shared) = weak.upgrade() {
                let mut inner = lock(&shared.inner);
                inner.tasks.remove(&id);
                inner.queue.remove(id);
                drop(inner);
                shared.signal.notify_all();
            }
        }))
    }
}

impl Scheduler for RealScheduler {
    fn add_periodic_task(&self, task: TaskFn, interval: i64) -> Result<TaskHandle, SchedError> {
        self.add_task(task, interval, false)
    }

    fn add_once_task(&self, task: TaskFn, delay: i64) -> Result<TaskHandle, SchedError> {
        self.add_task(task, delay, true)
    }

    fn unix_time(&self) -> i64 {
        unix_now()
    }

    fn set_time(&self, _t: i64) {
        error!("set_time is not supported by the real scheduler");
    }

    fn clear(&self) {
        let mut inner = lock(&self.shared.inner);
        inner.tasks.clear();
        inner.queue.clear();
        drop(inner);
        self.shared.signal.notify_all();
    }
}

impl Drop for RealScheduler {
    fn drop(&mut self) {
        lock(&self.shared.inner).shutdown = true;
        self.shared.signal.notify_all();
        if let Some(timer) = lock(&self.timer).take() {
            let _ = timer.join();
        }
        for worker in lock(&self.workers).drain(..) {
            let _ = worker.join();
        }
    }
}
