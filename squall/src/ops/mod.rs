//! The stream operator library: per-event transforms and filters, and
//! the stateful window, rate and fan-out operators built on top of the
//! scheduler.

mod by;
mod changed;
mod coalesce;
mod counter;
mod ddt;
mod filter;
mod percentiles;
mod project;
mod rate;
mod stable;
mod throttle;
mod transform;
mod window;

pub use by::*;
pub use changed::*;
pub use coalesce::*;
pub use counter::*;
pub use ddt::*;
pub use filter::*;
pub use percentiles::*;
pub use project::*;
pub use rate::*;
pub use stable::*;
pub use throttle::*;
pub use transform::*;
pub use window::*;

use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Graph, Stream};
use crate::lock;
use crate::sched::Scheduler;

/// Boolean test over an event.
pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Consumer of an ordered batch of events; returns the event the
/// operator forwards downstream.
pub type EventsFn = Arc<dyn Fn(&[Event]) -> Event + Send + Sync>;

pub fn pred(f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Predicate {
    Arc::new(f)
}

pub fn events_fn(f: impl Fn(&[Event]) -> Event + Send + Sync + 'static) -> EventsFn {
    Arc::new(f)
}

/// A side branch owned by an operator (`where_else`, `split`).  Wired
/// into a graph of its own during the owner's init; events pushed into
/// it before that are dropped.
pub(crate) struct Branch(Mutex<BranchState>);

enum BranchState {
    Pending(Stream),
    Ready(Graph),
    Failed,
}

impl Branch {
    pub fn new(stream: Stream) -> Branch {
        Branch(Mutex::new(BranchState::Pending(stream)))
    }

    pub fn init(&self, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        let mut state = lock(&self.0);
        match std::mem::replace(&mut *state, BranchState::Failed) {
            BranchState::Pending(stream) => {
                *state = BranchState::Ready(Graph::new(stream, sched.clone())?);
            }
            other => *state = other,
        }
        Ok(())
    }

    pub fn push(&self, event: &Event) {
        let graph = match &*lock(&self.0) {
            BranchState::Ready(graph) => graph.clone(),
            _ => return,
        };
        graph.push_event(event);
    }
}

/// The scheduler reference an operator picks up at init time.
#[derive(Default)]
pub(crate) struct ClockSlot(Mutex<Option<Arc<dyn Scheduler>>>);

impl ClockSlot {
    pub fn bind(&self, sched: &Arc<dyn Scheduler>) {
        *lock(&self.0) = Some(sched.clone());
    }

    pub fn now(&self) -> i64 {
        lock(&self.0).as_ref().map(|s| s.unix_time()).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) fn test_sink() -> (Stream, Arc<Mutex<Vec<Event>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let stream = crate::graph::sink(move |event| captured.lock().unwrap().push(event.clone()));
    (stream, seen)
}

/// Batch consumer that snapshots each batch it is handed, in the style
/// of a sink.
#[cfg(test)]
pub(crate) fn batch_sink() -> (EventsFn, Arc<Mutex<Vec<Event>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let f = events_fn(move |events| {
        *captured.lock().unwrap() = events.to_vec();
        Event::default()
    });
    (f, seen)
}

#[cfg(test)]
pub(crate) fn mock_graph(stream: Stream) -> (Graph, Arc<crate::sched::MockScheduler>) {
    let sched = Arc::new(crate::sched::MockScheduler::new());
    let graph = Graph::new(stream, sched.clone()).unwrap();
    (graph, sched)
}
