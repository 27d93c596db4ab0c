use derive_new::new;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;
use crate::sched::{Scheduler, TaskHandle};

#[derive(new)]
struct RateOp {
    dt: i64,
    #[new(default)]
    state: Arc<Mutex<RateState>>,
    #[new(default)]
    handle: Mutex<Option<TaskHandle>>,
}

#[derive(Default)]
struct RateState {
    sum: f64,
    template: Event,
}

impl Operator for RateOp {
    fn on_event(&self, event: &Event, _out: &Output) {
        let mut state = lock(&self.state);
        state.sum += event.metric_d();
        state.template = event.clone();
    }

    fn init(&self, out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        let state = self.state.clone();
        let dt = self.dt;
        let task = Arc::new(move || {
            let (sum, mut next) = {
                let mut state = lock(&state);
                let sum = state.sum;
                state.sum = 0.0;
                (sum, state.template.clone())
            };
            next.set_metric(sum / dt as f64);
            out.send(next);
        });
        *lock(&self.handle) = Some(sched.add_periodic_task(task, self.dt)?);
        Ok(())
    }
}

/// Convert the metric sum over each `dt`-second interval into a
/// per-second rate, emitted on the scheduler's tick.  Quiet intervals
/// emit a zero rate.
pub fn rate(dt: i64) -> Stream {
    Stream::from_op(RateOp::new(dt.max(1)))
}
