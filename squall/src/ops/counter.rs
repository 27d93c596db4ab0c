use derive_new::new;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;

#[derive(new)]
struct CounterOp {
    #[new(default)]
    count: Mutex<i64>,
}

impl Operator for CounterOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let increment = if event.has_metric() {
            event.metric_d() as i64
        } else {
            1
        };
        let total = {
            let mut count = lock(&self.count);
            *count += increment;
            *count
        };
        let mut next = event.clone();
        next.set_metric(total);
        out.send(next);
    }
}

/// Running counter: each event adds its integer-coerced metric (or 1
/// when it carries none) and is forwarded with the total as its
/// metric.
pub fn counter() -> Stream {
    Stream::from_op(CounterOp::new())
}
