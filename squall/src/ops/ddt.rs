use derive_new::new;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;

#[derive(new)]
struct DdtOp {
    #[new(default)]
    prev: Mutex<Option<Event>>,
}

impl Operator for DdtOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let derived = {
            let mut prev = lock(&self.prev);
            let derived = prev.as_ref().and_then(|p| {
                let dt = event.time() - p.time();
                if dt > 0 {
                    let mut next = event.clone();
                    next.set_metric((event.metric_d() - p.metric_d()) / dt as f64);
                    Some(next)
                } else {
                    None
                }
            });
            // the previous sample advances even when nothing is emitted
            *prev = Some(event.clone());
            derived
        };
        if let Some(next) = derived {
            out.send(next);
        }
    }
}

/// Differentiate the metric with respect to event time.  The first
/// event only primes the operator; later events emit
/// `(m - m_prev) / (t - t_prev)` and are suppressed when no time has
/// passed.
pub fn ddt() -> Stream {
    Stream::from_op(DdtOp::new())
}
