use derive_new::new;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;

#[derive(new)]
struct ThrottleOp {
    n: usize,
    dt: i64,
    #[new(default)]
    admitted: Mutex<VecDeque<i64>>,
}

impl Operator for ThrottleOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let now = event.time();
        let admit = {
            let mut admitted = lock(&self.admitted);
            while let Some(&oldest) = admitted.front() {
                if oldest + self.dt <= now {
                    admitted.pop_front();
                } else {
                    break;
                }
            }
            if admitted.len() < self.n {
                admitted.push_back(now);
                true
            } else {
                false
            }
        };
        if admit {
            out.send(event.clone());
        }
    }
}

/// Admit at most `n` events per rolling window of `dt` seconds of
/// event time; drop the rest.
pub fn throttle(n: usize, dt: i64) -> Stream {
    Stream::from_op(ThrottleOp::new(n, dt))
}
