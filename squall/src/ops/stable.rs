use derive_new::new;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;

#[derive(new)]
struct StableOp {
    dt: i64,
    #[new(default)]
    state: Mutex<StableState>,
}

#[derive(Default)]
struct StableState {
    last_state: Option<String>,
    // event time of the most recent state transition
    since: i64,
    buffer: Vec<Event>,
    settled: bool,
}

impl Operator for StableOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let mut flushed = Vec::new();
        {
            let mut state = lock(&self.state);
            if state.last_state.as_deref() != Some(event.state()) {
                // transition: restart the stability clock
                state.last_state = Some(event.state().to_string());
                state.since = event.time();
                state.buffer.clear();
                state.buffer.push(event.clone());
                state.settled = false;
            } else if state.settled {
                flushed.push(event.clone());
            } else if event.time() - state.since >= self.dt {
                flushed.append(&mut state.buffer);
                flushed.push(event.clone());
                state.settled = true;
            } else {
                state.buffer.push(event.clone());
            }
        }
        for event in flushed {
            out.send(event);
        }
    }
}

/// Hold events back until their state has been steady for `dt` seconds
/// of event time; then release the backlog in arrival order and pass
/// subsequent same-state events straight through.  Any state change
/// resets the clock and discards pass-through status.
pub fn stable(dt: i64) -> Stream {
    Stream::from_op(StableOp::new(dt))
}
