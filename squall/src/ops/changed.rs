use derive_new::new;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;

/// Remembers the last observed value of a field and only forwards
/// events that change it.
#[derive(new)]
struct ChangedOp {
    key: String,
    last: Mutex<Option<String>>,
}

impl Operator for ChangedOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let current = event.str_value(&self.key);
        let mut last = lock(&self.last);
        let changed = last.as_deref() != Some(current.as_str());
        *last = Some(current);
        drop(last);
        if changed {
            out.send(event.clone());
        }
    }
}

/// Forward events whose `key` field differs from the previously seen
/// value.  `initial` seeds the comparator, so the first event is
/// suppressed iff it matches.
pub fn changed(key: &str, initial: Option<&str>) -> Stream {
    Stream::from_op(ChangedOp::new(
        key.to_string(),
        Mutex::new(initial.map(str::to_string)),
    ))
}

/// [changed] over the state field, tracked independently per
/// (host, service) pair.
pub fn changed_state(initial: &str) -> Stream {
    let initial = initial.to_string();
    crate::ops::by(vec!["host", "service"], move || {
        changed("state", Some(initial.as_str()))
    })
}
