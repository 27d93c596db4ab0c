use derive_new::new;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;
use crate::ops::{ClockSlot, EventsFn};
use crate::sched::Scheduler;

type HostService = (String, String);

#[derive(new)]
struct CoalesceOp {
    f: EventsFn,
    #[new(default)]
    state: Mutex<CoalesceState>,
    #[new(default)]
    clock: ClockSlot,
}

#[derive(Default)]
struct CoalesceState {
    entries: HashMap<HostService, Event>,
    // first-appearance order of the keys above
    order: Vec<HostService>,
}

impl Operator for CoalesceOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let now = self.clock.now();
        let snapshot = {
            let mut state = lock(&self.state);
            let CoalesceState { entries, order } = &mut *state;
            let key = (event.host().to_string(), event.service().to_string());
            if !entries.contains_key(&key) {
                order.push(key.clone());
            }
            entries.insert(key, event.clone());

            order.retain(|key| {
                let keep = entries.get(key).is_some_and(|e| !e.is_expired(now));
                if !keep {
                    entries.remove(key);
                }
                keep
            });

            order
                .iter()
                .filter_map(|key| entries.get(key).cloned())
                .collect_vec()
        };
        out.send((self.f)(&snapshot));
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        self.clock.bind(sched);
        Ok(())
    }
}

/// Track the latest event per (host, service) and hand the full set to
/// `f` on every arrival.  Entries past their expiry are evicted lazily
/// at callback time.
pub fn coalesce(f: EventsFn) -> Stream {
    Stream::from_op(CoalesceOp::new(f))
}
