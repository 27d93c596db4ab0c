use derive_new::new;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;
use crate::ops::{ClockSlot, EventsFn, Predicate};
use crate::sched::Scheduler;

#[derive(new)]
struct ProjectOp {
    predicates: Vec<Predicate>,
    f: EventsFn,
    slots: Mutex<Vec<Option<Event>>>,
    #[new(default)]
    clock: ClockSlot,
}

impl Operator for ProjectOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let now = self.clock.now();
        let snapshot = {
            let mut slots = lock(&self.slots);
            for (ix, predicate) in self.predicates.iter().enumerate() {
                if predicate(event) {
                    slots[ix] = Some(event.clone());
                }
            }
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|e| e.is_expired(now)) {
                    *slot = None;
                }
            }
            slots.iter().flatten().cloned().collect::<Vec<_>>()
        };
        out.send((self.f)(&snapshot));
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        self.clock.bind(sched);
        Ok(())
    }
}

/// Keep one slot per predicate, overwritten by each matching event,
/// and hand the filled slots to `f` on every arrival.  Expired slots
/// empty out lazily at callback time.
pub fn project(predicates: Vec<Predicate>, f: EventsFn) -> Stream {
    let slots = Mutex::new(vec![None; predicates.len()]);
    Stream::from_op(ProjectOp::new(predicates, f, slots))
}
