use derive_new::new;
use itertools::Itertools;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::event::Event;
use crate::graph::{Operator, Output, Stream};
use crate::lock;
use crate::ops::EventsFn;

#[derive(new)]
struct FixedEventWindowOp {
    n: usize,
    f: EventsFn,
    #[new(default)]
    buffer: Mutex<Vec<Event>>,
}

impl Operator for FixedEventWindowOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let batch = {
            let mut buffer = lock(&self.buffer);
            buffer.push(event.clone());
            if buffer.len() == self.n {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            out.send((self.f)(&batch));
        }
    }
}

/// Hand `f` every consecutive batch of exactly `n` events; its return
/// value is forwarded downstream.
pub fn fixed_event_window(n: usize, f: EventsFn) -> Stream {
    Stream::from_op(FixedEventWindowOp::new(n.max(1), f))
}

#[derive(new)]
struct MovingEventWindowOp {
    n: usize,
    f: EventsFn,
    #[new(default)]
    buffer: Mutex<VecDeque<Event>>,
}

impl Operator for MovingEventWindowOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let snapshot = {
            let mut buffer = lock(&self.buffer);
            buffer.push_back(event.clone());
            if buffer.len() > self.n {
                buffer.pop_front();
            }
            buffer.iter().cloned().collect_vec()
        };
        out.send((self.f)(&snapshot));
    }
}

/// Hand `f` the last `n` events (or fewer, while warming up) on every
/// arrival.
pub fn moving_event_window(n: usize, f: EventsFn) -> Stream {
    Stream::from_op(MovingEventWindowOp::new(n.max(1), f))
}

#[derive(new)]
struct FixedTimeWindowOp {
    dt: i64,
    f: EventsFn,
    #[new(default)]
    state: Mutex<FixedTimeState>,
}

#[derive(Default)]
struct FixedTimeState {
    bucket: Option<i64>,
    events: Vec<Event>,
}

impl Operator for FixedTimeWindowOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let index = event.time().div_euclid(self.dt);
        let flushed = {
            let mut state = lock(&self.state);
            match state.bucket {
                None => {
                    state.bucket = Some(index);
                    state.events.push(event.clone());
                    None
                }
                Some(current) if index > current => {
                    let batch = std::mem::take(&mut state.events);
                    state.bucket = Some(index);
                    state.events.push(event.clone());
                    Some(batch)
                }
                Some(current) if index == current => {
                    state.events.push(event.clone());
                    None
                }
                // behind an already-flushed bucket
                Some(_) => None,
            }
        };
        if let Some(batch) = flushed {
            out.send((self.f)(&batch));
        }
    }
}

/// Bucket events by `floor(time / dt)`.  A bucket is handed to `f`
/// once an event for a later bucket arrives; events for buckets that
/// already flushed are dropped.
pub fn fixed_time_window(dt: i64, f: EventsFn) -> Stream {
    Stream::from_op(FixedTimeWindowOp::new(dt.max(1), f))
}

#[derive(new)]
struct MovingTimeWindowOp {
    dt: i64,
    f: EventsFn,
    #[new(default)]
    state: Mutex<MovingTimeState>,
}

#[derive(Default)]
struct MovingTimeState {
    max_time: i64,
    events: Vec<Event>,
}

impl Operator for MovingTimeWindowOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let snapshot = {
            let mut state = lock(&self.state);
            state.max_time = state.max_time.max(event.time());
            state.events.push(event.clone());
            let cutoff = state.max_time - self.dt;
            state.events.retain(|e| e.time() > cutoff);
            state.events.clone()
        };
        out.send((self.f)(&snapshot));
    }
}

/// Keep the events whose time falls in `(max_time - dt, max_time]`,
/// where `max_time` is the largest event time seen, and hand the
/// window to `f` on every arrival.  Late events still inside the
/// window are kept.
pub fn moving_time_window(dt: i64, f: EventsFn) -> Stream {
    Stream::from_op(MovingTimeWindowOp::new(dt.max(1), f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{batch_sink, events_fn, mock_graph, test_sink};

    fn metrics(seen: &std::sync::Mutex<Vec<Event>>) -> Vec<f64> {
        seen.lock().unwrap().iter().map(|e| e.metric_d()).collect()
    }

    fn push(g: &crate::graph::Graph, metric: i64, time: i64) {
        let mut e = Event::default();
        e.set_metric(metric).set_time(time);
        g.push_event(&e);
    }

    #[test]
    fn fixed_event_window_flushes_every_n() {
        let (f, seen) = batch_sink();
        let (g, _) = mock_graph(fixed_event_window(3, f));

        push(&g, 0, 0);
        push(&g, 1, 0);
        assert_eq!(0, seen.lock().unwrap().len());

        push(&g, 2, 0);
        assert_eq!(vec![0.0, 1.0, 2.0], metrics(&seen));

        push(&g, 3, 0);
        push(&g, 4, 0);
        assert_eq!(vec![0.0, 1.0, 2.0], metrics(&seen));

        push(&g, 5, 0);
        assert_eq!(vec![3.0, 4.0, 5.0], metrics(&seen));
    }

    #[test]
    fn fixed_event_window_forwards_the_summary() {
        let (capture, seen) = test_sink();
        let summarise = events_fn(|events| {
            let mut e = Event::default();
            e.set_metric(events.iter().map(|e| e.metric_d()).sum::<f64>());
            e
        });
        let (g, _) = mock_graph(fixed_event_window(2, summarise) >> capture);

        push(&g, 1, 0);
        push(&g, 2, 0);
        push(&g, 3, 0);
        push(&g, 4, 0);
        assert_eq!(vec![3.0, 7.0], metrics(&seen));
    }

    #[test]
    fn moving_event_window_caps_the_buffer() {
        let (f, seen) = batch_sink();
        let (g, _) = mock_graph(moving_event_window(3, f));

        for (metric, expected_len) in [(0, 1), (1, 2), (2, 3), (3, 3)] {
            push(&g, metric, 0);
            assert_eq!(expected_len, seen.lock().unwrap().len());
        }
        assert_eq!(vec![1.0, 2.0, 3.0], metrics(&seen));
    }

    #[test]
    fn fixed_time_window_flushes_on_bucket_rollover() {
        let (f, seen) = batch_sink();
        let (g, _) = mock_graph(fixed_time_window(3, f));

        for t in 0..3 {
            push(&g, t, t);
            assert_eq!(0, seen.lock().unwrap().len());
        }

        push(&g, 3, 3);
        assert_eq!(vec![0.0, 1.0, 2.0], metrics(&seen));

        push(&g, 4, 4);
        push(&g, 5, 5);
        assert_eq!(vec![0.0, 1.0, 2.0], metrics(&seen));

        push(&g, 6, 6);
        assert_eq!(vec![3.0, 4.0, 5.0], metrics(&seen));

        push(&g, 10, 10);
        assert_eq!(vec![6.0], metrics(&seen));

        push(&g, 14, 14);
        assert_eq!(vec![10.0], metrics(&seen));

        // behind the flushed bucket: dropped
        seen.lock().unwrap().clear();
        push(&g, 1, 1);
        assert_eq!(0, seen.lock().unwrap().len());
        push(&g, 15, 15);
        assert_eq!(vec![14.0], metrics(&seen));
    }

    #[test]
    fn moving_time_window_keeps_late_events_in_range() {
        let (f, seen) = batch_sink();
        let (g, _) = mock_graph(moving_time_window(3, f));

        for t in 0..3 {
            push(&g, t, t);
            assert_eq!((t + 1) as usize, seen.lock().unwrap().len());
        }

        push(&g, 3, 3);
        assert_eq!(vec![1.0, 2.0, 3.0], metrics(&seen));

        push(&g, 5, 5);
        assert_eq!(vec![3.0, 5.0], metrics(&seen));

        push(&g, 4, 4);
        assert_eq!(vec![3.0, 5.0, 4.0], metrics(&seen));

        push(&g, 10, 10);
        assert_eq!(vec![10.0], metrics(&seen));
    }
}
