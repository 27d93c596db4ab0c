use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fmt::Write as _;
use std::io::Write as _;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::event::Event;
use crate::graph::{Stream, sink};

const BATCH_SIZE: usize = 100;
const QUEUE_CAPACITY: usize = 8192;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Batching TCP egress in the plaintext graphite line format:
/// `host.service value time`.  A writer thread drains the queue in
/// batches; connection trouble drops the batch and reconnects on the
/// next one.
pub struct GraphitePool {
    queue: Sender<Event>,
    _writer: JoinHandle<()>,
}

impl GraphitePool {
    pub fn new(host: &str, port: u16) -> GraphitePool {
        let (queue, jobs) = channel::bounded(QUEUE_CAPACITY);
        let addr = format!("{host}:{port}");
        let writer = thread::spawn(move || writer_loop(addr, jobs));
        GraphitePool {
            queue,
            _writer: writer,
        }
    }

    /// Queue one event for egress.  A full queue drops the event.
    pub fn push_event(&self, event: &Event) {
        match self.queue.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("graphite queue full, dropping event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// A sink node feeding this pool.
    pub fn stream(self: &Arc<Self>) -> Stream {
        let pool = self.clone();
        sink(move |event| pool.push_event(event))
    }
}

fn writer_loop(addr: String, jobs: Receiver<Event>) {
    let mut conn: Option<TcpStream> = None;
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    while let Ok(first) = jobs.recv() {
        batch.push(first);
        while batch.len() < BATCH_SIZE {
            match jobs.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        if conn.is_none() {
            conn = match TcpStream::connect(&addr) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    warn!("graphite connect to {addr} failed: {err}");
                    thread::sleep(RECONNECT_DELAY);
                    None
                }
            };
        }
        if let Some(stream) = conn.as_mut() {
            if let Err(err) = stream.write_all(&format_batch(&batch)) {
                warn!("graphite write failed, dropping batch: {err}");
                conn = None;
            }
        }
        batch.clear();
    }
}

fn format_batch(events: &[Event]) -> Vec<u8> {
    let mut lines = String::new();
    for event in events {
        let _ = writeln!(
            lines,
            "{}.{} {} {}",
            event.host(),
            event.service(),
            event.metric_d(),
            event.time()
        );
    }
    lines.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format_uses_the_canonical_metric() {
        let mut e1 = Event::default();
        e1.set_host("web1").set_service("cpu").set_metric(6i64).set_time(123);
        let mut e2 = Event::default();
        e2.set_host("web2").set_service("mem").set_metric(0.5).set_time(124);

        let batch = format_batch(&[e1, e2]);
        assert_eq!(
            "web1.cpu 6 123\nweb2.mem 0.5 124\n",
            String::from_utf8(batch).unwrap()
        );
    }

    #[test]
    fn push_never_blocks_without_a_listener() {
        let pool = GraphitePool::new("127.0.0.1", 9);
        let mut e = Event::default();
        e.set_host("h").set_service("s").set_metric(1.0);
        for _ in 0..10 {
            pool.push_event(&e);
        }
    }
}
