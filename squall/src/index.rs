use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Stream, sink};
use crate::lock;

/// Store of the last-known event per (host, service).  The engine only
/// forwards into it; querying is the owner's business.
pub trait Index: Send + Sync {
    fn add_event(&self, event: &Event);
}

/// In-memory [Index].
#[derive(Default)]
pub struct MemIndex {
    entries: Mutex<HashMap<(String, String), Event>>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str, service: &str) -> Option<Event> {
        lock(&self.entries)
            .get(&(host.to_string(), service.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<Event> {
        lock(&self.entries).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Remove entries past their expiry and return them with their
    /// state rewritten to `"expired"`, ready to be pushed back into a
    /// graph.
    pub fn expire(&self, now: i64) -> Vec<Event> {
        let mut entries = lock(&self.entries);
        let keys: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| entries.remove(&k))
            .map(|mut e| {
                e.set_state("expired");
                e
            })
            .collect()
    }
}

impl Index for MemIndex {
    fn add_event(&self, event: &Event) {
        let key = (event.host().to_string(), event.service().to_string());
        lock(&self.entries).insert(key, event.clone());
    }
}

/// A sink that forwards every event into the index.
pub fn forward_index(index: Arc<dyn Index>) -> Stream {
    sink(move |event| index.add_event(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::mock_graph;

    fn keyed(host: &str, service: &str, time: i64) -> Event {
        let mut e = Event::default();
        e.set_host(host).set_service(service).set_time(time);
        e
    }

    #[test]
    fn latest_event_wins_per_key() {
        let index = MemIndex::new();
        index.add_event(&keyed("h", "s", 1));
        index.add_event(&keyed("h", "s", 2));
        index.add_event(&keyed("h", "t", 1));

        assert_eq!(2, index.len());
        assert_eq!(2, index.get("h", "s").unwrap().time());
    }

    #[test]
    fn graphs_can_feed_the_index() {
        let index = Arc::new(MemIndex::new());
        let (g, _) = mock_graph(forward_index(index.clone()));
        g.push_event(&keyed("h", "s", 1));
        assert_eq!(1, index.len());
    }

    #[test]
    fn expire_sweeps_and_restates() {
        let index = MemIndex::new();
        index.add_event(&keyed("h", "old", 1));
        index.add_event(&keyed("h", "new", 90));

        let expired = index.expire(100);
        assert_eq!(1, expired.len());
        assert_eq!("expired", expired[0].state());
        assert_eq!(1, index.len());
        assert!(index.get("h", "new").is_some());
    }
}
