use derive_new::new;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::graph::{Graph, Operator, Output, Stream};
use crate::lock;
use crate::sched::Scheduler;

#[derive(new)]
struct ByOp {
    keys: Vec<String>,
    // None partitions the downstream wired after this node instead
    template: Option<Box<dyn Fn() -> Stream + Send + Sync>>,
    #[new(default)]
    children: Mutex<HashMap<Vec<String>, Graph>>,
    #[new(default)]
    sched: Mutex<Option<Arc<dyn Scheduler>>>,
}

impl ByOp {
    fn build_child(&self, out: &Output, sched: Arc<dyn Scheduler>) -> Option<Graph> {
        let built = match &self.template {
            Some(factory) => Graph::with_parent(factory(), sched, Some(out.clone())),
            None => {
                let stream = out.downstream_template()?;
                Graph::with_parent(stream, sched, out.enclosing_parent())
            }
        };
        match built {
            Ok(child) => Some(child),
            Err(err) => {
                error!("failed to build partition child: {err:#}");
                None
            }
        }
    }
}

impl Operator for ByOp {
    fn on_event(&self, event: &Event, out: &Output) {
        let key: Vec<String> = self.keys.iter().map(|k| event.str_value(k)).collect();
        let child = {
            let mut children = lock(&self.children);
            match children.get(&key) {
                Some(child) => child.clone(),
                None => {
                    let Some(sched) = lock(&self.sched).clone() else {
                        warn!("partitioner received an event before init");
                        return;
                    };
                    let Some(child) = self.build_child(out, sched) else {
                        return;
                    };
                    children.insert(key, child.clone());
                    child
                }
            }
        };
        // pushed outside the map lock; partitions do not serialise
        // against each other
        child.push_event(event);
    }

    fn init(&self, _out: Output, sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        *lock(&self.sched) = Some(sched.clone());
        Ok(())
    }
}

/// Partition the stream by the tuple of the named field values: one
/// independent copy of the template per distinct tuple, built on first
/// occurrence of its key and cached for the life of the graph.  Each
/// child's tail output forwards into this node's downstream.
pub fn by(keys: Vec<&str>, template: impl Fn() -> Stream + Send + Sync + 'static) -> Stream {
    let keys = keys.into_iter().map(str::to_string).collect();
    Stream::from_op(ByOp::new(keys, Some(Box::new(template))))
}

/// Partitioner meant to sit inside a pipeline: each distinct tuple of
/// the named field values gets its own copy of everything wired
/// downstream of this node, built on first occurrence of its key.
/// Nodes built by [crate::graph::create_stream_factory] are
/// instantiated afresh per partition; nodes keeping no per-partition
/// state are shared.  The downstream wired at composition time stays
/// in place as a seed instance that never sees events.
pub fn by_fwd(keys: Vec<&str>) -> Stream {
    let keys = keys.into_iter().map(str::to_string).collect();
    Stream::from_op(ByOp::new(keys, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{create_stream_factory, sink};
    use crate::ops::{mock_graph, smap, test_sink};

    type Bucket = Arc<Mutex<Vec<Event>>>;

    fn bucket_factory() -> (impl Fn() -> Stream + Send + Sync, Arc<Mutex<Vec<Bucket>>>) {
        let buckets: Arc<Mutex<Vec<Bucket>>> = Arc::new(Mutex::new(Vec::new()));
        let handle = buckets.clone();
        let factory = move || {
            let bucket: Bucket = Arc::new(Mutex::new(Vec::new()));
            handle.lock().unwrap().push(bucket.clone());
            sink(move |e| bucket.lock().unwrap().push(e.clone()))
        };
        (factory, buckets)
    }

    fn keyed(host: &str, service: &str) -> Event {
        let mut e = Event::default();
        e.set_host(host).set_service(service);
        e
    }

    #[test]
    fn each_key_tuple_gets_its_own_child() {
        let _ = env_logger::try_init();
        let (factory, buckets) = bucket_factory();
        let (g, _) = mock_graph(by(vec!["host", "service"], factory));

        let events = [
            keyed("host1", "service1"),
            keyed("host2", "service2"),
            keyed("host3", "service3"),
        ];
        for e in &events {
            g.push_event(e);
        }

        assert_eq!(3, buckets.lock().unwrap().len());

        for e in &events {
            g.push_event(e);
        }

        let buckets = buckets.lock().unwrap();
        // strictly on demand: no child until its key shows up
        assert_eq!(3, buckets.len());
        for bucket in buckets.iter() {
            assert_eq!(2, bucket.lock().unwrap().len());
        }
        assert_eq!("host1", buckets[0].lock().unwrap()[0].host());
        assert_eq!("host2", buckets[1].lock().unwrap()[0].host());
        assert_eq!("host3", buckets[2].lock().unwrap()[0].host());
    }

    #[test]
    fn piped_form_seeds_one_instance_then_builds_on_demand() {
        let buckets: Arc<Mutex<Vec<Bucket>>> = Arc::new(Mutex::new(Vec::new()));
        let handle = buckets.clone();
        let factory = move || {
            let bucket: Bucket = Arc::new(Mutex::new(Vec::new()));
            handle.lock().unwrap().push(bucket.clone());
            move |e: &Event, _: &Output| bucket.lock().unwrap().push(e.clone())
        };
        let (g, _) =
            mock_graph(by_fwd(vec!["host", "service"]) >> create_stream_factory(factory));

        let events = [
            keyed("host1", "service1"),
            keyed("host2", "service2"),
            keyed("host3", "service3"),
        ];
        for e in &events {
            g.push_event(e);
        }

        {
            let buckets = buckets.lock().unwrap();
            assert_eq!(4, buckets.len());
            assert_eq!(1, buckets[1].lock().unwrap().len());
            assert_eq!(1, buckets[2].lock().unwrap().len());
            assert_eq!(1, buckets[3].lock().unwrap().len());
        }

        for e in &events {
            g.push_event(e);
        }

        let buckets = buckets.lock().unwrap();
        assert_eq!(4, buckets.len());
        // the instance wired at composition time never sees events
        assert_eq!(0, buckets[0].lock().unwrap().len());
        for bucket in &buckets[1..] {
            assert_eq!(2, bucket.lock().unwrap().len());
        }
    }

    #[test]
    fn child_output_forwards_downstream() {
        let (capture, seen) = test_sink();
        let template = || {
            smap(|e| {
                let host = format!("{}!", e.host());
                e.set_host(host);
            })
        };
        let (g, _) = mock_graph(by(vec!["host"], template) >> capture);

        g.push_event(&keyed("a", "s"));
        g.push_event(&keyed("b", "s"));
        g.push_event(&keyed("a", "s"));

        let seen = seen.lock().unwrap();
        assert_eq!(3, seen.len());
        assert_eq!(
            vec!["a!", "b!", "a!"],
            seen.iter().map(|e| e.host()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_key_fields_share_one_partition() {
        let (factory, buckets) = bucket_factory();
        let (g, _) = mock_graph(by(vec!["host", "service"], factory));

        g.push_event(&Event::default());
        g.push_event(&Event::default());

        let buckets = buckets.lock().unwrap();
        assert_eq!(1, buckets.len());
        assert_eq!(2, buckets[0].lock().unwrap().len());
    }
}
