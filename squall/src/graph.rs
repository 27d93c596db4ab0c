use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::ops::{Add, Shr};
use std::sync::{Arc, Weak};

use crate::event::Event;
use crate::sched::Scheduler;

/// A stream operator: receives one event and emits zero or more
/// derived events through its output port.  Operators are synchronous;
/// emitting `n` events simply invokes the downstream `n` times on the
/// calling thread.
pub trait Operator: Send + Sync {
    fn on_event(&self, event: &Event, out: &Output);

    /// Called exactly once, after the whole graph is wired.  Operators
    /// that need periodic callbacks register them here rather than in
    /// their constructors, so composition stays a pure data operation.
    fn init(&self, _out: Output, _sched: &Arc<dyn Scheduler>) -> anyhow::Result<()> {
        Ok(())
    }

    /// A fresh instance of this operator for an independent partition
    /// of the graph.  Operators keeping no per-partition state return
    /// None and are shared across partitions.
    fn fork(&self) -> Option<Arc<dyn Operator>> {
        None
    }
}

struct NodeSpec {
    op: Arc<dyn Operator>,
    downstream: SmallVec<[usize; 2]>,
}

/// An unwired pipeline: nodes owned by a container, edges expressed as
/// indices into it.  Streams are pure data until handed to
/// [Graph::new]; composing them only rewires indices.
///
/// The head is the pipeline's input; the tail's output is the external
/// output (unwired by default).
pub struct Stream {
    nodes: Vec<NodeSpec>,
    head: usize,
    tail: usize,
}

impl Stream {
    pub fn from_op(op: impl Operator + 'static) -> Stream {
        Stream {
            nodes: vec![NodeSpec {
                op: Arc::new(op),
                downstream: SmallVec::new(),
            }],
            head: 0,
            tail: 0,
        }
    }

    /// Wire this stream's tail output to the other stream's head input
    /// and return the concatenation.
    pub fn pipe(mut self, other: Stream) -> Stream {
        let offset = self.append(other.nodes);
        let tail = self.tail;
        self.nodes[tail].downstream.push(other.head + offset);
        Stream {
            nodes: self.nodes,
            head: self.head,
            tail: other.tail + offset,
        }
    }

    /// Fan this stream and the other out from a common input.
    pub fn join(self, other: Stream) -> Stream {
        svec(vec![self, other])
    }

    fn append(&mut self, nodes: Vec<NodeSpec>) -> usize {
        let offset = self.nodes.len();
        self.nodes.extend(nodes.into_iter().map(|mut node| {
            for edge in node.downstream.iter_mut() {
                *edge += offset;
            }
            node
        }));
        offset
    }
}

impl Shr for Stream {
    type Output = Stream;

    fn shr(self, rhs: Stream) -> Stream {
        self.pipe(rhs)
    }
}

impl Add for Stream {
    type Output = Stream;

    fn add(self, rhs: Stream) -> Stream {
        self.join(rhs)
    }
}

/// Fan-out: a node that delivers each incoming event to every listed
/// stream, in order.
pub fn svec(streams: Vec<Stream>) -> Stream {
    let mut result = Stream::from_op(Fanout);
    for stream in streams {
        let offset = result.append(stream.nodes);
        result.nodes[0].downstream.push(stream.head + offset);
    }
    result
}

struct Fanout;

impl Operator for Fanout {
    fn on_event(&self, event: &Event, out: &Output) {
        out.send(event.clone());
    }
}

struct FnOp<F>(F);

impl<F: Fn(&Event, &Output) + Send + Sync> Operator for FnOp<F> {
    fn on_event(&self, event: &Event, out: &Output) {
        (self.0)(event, out)
    }
}

/// Build a stream node from a plain function of the event and the
/// node's output port.
pub fn create_stream(f: impl Fn(&Event, &Output) + Send + Sync + 'static) -> Stream {
    Stream::from_op(FnOp(f))
}

/// A terminal node that runs a side effect and emits nothing.
pub fn sink(f: impl Fn(&Event) + Send + Sync + 'static) -> Stream {
    create_stream(move |event, _| f(event))
}

struct FactoryOp<H, F> {
    build: Arc<F>,
    handler: H,
}

impl<H, F> Operator for FactoryOp<H, F>
where
    H: Fn(&Event, &Output) + Send + Sync + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event, out: &Output) {
        (self.handler)(event, out)
    }

    fn fork(&self) -> Option<Arc<dyn Operator>> {
        Some(Arc::new(FactoryOp {
            build: self.build.clone(),
            handler: (self.build)(),
        }))
    }
}

/// Like [create_stream], but built from a handler factory so that a
/// partitioner upstream can instantiate a fresh handler per
/// partition.  The factory runs once here for the seed instance and
/// once for every partition.
pub fn create_stream_factory<H, F>(factory: F) -> Stream
where
    H: Fn(&Event, &Output) + Send + Sync + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    let handler = factory();
    Stream::from_op(FactoryOp {
        build: Arc::new(factory),
        handler,
    })
}

/// A node's output port: cheap to clone, safe to hold from scheduler
/// callbacks.  Sending delivers to every downstream input in wiring
/// order; the default (unwired) port drops events.
#[derive(Clone)]
pub struct Output {
    graph: Weak<GraphInner>,
    node: usize,
}

impl Output {
    /// An output port wired to nothing.
    pub fn null() -> Output {
        Output {
            graph: Weak::new(),
            node: 0,
        }
    }

    /// An independent [Stream] copy of everything wired downstream of
    /// this port, for partitioners that fan the rest of the pipeline
    /// out per key.  Operators offering [Operator::fork] get fresh
    /// instances; the rest are shared.
    pub(crate) fn downstream_template(&self) -> Option<Stream> {
        self.graph
            .upgrade()
            .map(|graph| graph.downstream_template(self.node))
    }

    /// The parent port of the graph owning this node, if any.
    pub(crate) fn enclosing_parent(&self) -> Option<Output> {
        self.graph.upgrade().and_then(|graph| graph.parent.clone())
    }

    pub fn send(&self, event: Event) {
        let Some(graph) = self.graph.upgrade() else {
            return;
        };
        let spec = &graph.nodes[self.node];
        if spec.downstream.is_empty() {
            // A tail inside a partitioned child forwards to the parent
            // graph; any other loose end drops.
            if self.node == graph.tail {
                if let Some(parent) = &graph.parent {
                    parent.send(event);
                }
            }
            return;
        }
        for &ix in &spec.downstream {
            graph.deliver(ix, &event);
        }
    }
}

pub(crate) struct GraphInner {
    nodes: Vec<NodeSpec>,
    head: usize,
    tail: usize,
    sched: Arc<dyn Scheduler>,
    parent: Option<Output>,
}

impl GraphInner {
    fn deliver(self: &Arc<Self>, node: usize, event: &Event) {
        let out = Output {
            graph: Arc::downgrade(self),
            node,
        };
        self.nodes[node].op.on_event(event, &out);
    }

    /// Rebuild the sub-graph reachable from `node`'s downstream edges
    /// as an unwired [Stream] headed by a fan-out into the copies of
    /// those edges.  If the graph's tail is reachable, the copy's tail
    /// mirrors it, so parent forwarding carries over.
    fn downstream_template(&self, node: usize) -> Stream {
        let roots = self.nodes[node].downstream.clone();
        let mut index_map: HashMap<usize, usize> = HashMap::new();
        let mut order: Vec<usize> = Vec::new();
        let mut queue: VecDeque<usize> = roots.iter().copied().collect();
        while let Some(ix) = queue.pop_front() {
            if index_map.contains_key(&ix) {
                continue;
            }
            // slot 0 is the fan-out head
            index_map.insert(ix, order.len() + 1);
            order.push(ix);
            for &edge in &self.nodes[ix].downstream {
                queue.push_back(edge);
            }
        }
        let mut nodes = vec![NodeSpec {
            op: Arc::new(Fanout),
            downstream: roots.iter().map(|root| index_map[root]).collect(),
        }];
        for &old in &order {
            let spec = &self.nodes[old];
            nodes.push(NodeSpec {
                op: spec.op.fork().unwrap_or_else(|| spec.op.clone()),
                downstream: spec.downstream.iter().map(|edge| index_map[edge]).collect(),
            });
        }
        let tail = index_map.get(&self.tail).copied().unwrap_or(usize::MAX);
        Stream {
            nodes,
            head: 0,
            tail,
        }
    }
}

/// An initialised, wired composition of stream nodes.  Cheap to clone;
/// clones share the same operators and state.  Safe to push into from
/// several threads at once: stateful operators serialise their own
/// state.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    pub fn new(stream: Stream, sched: Arc<dyn Scheduler>) -> anyhow::Result<Graph> {
        Self::with_parent(stream, sched, None)
    }

    pub(crate) fn with_parent(
        stream: Stream,
        sched: Arc<dyn Scheduler>,
        parent: Option<Output>,
    ) -> anyhow::Result<Graph> {
        let inner = Arc::new(GraphInner {
            nodes: stream.nodes,
            head: stream.head,
            tail: stream.tail,
            sched,
            parent,
        });
        for ix in 0..inner.nodes.len() {
            let out = Output {
                graph: Arc::downgrade(&inner),
                node: ix,
            };
            inner.nodes[ix].op.init(out, &inner.sched)?;
        }
        debug!("wired {:} nodes", inner.nodes.len());
        Ok(Graph { inner })
    }

    /// Feed one event into the head of the graph.  Propagation is
    /// synchronous on the calling thread; errors inside operators are
    /// logged at the failing node and never escape this call.
    pub fn push_event(&self, event: &Event) {
        self.inner.deliver(self.inner.head, event);
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.sched.clone()
    }
}

/// Free-function form of [Graph::push_event], for sources that are
/// handed a graph reference.
pub fn push_event(graph: &Graph, event: &Event) {
    graph.push_event(event);
}
