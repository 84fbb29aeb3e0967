//! The job-graph scheduler: capability-annotated jobs with explicit
//! dependency edges, validated at build time and executed concurrently.
//!
//! A [`SchedulerBuilder`] collects nodes (callback + access declaration +
//! dependency edges + thread affinity), then [`build`](SchedulerBuilder::build)
//! validates the whole graph: the edges must form a DAG, and any two nodes
//! whose declared footprints overlap on a writable slot must be connected by
//! a strict transitive dependency path in *some* direction. Refusing to
//! build an unordered overlap is the entire safety net: declared
//! capabilities mean nothing if two racing jobs can still be scheduled side
//! by side.
//!
//! The built [`Scheduler`] is immutable and intended to be executed many
//! times per second against a live [`Store`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::access::{AccessDecl, StoreView};
use crate::errors::{ConflictKind, Result, ScheduleError};
use crate::exec::TaskQueue;
use crate::promise::combiner::PromiseCombiner;
use crate::promise::{immediate_done, Done, Promise};
use crate::store::Store;

const DEFAULT_MAX_SPIN_TIME: Duration = Duration::from_millis(10);

/// Identifier of one node in a job graph, assigned monotonically by the
/// builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lightweight, copyable reference to a built node; the currency of
/// dependency edges.
#[derive(Debug, Clone, Copy)]
pub struct NodeHandle {
    id: NodeId,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

type NodeCallback = Arc<dyn Fn(StoreView) -> Arc<Promise<Done>> + Send + Sync>;

/// One schedulable unit of work. Frozen at build time; re-run (never
/// re-created) on every [`Scheduler::execute`].
#[derive(Clone)]
struct Node {
    id: NodeId,
    main_thread_only: bool,
    decl: AccessDecl,
    dependencies: Vec<NodeId>,
    callback: NodeCallback,
}

impl Node {
    /// Queue this node's callback onto the task queue selected by its thread
    /// affinity, and return a promise resolving once the callback's own
    /// promise does.
    fn schedule(
        &self,
        store: &Arc<Store>,
        main_queue: &Arc<TaskQueue>,
        any_queue: &Arc<TaskQueue>,
    ) -> Arc<Promise<Done>> {
        let completion = Promise::<Done>::create_labeled(format!("node{}", self.id));
        let queue = if self.main_thread_only {
            main_queue
        } else {
            any_queue
        };

        let callback = Arc::clone(&self.callback);
        let decl = self.decl.clone();
        let store = Arc::clone(store);
        let notify_queue = Arc::clone(any_queue);
        let result = Arc::clone(&completion);
        queue.add_task(move || {
            let view = StoreView::new(store, decl);
            let finished = callback(view);
            finished.on_success(move |_| result.resolve(Done), &notify_queue);
        });

        completion
    }
}

/// Fluent builder for a single node. Obtained from
/// [`SchedulerBuilder::add_node`]; the terminal [`build`](NodeBuilder::build)
/// consumes the builder, so a node cannot be registered twice.
pub struct NodeBuilder<'b> {
    builder: &'b mut SchedulerBuilder,
    id: NodeId,
    main_thread_only: bool,
    decl: AccessDecl,
    dependencies: Vec<NodeId>,
}

impl NodeBuilder<'_> {
    /// Pin this node's callback to the scheduler's private main-thread
    /// queue.
    pub fn main_thread_only(mut self) -> Self {
        self.main_thread_only = true;
        self
    }

    /// Merge `decl` into this node's declared footprint.
    pub fn with_decl(mut self, decl: AccessDecl) -> Self {
        self.decl = self.decl.merge_in_decl(&decl);
        self
    }

    /// Require `node` to fully complete before this node starts.
    pub fn depends_on(mut self, node: NodeHandle) -> Self {
        if !self.dependencies.contains(&node.id) {
            self.dependencies.push(node.id);
        }
        self
    }

    /// Freeze the node with an asynchronous callback: the node counts as
    /// complete once the returned promise resolves.
    pub fn build(
        self,
        callback: impl Fn(StoreView) -> Arc<Promise<Done>> + Send + Sync + 'static,
    ) -> NodeHandle {
        self.finish(Arc::new(callback))
    }

    /// Freeze the node with a synchronous callback; the node counts as
    /// complete as soon as the callback returns.
    pub fn build_sync(self, callback: impl Fn(StoreView) + Send + Sync + 'static) -> NodeHandle {
        self.finish(Arc::new(move |view| {
            callback(view);
            immediate_done()
        }))
    }

    fn finish(self, callback: NodeCallback) -> NodeHandle {
        let handle = NodeHandle { id: self.id };
        self.builder.nodes.push(Node {
            id: self.id,
            main_thread_only: self.main_thread_only,
            decl: self.decl,
            dependencies: self.dependencies,
            callback,
        });
        handle
    }
}

/// Builder for a [`Scheduler`].
pub struct SchedulerBuilder {
    nodes: Vec<Node>,
    max_spin_time: Duration,
    next_node_id: u32,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            max_spin_time: DEFAULT_MAX_SPIN_TIME,
            next_node_id: 1,
        }
    }

    /// The longest the execute drain loop may spin without completing any
    /// work before the schedule is declared stuck and the process panics.
    pub fn max_spin_time(mut self, dt: Duration) -> Self {
        self.max_spin_time = dt;
        self
    }

    /// Start a new node. The returned builder borrows this one; freeze it
    /// with [`NodeBuilder::build`] before adding the next node.
    pub fn add_node(&mut self) -> NodeBuilder<'_> {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        NodeBuilder {
            builder: self,
            id,
            main_thread_only: false,
            decl: AccessDecl::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency edge between two already-built nodes: `node` will
    /// not start until `dependency` has fully completed. Equivalent to
    /// [`NodeBuilder::depends_on`] for edges only known after both nodes
    /// exist.
    pub fn add_dependency(&mut self, node: NodeHandle, dependency: NodeHandle) {
        if let Some(n) = self.nodes.iter_mut().find(|n| n.id == node.id) {
            if !n.dependencies.contains(&dependency.id) {
                n.dependencies.push(dependency.id);
            }
        }
    }

    /// Validate the graph and freeze it into an executable [`Scheduler`].
    ///
    /// Fails if the dependency edges contain a cycle or reference an unknown
    /// node, or (with the `validation` feature) if two nodes with
    /// conflicting declared footprints have no strict dependency path
    /// between them in either direction.
    pub fn build(self) -> Result<Scheduler> {
        let SchedulerBuilder {
            nodes,
            max_spin_time,
            ..
        } = self;

        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut index_of: HashMap<NodeId, NodeIndex> = HashMap::new();
        for node in &nodes {
            index_of.insert(node.id, graph.add_node(node.id));
        }
        for node in &nodes {
            for &dep in &node.dependencies {
                let dep_index =
                    *index_of
                        .get(&dep)
                        .ok_or(ScheduleError::UnknownDependency {
                            node: node.id,
                            dependency: dep,
                        })?;
                graph.add_edge(dep_index, index_of[&node.id], ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| ScheduleError::Cycle {
            node: graph[cycle.node_id()],
        })?;

        if cfg!(feature = "validation") {
            Self::validate_conflicts(&nodes)?;
        }

        let mut by_id: HashMap<NodeId, Node> =
            nodes.into_iter().map(|n| (n.id, n)).collect();
        let ordered: Vec<Node> = order
            .into_iter()
            .map(|idx| {
                by_id
                    .remove(&graph[idx])
                    .expect("topological order covers each node exactly once")
            })
            .collect();

        if ordered.is_empty() {
            warn!("degenerate schedule built (zero nodes)");
        } else {
            debug!(nodes = ordered.len(), "job graph validated");
        }

        Ok(Scheduler {
            nodes: ordered,
            max_spin_time,
        })
    }

    /// The conflict safety net: every pair of nodes whose declared
    /// footprints can race on a slot must be strictly ordered by the
    /// dependency graph, in one direction or the other.
    fn validate_conflicts(nodes: &[Node]) -> Result<()> {
        let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();

        for node in nodes {
            for other in nodes {
                if other.id == node.id {
                    continue;
                }

                // A ctx-write races any other access of the same singleton.
                for slot in node.decl.list_ctx_writes() {
                    if other.decl.list_ctx_writes().contains(slot)
                        || other.decl.list_ctx_reads().contains(slot)
                    {
                        Self::require_ordered(&by_id, node, other, slot.name(), ConflictKind::Context)?;
                    }
                }

                // A component write races any other access of the same slot.
                for slot in node.decl.list_writes() {
                    if other.decl.list_writes().contains(slot)
                        || other.decl.list_reads().contains(slot)
                    {
                        Self::require_ordered(
                            &by_id,
                            node,
                            other,
                            slot.name(),
                            ConflictKind::Component,
                        )?;
                    }
                }

                // An event consume races enqueues and other consumes of the
                // same topic. Concurrent enqueues alone are fine.
                for slot in node.decl.list_evt_consumes() {
                    if other.decl.list_evt_writes().contains(slot)
                        || other.decl.list_evt_consumes().contains(slot)
                    {
                        Self::require_ordered(&by_id, node, other, slot.name(), ConflictKind::Event)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn require_ordered(
        by_id: &HashMap<NodeId, &Node>,
        a: &Node,
        b: &Node,
        slot: &'static str,
        kind: ConflictKind,
    ) -> Result<()> {
        if Self::has_strict_dep(by_id, a.id, b.id) || Self::has_strict_dep(by_id, b.id, a.id) {
            return Ok(());
        }
        Err(ScheduleError::UnorderedConflict {
            a: a.id,
            b: b.id,
            slot,
            kind,
        })
    }

    /// True iff `a` transitively depends on `b`.
    fn has_strict_dep(by_id: &HashMap<NodeId, &Node>, a: NodeId, b: NodeId) -> bool {
        by_id[&a]
            .dependencies
            .iter()
            .any(|&dep| dep == b || Self::has_strict_dep(by_id, dep, b))
    }
}

/// A validated, topologically-ordered job graph, executed once per tick.
pub struct Scheduler {
    nodes: Vec<Node>,
    max_spin_time: Duration,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Run the whole graph to completion against `store`, blocking the
    /// calling thread in a cooperative drain loop.
    ///
    /// A private main-thread queue is created for this call; nodes marked
    /// [`main_thread_only`](NodeBuilder::main_thread_only) run on it, i.e.
    /// on the calling thread. All other nodes land on `any_thread`, which
    /// any number of external executors may pump concurrently. Passing
    /// `None` runs everything on the calling thread.
    ///
    /// If the drain loop completes no work for longer than the configured
    /// `max_spin_time`, the schedule is stuck (a node's promise can never
    /// resolve) and the process panics rather than hanging silently.
    pub fn execute(&self, any_thread: Option<&Arc<TaskQueue>>, store: &Arc<Store>) {
        if self.nodes.is_empty() {
            return;
        }

        let main_queue = TaskQueue::new();
        let any_queue = any_thread
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&main_queue));

        let mut completions: HashMap<NodeId, Arc<Promise<Done>>> = HashMap::new();
        let all_nodes = PromiseCombiner::create();

        for node in &self.nodes {
            let completion = if node.dependencies.is_empty() {
                node.schedule(store, &main_queue, &any_queue)
            } else {
                let gate = PromiseCombiner::create();
                for dep in &node.dependencies {
                    let dep_promise = completions
                        .get(dep)
                        .expect("dependencies precede dependents in topological order");
                    gate.add(dep_promise, &any_queue);
                }

                let node = node.clone();
                let store = Arc::clone(store);
                let main_queue = Arc::clone(&main_queue);
                let inner_any_queue = Arc::clone(&any_queue);
                gate.combine_chaining(
                    move |_| node.schedule(&store, &main_queue, &inner_any_queue),
                    &any_queue,
                )
            };

            all_nodes.add(&completion, &any_queue);
            completions.insert(node.id, completion);
        }

        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            all_nodes
                .combine()
                .on_success(move |_| done.store(true, Ordering::SeqCst), &main_queue);
        }

        self.drain(&done, &main_queue, &any_queue);
    }

    /// Pump main-thread work to exhaustion, then one any-thread task at a
    /// time, until the root combiner flips `done`. A full iteration that
    /// completes no work starts the watchdog.
    fn drain(&self, done: &AtomicBool, main_queue: &TaskQueue, any_queue: &TaskQueue) {
        let mut hang_start: Option<Instant> = None;

        while !done.load(Ordering::SeqCst) {
            let mut did_work = false;
            loop {
                let mut ran = false;
                while main_queue.execute_next() {
                    ran = true;
                }
                if !ran {
                    ran = any_queue.execute_next();
                }
                if ran {
                    did_work = true;
                } else {
                    break;
                }
            }

            if did_work {
                hang_start = None;
            } else {
                let started = *hang_start.get_or_insert_with(Instant::now);
                if started.elapsed() > self.max_spin_time {
                    panic!(
                        "scheduler watchdog: no runnable work for {:?}; the job \
                         graph is stuck",
                        self.max_spin_time
                    );
                }
                std::thread::yield_now();
            }
        }
    }
}
