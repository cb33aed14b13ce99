//! The discrete-event scheduler (§4.5): walks the graph in topological
//! order, assigning nodes to connections and CPU, advancing simulated
//! time in quantised slices, and emitting per-node start/end timings.
//!
//! There is no real concurrency here — a single logical clock, a pure
//! min-heap event queue, no timers or callbacks (§9 "Event loop"). The
//! connection pool already expresses queueing as a future ready time
//! rather than a blocking call, so every ready node can be scheduled
//! the moment its dependencies finish; the event queue alone decides
//! simulated-time order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::analyzer::{estimate_rtt_per_origin, estimate_server_response_time_per_origin};
use crate::connection::ConnectionPool;
use crate::error::{LanternError, LanternWarning};
use crate::graph::{Graph, Node};
use crate::settings::Settings;
use crate::units::{ConnectionId, Milliseconds, NodeId, RttMs, ServerResponseTimeMs};

/// Start and end simulated time for one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    /// When the node started.
    pub start_ms: Milliseconds,
    /// When the node finished.
    pub end_ms: Milliseconds,
}

/// The result of one `simulate` run (§6 `simulate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    node_timings: HashMap<NodeId, NodeTiming>,
    time_in_ms: Milliseconds,
    warnings: Vec<LanternWarning>,
}

impl SimulationOutput {
    /// Every node's simulated start/end time.
    #[must_use]
    pub fn node_timings(&self) -> &HashMap<NodeId, NodeTiming> {
        &self.node_timings
    }

    /// The simulated finish time of the whole run: the latest end time
    /// across every node.
    #[must_use]
    pub fn time_in_ms(&self) -> Milliseconds {
        self.time_in_ms
    }

    /// Non-fatal conditions accumulated during this run (§7
    /// `UnknownOrigin`).
    #[must_use]
    pub fn warnings(&self) -> &[LanternWarning] {
        &self.warnings
    }

    /// The simulated duration of `node` (§11 supplement).
    ///
    /// # Panics
    ///
    /// Panics if `node` has no timing in this output (it was not part
    /// of the simulated graph).
    #[must_use]
    pub fn duration_of(&self, node: NodeId) -> Milliseconds {
        let timing = &self.node_timings[&node];
        timing.end_ms.saturating_sub(timing.start_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EventKind {
    /// `connection` is `None` for instantaneous (cache-hit/data) nodes,
    /// which never touch the pool.
    Network { connection: Option<ConnectionId> },
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FinishEvent {
    finish_time: Milliseconds,
    node: NodeId,
    start_time: Milliseconds,
    kind: EventKind,
}

impl Eq for FinishEvent {}

impl Ord for FinishEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.finish_time
            .as_f64()
            .total_cmp(&other.finish_time.as_f64())
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for FinishEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Runs the discrete-event scheduler over `graph` (§4.5).
///
/// # Errors
///
/// Returns [`LanternError::SimulationBudgetExceeded`] if the step loop
/// exceeds `settings.max_simulation_iterations`, or
/// [`LanternError::GraphCycle`] if the graph cannot be fully scheduled
/// (a defensive check — `build_graph` never produces a cyclic graph).
#[instrument(skip(graph), fields(nodes = graph.len()))]
pub fn simulate(graph: &Graph, settings: &Settings) -> Result<SimulationOutput, LanternError> {
    let records: Vec<_> = graph.network_records().cloned().collect();
    let (rtt_by_origin, warnings) = estimate_rtt_per_origin(&records, settings);
    let server_time_by_origin = estimate_server_response_time_per_origin(&records, &rtt_by_origin);
    let default_rtt = settings
        .default_rtt()
        .unwrap_or_else(|_| RttMs::try_new(1.0).expect("1.0 is a valid rtt"));

    let mut pool = ConnectionPool::new(settings);
    let node_count = graph.len();
    let mut remaining_deps: Vec<usize> = graph
        .node_ids()
        .map(|id| graph.dependencies(id).len())
        .collect();
    let mut timings: HashMap<NodeId, NodeTiming> = HashMap::with_capacity(node_count);
    let mut ready: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| remaining_deps[id.into_inner()] == 0)
        .collect();
    let mut events: BinaryHeap<std::cmp::Reverse<FinishEvent>> = BinaryHeap::new();
    let mut now = Milliseconds::zero();
    let mut cpu_busy_until = Milliseconds::zero();
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        if iterations > settings.max_simulation_iterations {
            return Err(LanternError::SimulationBudgetExceeded {
                budget: settings.max_simulation_iterations,
            });
        }

        ready.sort_by(|&a, &b| tie_break(graph, a, b));
        for id in ready.drain(..) {
            let event = match graph.node(id) {
                Node::Cpu(task) => {
                    let start = now.max(cpu_busy_until);
                    let duration = task.duration.scale(settings.cpu_slowdown_multiplier);
                    let finish = start.add(duration);
                    cpu_busy_until = finish;
                    FinishEvent {
                        finish_time: finish,
                        node: id,
                        start_time: start,
                        kind: EventKind::Cpu,
                    }
                }
                Node::Network(record) => {
                    if record.is_instantaneous() {
                        FinishEvent {
                            finish_time: now,
                            node: id,
                            start_time: now,
                            kind: EventKind::Network { connection: None },
                        }
                    } else {
                        let rtt = rtt_by_origin
                            .get(&record.origin)
                            .copied()
                            .unwrap_or(default_rtt);
                        let server_time = server_time_by_origin
                            .get(&record.origin)
                            .copied()
                            .unwrap_or_default();
                        let (connection, ready_time) =
                            pool.acquire(&record.origin, record.protocol, now, rtt);
                        let transfer_start = ready_time.add(server_response_duration(server_time));
                        let finish = pool.advance(connection, record.transfer_size, transfer_start, rtt);
                        FinishEvent {
                            finish_time: finish,
                            node: id,
                            start_time: ready_time,
                            kind: EventKind::Network {
                                connection: Some(connection),
                            },
                        }
                    }
                }
            };
            events.push(std::cmp::Reverse(event));
        }

        let Some(std::cmp::Reverse(event)) = events.pop() else {
            break;
        };
        now = event.finish_time;
        timings.insert(
            event.node,
            NodeTiming {
                start_ms: event.start_time,
                end_ms: event.finish_time,
            },
        );
        if let EventKind::Network {
            connection: Some(connection),
        } = event.kind
        {
            pool.release(connection, event.finish_time);
        }
        for &dependant in graph.dependants(event.node) {
            let degree = &mut remaining_deps[dependant.into_inner()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependant);
            }
        }
    }

    if timings.len() != node_count {
        let stuck = graph
            .node_ids()
            .find(|id| !timings.contains_key(id))
            .expect("timings.len() != node_count implies an unfinished node exists");
        return Err(LanternError::GraphCycle { node: stuck });
    }

    let time_in_ms = timings
        .values()
        .map(|t| t.end_ms)
        .fold(Milliseconds::zero(), Milliseconds::max);

    info!(nodes = node_count, time_in_ms = time_in_ms.as_f64(), "simulation complete");
    Ok(SimulationOutput {
        node_timings: timings,
        time_in_ms,
        warnings,
    })
}

fn server_response_duration(value: ServerResponseTimeMs) -> Milliseconds {
    Milliseconds::try_new(value.as_f64()).unwrap_or_default()
}

/// Tie-break ordering for nodes competing for a scarce resource (§4.5
/// "Tie-breaks"): critical nodes first, then by recorded original start
/// time, then by node id.
fn tie_break(graph: &Graph, a: NodeId, b: NodeId) -> Ordering {
    graph
        .is_critical(b)
        .cmp(&graph.is_critical(a))
        .then_with(|| original_start(graph, a).total_cmp(&original_start(graph, b)))
        .then_with(|| a.cmp(&b))
}

fn original_start(graph: &Graph, id: NodeId) -> f64 {
    match graph.node(id) {
        Node::Network(record) => record
            .timing
            .as_ref()
            .map_or(0.0, |t| t.request_sent.as_f64()),
        Node::Cpu(task) => task.start_time.as_f64(),
    }
}
