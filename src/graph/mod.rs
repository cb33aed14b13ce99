//! The request graph (§3, §4.3): a rooted DAG of network and CPU nodes,
//! owned by a single arena so dependency/dependant relationships are
//! plain index pairs rather than reference-counted cycles (§9 "Arena
//! ownership").

pub mod builder;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::record::RequestRecord;
use crate::trace::TaskRecord;
use crate::units::NodeId;

/// One vertex in the request graph: either a network request or an
/// aggregated main-thread task (§3 "Graph node").
///
/// A tagged variant with exhaustive matching, not a trait object (§9
/// "Dynamic dispatch on node kind").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Wraps one request record.
    Network(RequestRecord),
    /// Wraps one aggregated main-thread task.
    Cpu(TaskRecord),
}

impl Node {
    /// The underlying request record, if this is a network node.
    #[must_use]
    pub fn as_network(&self) -> Option<&RequestRecord> {
        match self {
            Node::Network(record) => Some(record),
            Node::Cpu(_) => None,
        }
    }

    /// The underlying request record, mutably, if this is a network
    /// node. Used by opportunity pricing (§4.6) to mutate transfer
    /// sizes in place.
    pub fn as_network_mut(&mut self) -> Option<&mut RequestRecord> {
        match self {
            Node::Network(record) => Some(record),
            Node::Cpu(_) => None,
        }
    }

    /// The underlying task record, if this is a CPU node.
    #[must_use]
    pub fn as_cpu(&self) -> Option<&TaskRecord> {
        match self {
            Node::Cpu(task) => Some(task),
            Node::Network(_) => None,
        }
    }
}

/// One arena slot: a node plus its dependency/dependant edges and
/// whether the builder labelled it critical (§4.3 step 6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodeSlot {
    node: Node,
    dependencies: Vec<NodeId>,
    dependants: Vec<NodeId>,
    critical: bool,
}

/// The rooted DAG of network and CPU nodes produced by
/// [`builder::build_graph`] and consumed by the simulator and metric
/// computers.
///
/// *Invariants* (§3): acyclic; every node is reachable from the root;
/// every CPU node has at least one predecessor except one originating
/// on the main frame before any network activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    slots: Vec<NodeSlot>,
    root: NodeId,
}

impl Graph {
    pub(crate) fn new(slots: Vec<NodeSlot>, root: NodeId) -> Self {
        Self { slots, root }
    }

    /// The root node: the main-document network node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the graph has no nodes. Never true for a graph produced
    /// by `build_graph`, which always seeds at least the root document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The node at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not assigned by this graph's arena.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.slots[id.into_inner()].node
    }

    /// The node at `id`, mutably. Used by opportunity pricing (§4.6) to
    /// snapshot-and-restore a network node's transfer size.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not assigned by this graph's arena.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.slots[id.into_inner()].node
    }

    /// All node ids, in arena (insertion) order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.slots.len()).map(|i| NodeId::try_new(i).expect("arena index always valid"))
    }

    /// The dependencies (incoming edges / predecessors) of `id`.
    #[must_use]
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.into_inner()].dependencies
    }

    /// The dependants (outgoing edges / successors) of `id`.
    #[must_use]
    pub fn dependants(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.into_inner()].dependants
    }

    /// Whether `id` was labelled critical by the builder (§4.3 step 6).
    #[must_use]
    pub fn is_critical(&self, id: NodeId) -> bool {
        self.slots[id.into_inner()].critical
    }

    pub(crate) fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::try_new(self.slots.len()).expect("arena index always valid");
        self.slots.push(NodeSlot {
            node,
            dependencies: Vec::new(),
            dependants: Vec::new(),
            critical: false,
        });
        id
    }

    /// Adds a dependency edge: `dependent` depends on `dependency`
    /// (`dependency` must finish before `dependent` may start).
    ///
    /// No-op if the edge already exists or if `dependent == dependency`.
    pub(crate) fn add_edge(&mut self, dependent: NodeId, dependency: NodeId) {
        if dependent == dependency {
            return;
        }
        if !self.slots[dependent.into_inner()]
            .dependencies
            .contains(&dependency)
        {
            self.slots[dependent.into_inner()].dependencies.push(dependency);
        }
        if !self.slots[dependency.into_inner()]
            .dependants
            .contains(&dependent)
        {
            self.slots[dependency.into_inner()].dependants.push(dependent);
        }
    }

    /// Whether adding an edge `dependent` → depends-on → `dependency`
    /// would close a cycle, i.e. whether `dependency` already
    /// transitively depends on `dependent` (§4.3 step 5).
    #[must_use]
    pub(crate) fn would_cycle(&self, dependent: NodeId, dependency: NodeId) -> bool {
        if dependent == dependency {
            return true;
        }
        let mut stack = vec![dependency];
        let mut seen = vec![false; self.slots.len()];
        while let Some(current) = stack.pop() {
            if current == dependent {
                return true;
            }
            if seen[current.into_inner()] {
                continue;
            }
            seen[current.into_inner()] = true;
            stack.extend(self.slots[current.into_inner()].dependencies.iter().copied());
        }
        false
    }

    pub(crate) fn set_critical(&mut self, id: NodeId, critical: bool) {
        self.slots[id.into_inner()].critical = critical;
    }

    /// Visits every node exactly once in breadth-first topological order
    /// from the root, invoking `visit` with the node id and its
    /// initiator path — the sequence of node ids from the root to this
    /// node via the first-discovered dependency edge (§4.3
    /// "traverse").
    pub fn traverse(&self, mut visit: impl FnMut(NodeId, &[NodeId])) {
        let mut parent: Vec<Option<NodeId>> = vec![None; self.slots.len()];
        let mut visited = vec![false; self.slots.len()];
        let mut queue = VecDeque::new();
        queue.push_back(self.root);
        visited[self.root.into_inner()] = true;

        while let Some(current) = queue.pop_front() {
            let path = path_to(&parent, current);
            visit(current, &path);
            for &dependant in &self.slots[current.into_inner()].dependants {
                if !visited[dependant.into_inner()] {
                    visited[dependant.into_inner()] = true;
                    parent[dependant.into_inner()] = Some(current);
                    queue.push_back(dependant);
                }
            }
        }
    }

    /// Node ids in a topological order (every dependency precedes its
    /// dependants), suitable for critical-chain labelling and
    /// deterministic scheduling tie-breaks.
    #[must_use]
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self
            .slots
            .iter()
            .map(|slot| slot.dependencies.len())
            .collect();
        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| NodeId::try_new(i).expect("arena index always valid"))
            .collect();
        let mut order = Vec::with_capacity(self.slots.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for &dependant in &self.slots[id.into_inner()].dependants {
                let degree = &mut in_degree[dependant.into_inner()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependant);
                }
            }
        }
        order
    }

    /// All request records currently in the graph, in arena order. Used
    /// by the simulator to re-derive per-origin RTT/server-response
    /// estimates from whatever records the graph actually holds
    /// (including after opportunity-pricing mutation).
    pub fn network_records(&self) -> impl Iterator<Item = &RequestRecord> {
        self.slots.iter().filter_map(|slot| slot.node.as_network())
    }
}

fn path_to(parent: &[Option<NodeId>], mut node: NodeId) -> Vec<NodeId> {
    let mut path = vec![node];
    while let Some(p) = parent[node.into_inner()] {
        path.push(p);
        node = p;
    }
    path.reverse();
    path
}

/// The topologically ordered critical chain: every node id the builder
/// labelled critical, in topological order (§6 `criticalChain`).
#[must_use]
pub fn critical_chain(graph: &Graph) -> Vec<NodeId> {
    graph
        .topological_order()
        .into_iter()
        .filter(|&id| graph.is_critical(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        CacheProvenance, Initiator, Priority, Protocol, RequestRecord, ResourceType, Timing,
    };
    use crate::units::{Bytes, Milliseconds, RequestId};

    fn network_record(index: usize) -> RequestRecord {
        RequestRecord {
            index,
            request_id: RequestId::try_new(index.to_string()).unwrap(),
            url: format!("https://a.test/{index}"),
            origin: "https://a.test".to_string(),
            resource_type: ResourceType::Document,
            protocol: Protocol::H1,
            initiator: Initiator::Parser,
            redirect_source: None,
            priority: Priority::VeryHigh,
            timing: Some(Timing {
                request_sent: Milliseconds::zero(),
                dns_start: None,
                dns_end: None,
                connect_start: None,
                connect_end: None,
                tls_start: None,
                tls_end: None,
                send_end: Milliseconds::zero(),
                response_headers_received: Milliseconds::zero(),
                response_finished: Milliseconds::zero(),
            }),
            transfer_size: Bytes::zero(),
            resource_size: Bytes::zero(),
            failed: None,
            cache_provenance: CacheProvenance::None,
            frame_id: "main".to_string(),
            is_root_frame: true,
        }
    }

    #[test]
    fn would_cycle_detects_transitive_dependency() {
        let mut graph = Graph::new(Vec::new(), NodeId::try_new(0).unwrap());
        let a = graph.add_node(Node::Network(network_record(0)));
        let b = graph.add_node(Node::Network(network_record(1)));
        graph.add_edge(b, a); // b depends on a
        assert!(graph.would_cycle(a, b)); // a depends on b would close a cycle
        assert!(!graph.would_cycle(b, a));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let mut graph = Graph::new(Vec::new(), NodeId::try_new(0).unwrap());
        let a = graph.add_node(Node::Network(network_record(0)));
        let b = graph.add_node(Node::Network(network_record(1)));
        let c = graph.add_node(Node::Network(network_record(2)));
        graph.add_edge(b, a);
        graph.add_edge(c, b);
        let order = graph.topological_order();
        let pos = |id: NodeId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn critical_chain_filters_and_orders() {
        let mut graph = Graph::new(Vec::new(), NodeId::try_new(0).unwrap());
        let a = graph.add_node(Node::Network(network_record(0)));
        let b = graph.add_node(Node::Network(network_record(1)));
        graph.add_edge(b, a);
        graph.set_critical(a, true);
        let chain = critical_chain(&graph);
        assert_eq!(chain, vec![a]);
    }
}
