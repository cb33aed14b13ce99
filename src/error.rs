//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum for every unrecoverable condition named
//! in the distilled spec (§7): `MalformedLog`, `GraphCycle`,
//! `MissingMainDocument`, `SimulationBudgetExceeded`. `UnknownOrigin` is
//! deliberately *not* a variant here — it is a warning, never raised as
//! a failure, and lives instead in [`LanternWarning`].

use crate::units::NodeId;
use thiserror::Error;

/// Errors surfaced by the simulator's public entry points.
///
/// Every variant carries enough context to reproduce the failure
/// without re-running the whole pipeline: the offending node, origin,
/// or iteration count.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LanternError {
    /// The recorded protocol event stream is self-contradictory: an
    /// event referenced an unknown request identifier, or timings
    /// within a record were not monotonic.
    #[error("malformed network log: {reason} (request id {request_id})")]
    MalformedLog {
        /// The request identifier the offending event named.
        request_id: String,
        /// What specifically was wrong.
        reason: String,
    },

    /// Building or scheduling the graph discovered a cycle.
    #[error("dependency cycle detected at node {node}")]
    GraphCycle {
        /// A node known to lie on the cycle.
        node: NodeId,
    },

    /// The network log contained no `Document` request, so no root node
    /// could be established.
    #[error("no main document request found in network log")]
    MissingMainDocument,

    /// The discrete-event step loop exceeded its configured iteration
    /// cap without reaching a fixed point.
    #[error("simulation exceeded its iteration budget of {budget} steps")]
    SimulationBudgetExceeded {
        /// The configured cap that was exceeded.
        budget: usize,
    },
}

/// A non-fatal condition recorded alongside a successful result, per
/// the distilled spec's output warnings side-channel (§7).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LanternWarning {
    /// The origin the analyzer could not estimate an RTT for.
    pub origin: String,
    /// The default RTT substituted in its place.
    pub fallback_rtt_ms: f64,
}
