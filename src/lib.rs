//! # lantern - page-load performance simulator
//!
//! `lantern` estimates how long a web page takes to load without
//! loading it: given a recorded network log and main-thread trace, it
//! reconstructs the dependency graph between requests and CPU work,
//! then walks that graph through a discrete-event scheduler modelling
//! connection pooling, congestion control and server response time to
//! produce First Contentful Paint, Largest Contentful Paint and Time
//! to Interactive estimates — plus "how much would fixing this
//! resource help" opportunity pricing.
//!
//! ## Pipeline
//!
//! 1. [`log_reader::read_log`] turns a recorded protocol event stream
//!    into [`record::RequestRecord`]s.
//! 2. [`graph::builder::build_graph`] resolves initiator and redirect
//!    edges into a [`graph::Graph`].
//! 3. [`simulator::simulate`] walks the graph, producing a
//!    [`simulator::SimulationOutput`].
//! 4. [`metrics`] derives FCP/LCP/TTI from that output, and
//!    [`metrics::compute_savings`] prices hypothetical byte savings.
//!
//! Every stage is parameterised by one [`settings::Settings`] record;
//! the crate owns no CLI, file format, or environment variable surface
//! of its own — a host application reads whatever configuration it
//! likes and passes in a `Settings` value.

pub mod analyzer;
pub mod connection;
pub mod error;
pub mod graph;
pub mod log_reader;
pub mod metrics;
pub mod record;
pub mod settings;
pub mod simulator;
pub mod trace;
pub mod units;

pub use crate::error::{LanternError, LanternWarning};
pub use crate::graph::builder::build_graph;
pub use crate::graph::{critical_chain, Graph};
pub use crate::metrics::{compute_savings, Metric, SavingsReport};
pub use crate::settings::Settings;
pub use crate::simulator::{simulate, NodeTiming, SimulationOutput};
