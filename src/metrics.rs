//! Metric computers (§4.6): derive first contentful paint, largest
//! contentful paint, and time to interactive from a completed
//! simulation, plus the opportunity-savings pricing model shared by
//! every "how much would fixing this resource help" calculation.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::LanternError;
use crate::graph::{critical_chain, Graph, Node};
use crate::settings::Settings;
use crate::simulator::{simulate, SimulationOutput};
use crate::units::{Bytes, Milliseconds, NodeId};

/// The simulated finish time of the last render-blocking node on the
/// critical chain — the document itself, plus any blocking stylesheet
/// or synchronous script (§4.6 "First Contentful Paint").
///
/// Falls back to the root document's own finish time when the chain
/// carries no other render-blocking resource.
#[must_use]
pub fn first_contentful_paint(graph: &Graph, output: &SimulationOutput) -> Milliseconds {
    critical_chain(graph)
        .into_iter()
        .filter_map(|id| {
            let record = graph.node(id).as_network()?;
            let blocks_paint = record.resource_type == crate::record::ResourceType::Document
                || record.is_render_blocking();
            blocks_paint
                .then(|| output.node_timings().get(&id).map(|t| t.end_ms))
                .flatten()
        })
        .fold(Milliseconds::zero(), Milliseconds::max)
}

/// The simulated finish time of the node identified as the largest
/// contentful paint candidate (§4.6 "Largest Contentful Paint").
///
/// `candidate` is the network node fetching the LCP image, when the
/// page's LCP element is an image; `None` means the LCP element is
/// text painted as part of the document itself, so LCP coincides with
/// the document's own finish time. Identifying the candidate from a
/// rendering trace is outside this module's scope (§1 "Non-goals") —
/// the caller supplies it.
#[must_use]
pub fn largest_contentful_paint(
    graph: &Graph,
    output: &SimulationOutput,
    candidate: Option<NodeId>,
) -> Milliseconds {
    match candidate {
        Some(id) => output
            .node_timings()
            .get(&id)
            .map_or_else(Milliseconds::zero, |t| t.end_ms),
        None => output
            .node_timings()
            .get(&graph.root())
            .map_or_else(Milliseconds::zero, |t| t.end_ms),
    }
}

/// The earliest point at which the page is interactive (§4.6 "Time to
/// Interactive"): the first time at or after first contentful paint
/// that opens a quiet window — no CPU task of at least
/// `settings.tti_long_task_threshold_ms` starts within the following
/// `settings.tti_quiet_window_ms`, and at no instant in that window do
/// more than `settings.tti_max_in_flight_critical_requests` critical
/// network requests overlap.
///
/// Falls back to the overall simulated finish time if no such window
/// exists before the simulation ends.
#[must_use]
pub fn time_to_interactive(graph: &Graph, output: &SimulationOutput, settings: &Settings) -> Milliseconds {
    let fcp = first_contentful_paint(graph, output).as_f64();
    let quiet_window = settings.tti_quiet_window_ms;
    let long_task_threshold = settings.tti_long_task_threshold_ms;
    let cap = settings.tti_max_in_flight_critical_requests;

    let mut long_task_starts: Vec<f64> = Vec::new();
    let mut critical_intervals: Vec<(f64, f64)> = Vec::new();
    let mut candidates: Vec<f64> = vec![fcp];

    for id in graph.node_ids() {
        let Some(timing) = output.node_timings().get(&id) else {
            continue;
        };
        match graph.node(id) {
            Node::Cpu(_) => {
                let duration = timing.end_ms.as_f64() - timing.start_ms.as_f64();
                if duration >= long_task_threshold {
                    long_task_starts.push(timing.start_ms.as_f64());
                }
            }
            Node::Network(_) => {
                if graph.is_critical(id) {
                    critical_intervals.push((timing.start_ms.as_f64(), timing.end_ms.as_f64()));
                }
            }
        }
        if timing.end_ms.as_f64() >= fcp {
            candidates.push(timing.end_ms.as_f64());
        }
    }
    candidates.sort_by(f64::total_cmp);
    candidates.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

    for candidate in candidates {
        if candidate < fcp {
            continue;
        }
        let window_end = candidate + quiet_window;
        let no_long_task = !long_task_starts
            .iter()
            .any(|&start| start >= candidate && start < window_end);
        let concurrency = max_overlap(&critical_intervals, candidate, window_end);
        if no_long_task && concurrency <= cap {
            return Milliseconds::try_new(candidate).unwrap_or_default();
        }
    }

    output.time_in_ms()
}

/// Counts the maximum number of `intervals` overlapping at any single
/// instant within `[window_start, window_end)`, via a sweep over
/// clamped interval endpoints.
fn max_overlap(intervals: &[(f64, f64)], window_start: f64, window_end: f64) -> usize {
    let mut edges: Vec<(f64, i32)> = Vec::with_capacity(intervals.len() * 2);
    for &(start, end) in intervals {
        let clamped_start = start.max(window_start);
        let clamped_end = end.min(window_end);
        if clamped_start < clamped_end {
            edges.push((clamped_start, 1));
            edges.push((clamped_end, -1));
        }
    }
    edges.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut concurrent = 0i32;
    let mut peak = 0i32;
    for (_, delta) in edges {
        concurrent += delta;
        peak = peak.max(concurrent);
    }
    peak.max(0) as usize
}

/// Which metric [`compute_savings`] should evaluate before and after
/// mutation (§6 `computeSavings`).
#[derive(Debug, Clone, Copy)]
pub enum Metric {
    /// First Contentful Paint.
    Fcp,
    /// Largest Contentful Paint, against the given candidate node (see
    /// [`largest_contentful_paint`]).
    Lcp {
        /// The LCP candidate node, if the page's LCP element is an
        /// image.
        candidate: Option<NodeId>,
    },
    /// Time to Interactive.
    Tti,
}

/// The result of one [`compute_savings`] run: the metric's value before
/// and after the hypothetical byte reduction, and the savings, rounded
/// to the nearest 10ms per the opportunity-pricing contract (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavingsReport {
    /// The metric's simulated value before mutation.
    pub before_ms: Milliseconds,
    /// The metric's simulated value after mutation.
    pub after_ms: Milliseconds,
    /// `before_ms - after_ms`, rounded to the nearest 10ms.
    pub wasted_ms: Milliseconds,
}

/// Estimates the metric improvement available from shaving
/// `wasted_bytes_by_url` off the matching requests' transfer sizes
/// (§4.6 "Opportunity byte-savings pricing"): simulate once as a
/// baseline, mutate transfer sizes in place, re-simulate, then restore
/// the graph to its original state before returning (§8 "Idempotence").
///
/// # Errors
///
/// Propagates any error from either simulation run.
#[instrument(skip(graph, wasted_bytes_by_url))]
pub fn compute_savings(
    graph: &mut Graph,
    wasted_bytes_by_url: &std::collections::HashMap<String, Bytes>,
    settings: &Settings,
    metric: Metric,
) -> Result<SavingsReport, LanternError> {
    let before_output = simulate(graph, settings)?;
    let before_ms = metric_value(graph, &before_output, metric, settings);

    let mut snapshots: Vec<(NodeId, Bytes)> = Vec::new();
    for id in graph.node_ids() {
        let Some(url) = graph.node(id).as_network().map(|r| r.url.clone()) else {
            continue;
        };
        let Some(&saved) = wasted_bytes_by_url.get(&url) else {
            continue;
        };
        if let Some(record) = graph.node_mut(id).as_network_mut() {
            snapshots.push((id, record.transfer_size));
            record.transfer_size = record.transfer_size.saturating_sub(saved);
        }
    }

    let after_output = simulate(graph, settings)?;
    let after_ms = metric_value(graph, &after_output, metric, settings);

    for (id, original) in snapshots {
        if let Some(record) = graph.node_mut(id).as_network_mut() {
            record.transfer_size = original;
        }
    }

    let wasted_ms = before_ms.saturating_sub(after_ms).round_to_nearest_10();
    Ok(SavingsReport {
        before_ms,
        after_ms,
        wasted_ms,
    })
}

fn metric_value(graph: &Graph, output: &SimulationOutput, metric: Metric, settings: &Settings) -> Milliseconds {
    match metric {
        Metric::Fcp => first_contentful_paint(graph, output),
        Metric::Lcp { candidate } => largest_contentful_paint(graph, output, candidate),
        Metric::Tti => time_to_interactive(graph, output, settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::build_graph;
    use crate::record::{CacheProvenance, Initiator, Priority, Protocol, RequestRecord, ResourceType, Timing};
    use crate::units::RequestId;
    use std::collections::HashMap;

    fn ms(v: f64) -> Milliseconds {
        Milliseconds::try_new(v).unwrap()
    }

    fn document(index: usize, url: &str, bytes: u64, resource_type: ResourceType) -> RequestRecord {
        RequestRecord {
            index,
            request_id: RequestId::try_new(index.to_string()).unwrap(),
            url: url.to_string(),
            origin: "https://a.test".to_string(),
            resource_type,
            protocol: Protocol::H1,
            initiator: Initiator::Parser,
            redirect_source: None,
            priority: Priority::VeryHigh,
            timing: Some(Timing {
                request_sent: ms(0.0),
                dns_start: None,
                dns_end: None,
                connect_start: None,
                connect_end: None,
                tls_start: None,
                tls_end: None,
                send_end: ms(0.0),
                response_headers_received: ms(0.0),
                response_finished: ms(0.0),
            }),
            transfer_size: Bytes::try_new(bytes).unwrap(),
            resource_size: Bytes::try_new(bytes).unwrap(),
            failed: None,
            cache_provenance: CacheProvenance::None,
            frame_id: "main".to_string(),
            is_root_frame: true,
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.default_rtt_ms = 50.0;
        settings.tls_handshake_rtts = 1;
        settings
    }

    #[test]
    fn fcp_equals_document_finish_without_blocking_resources() {
        let records = vec![document(0, "https://a.test/", 10_000, ResourceType::Document)];
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let output = simulate(&graph, &settings).unwrap();
        let fcp = first_contentful_paint(&graph, &output);
        assert_eq!(fcp, output.time_in_ms());
    }

    #[test]
    fn lcp_with_no_candidate_equals_document_finish() {
        let records = vec![document(0, "https://a.test/", 10_000, ResourceType::Document)];
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let output = simulate(&graph, &settings).unwrap();
        let lcp = largest_contentful_paint(&graph, &output, None);
        assert_eq!(lcp, output.node_timings()[&graph.root()].end_ms);
    }

    #[test]
    fn tti_falls_back_to_total_time_without_a_quiet_window() {
        let records = vec![document(0, "https://a.test/", 10_000, ResourceType::Document)];
        let mut settings = settings();
        settings.tti_quiet_window_ms = 5_000.0;
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let output = simulate(&graph, &settings).unwrap();
        let tti = time_to_interactive(&graph, &output, &settings);
        assert_eq!(tti, output.time_in_ms());
    }

    #[test]
    fn compute_savings_reduces_fcp_when_document_shrinks() {
        let records = vec![document(0, "https://a.test/", 100_000, ResourceType::Document)];
        let settings = settings();
        let mut graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let mut wasted = HashMap::new();
        wasted.insert("https://a.test/".to_string(), Bytes::try_new(90_000).unwrap());
        let report = compute_savings(&mut graph, &wasted, &settings, Metric::Fcp).unwrap();
        assert!(report.after_ms.as_f64() <= report.before_ms.as_f64());
        assert!(report.wasted_ms.as_f64() >= 0.0);
    }

    #[test]
    fn compute_savings_restores_original_graph_state() {
        let records = vec![document(0, "https://a.test/", 100_000, ResourceType::Document)];
        let settings = settings();
        let mut graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let original = graph.node(graph.root()).as_network().unwrap().transfer_size;
        let mut wasted = HashMap::new();
        wasted.insert("https://a.test/".to_string(), Bytes::try_new(90_000).unwrap());
        let _ = compute_savings(&mut graph, &wasted, &settings, Metric::Fcp).unwrap();
        let restored = graph.node(graph.root()).as_network().unwrap().transfer_size;
        assert_eq!(original, restored);
    }

    #[test]
    fn max_overlap_counts_simultaneous_intervals() {
        let intervals = vec![(0.0, 10.0), (5.0, 15.0), (20.0, 30.0)];
        assert_eq!(max_overlap(&intervals, 0.0, 30.0), 2);
    }
}
