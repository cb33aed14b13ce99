//! Property-based tests for the invariants named in the simulator's
//! design spec (§8): determinism, acyclicity, redirect preservation,
//! the per-origin HTTP/1.1 concurrency cap, critical-chain containment,
//! and monotonicity of simulated timing under a byte-size shrink.

use std::collections::HashMap;

use lantern::graph::builder::build_graph;
use lantern::metrics::{compute_savings, Metric};
use lantern::record::{
    CacheProvenance, Initiator, Priority, Protocol, RequestRecord, ResourceType, Timing,
};
use lantern::simulate;
use lantern::units::{Bytes, Milliseconds, RequestId};
use lantern::Settings;
use proptest::prelude::*;

fn ms(v: f64) -> Milliseconds {
    Milliseconds::try_new(v).unwrap()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.default_rtt_ms = 40.0;
    settings
}

fn root_document(size: u64) -> RequestRecord {
    RequestRecord {
        index: 0,
        request_id: RequestId::try_new("root".to_string()).unwrap(),
        url: "https://a.test/".to_string(),
        origin: "https://a.test".to_string(),
        resource_type: ResourceType::Document,
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
        transfer_size: Bytes::try_new(size).unwrap(),
        resource_size: Bytes::try_new(size).unwrap(),
        failed: None,
        cache_provenance: CacheProvenance::None,
        frame_id: "main".to_string(),
        is_root_frame: true,
    }
}

fn sub_resource(index: usize, size: u64, send_at: f64) -> RequestRecord {
    RequestRecord {
        index,
        request_id: RequestId::try_new(format!("r{index}")).unwrap(),
        url: format!("https://a.test/r{index}.png"),
        origin: "https://a.test".to_string(),
        resource_type: ResourceType::Image,
        protocol: Protocol::H1,
        initiator: Initiator::Parser,
        redirect_source: None,
        priority: Priority::Low,
        timing: Some(Timing {
            request_sent: ms(send_at),
            dns_start: None,
            dns_end: None,
            connect_start: None,
            connect_end: None,
            tls_start: None,
            tls_end: None,
            send_end: ms(send_at),
            response_headers_received: ms(send_at),
            response_finished: ms(send_at),
        }),
        transfer_size: Bytes::try_new(size).unwrap(),
        resource_size: Bytes::try_new(size).unwrap(),
        failed: None,
        cache_provenance: CacheProvenance::None,
        frame_id: "main".to_string(),
        is_root_frame: true,
    }
}

prop_compose! {
    fn arb_page()(
        root_size in 1_000u64..200_000,
        sub_sizes in prop::collection::vec(0u64..200_000, 0..6),
    ) -> (Vec<RequestRecord>, Vec<u64>) {
        let mut records = vec![root_document(root_size)];
        for (i, size) in sub_sizes.iter().enumerate() {
            records.push(sub_resource(i + 1, *size, 10.0 * (i as f64 + 1.0)));
        }
        (records, sub_sizes)
    }
}

/// One hop of a redirect chain: `redirect_from` names the index of the
/// hop it was redirected from, or `None` for the chain's first request.
fn redirect_hop(index: usize, url: &str, sent_at: f64, redirect_from: Option<usize>) -> RequestRecord {
    RequestRecord {
        index,
        request_id: RequestId::try_new("doc".to_string()).unwrap(),
        url: url.to_string(),
        origin: "https://a.test".to_string(),
        resource_type: ResourceType::Document,
        protocol: Protocol::H1,
        initiator: if redirect_from.is_some() {
            Initiator::Redirect
        } else {
            Initiator::Parser
        },
        redirect_source: redirect_from.map(|i| lantern::record::RedirectLink {
            index: i,
            status: Some(302),
        }),
        priority: Priority::VeryHigh,
        timing: Some(Timing {
            request_sent: ms(sent_at),
            dns_start: None,
            dns_end: None,
            connect_start: None,
            connect_end: None,
            tls_start: None,
            tls_end: None,
            send_end: ms(sent_at),
            response_headers_received: ms(sent_at),
            response_finished: ms(sent_at),
        }),
        transfer_size: Bytes::try_new(1_000).unwrap(),
        resource_size: Bytes::try_new(1_000).unwrap(),
        failed: None,
        cache_provenance: CacheProvenance::None,
        frame_id: "main".to_string(),
        is_root_frame: true,
    }
}

prop_compose! {
    fn arb_redirect_chain()(
        hop_count in 2usize..5,
        gaps in prop::collection::vec(1.0f64..500.0, 4),
    ) -> Vec<RequestRecord> {
        let mut records = Vec::with_capacity(hop_count);
        let mut t = 0.0;
        for i in 0..hop_count {
            let url = format!("https://a.test/hop{i}");
            let from = if i == 0 { None } else { Some(i - 1) };
            records.push(redirect_hop(i, &url, t, from));
            t += gaps[i % gaps.len()];
        }
        records
    }
}

proptest! {
    /// For any (graph, settings), running `simulate` twice yields
    /// byte-identical node timings.
    #[test]
    fn simulate_is_deterministic((records, _) in arb_page()) {
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let first = simulate(&graph, &settings).unwrap();
        let second = simulate(&graph, &settings).unwrap();
        prop_assert_eq!(first, second);
    }

    /// `build_graph` never produces a cycle: a topological order exists
    /// and visits every node exactly once (§3 "acyclic").
    #[test]
    fn built_graphs_are_always_acyclic((records, _) in arb_page()) {
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        prop_assert_eq!(graph.topological_order().len(), graph.len());
    }

    /// Every hop of a redirect chain finishes strictly after the hop
    /// that redirected to it, regardless of chain length or gap timing
    /// (§8 "redirect preservation").
    #[test]
    fn redirect_chain_hops_finish_in_order(records in arb_redirect_chain()) {
        let settings = settings();
        let root_url = records[0].url.clone();
        let graph = build_graph(&records, &[], &root_url, &settings).unwrap();
        let output = simulate(&graph, &settings).unwrap();

        let mut end_times = Vec::with_capacity(records.len());
        for record in &records {
            let id = graph
                .node_ids()
                .find(|&id| graph.node(id).as_network().is_some_and(|r| r.url == record.url))
                .unwrap();
            end_times.push(output.node_timings()[&id].end_ms.as_f64());
        }
        for window in end_times.windows(2) {
            prop_assert!(window[1] > window[0]);
        }
    }

    /// At no simulated instant do more same-origin HTTP/1.1 requests
    /// overlap than `Settings::max_http1_connections_per_origin` allows
    /// (§8 "concurrency cap").
    #[test]
    fn h1_concurrency_never_exceeds_the_per_origin_cap((records, _) in arb_page()) {
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let output = simulate(&graph, &settings).unwrap();

        let mut events: Vec<(f64, i32)> = Vec::new();
        for id in graph.node_ids() {
            let Some(record) = graph.node(id).as_network() else {
                continue;
            };
            if record.protocol != Protocol::H1 || record.is_instantaneous() {
                continue;
            }
            let timing = &output.node_timings()[&id];
            events.push((timing.start_ms.as_f64(), 1));
            events.push((timing.end_ms.as_f64(), -1));
        }
        // Ties are processed release-before-acquire: a connection freed
        // at exactly the instant another is acquired never counts as a
        // simultaneous overlap.
        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut concurrent = 0i32;
        let mut peak = 0i32;
        for (_, delta) in events {
            concurrent += delta;
            peak = peak.max(concurrent);
        }
        prop_assert!(peak <= i32::from(settings.max_http1_connections_per_origin));
    }

    /// Every critical node other than the root has at least one critical
    /// dependency — criticality only ever propagates through an
    /// unbroken chain of critical predecessors (§4.3 step 6, §8
    /// "critical containment").
    #[test]
    fn critical_nodes_are_reachable_through_critical_predecessors((records, _) in arb_page()) {
        let settings = settings();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        for id in graph.node_ids() {
            if id == graph.root() || !graph.is_critical(id) {
                continue;
            }
            let has_critical_predecessor = graph
                .dependencies(id)
                .iter()
                .any(|&dep| graph.is_critical(dep));
            prop_assert!(has_critical_predecessor);
        }
    }

    /// Shrinking any subset of resources' transfer sizes never makes
    /// First Contentful Paint simulate later than before.
    #[test]
    fn shrinking_bytes_never_increases_fcp(
        (records, sub_sizes) in arb_page(),
        shrink_fraction in 0.0f64..1.0,
    ) {
        let settings = settings();
        let mut graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();

        let mut wasted = HashMap::new();
        for (i, size) in sub_sizes.iter().enumerate() {
            let saved = (*size as f64 * shrink_fraction) as u64;
            if saved > 0 {
                wasted.insert(format!("https://a.test/r{}.png", i + 1), Bytes::try_new(saved).unwrap());
            }
        }

        let report = compute_savings(&mut graph, &wasted, &settings, Metric::Fcp).unwrap();
        prop_assert!(report.after_ms.as_f64() <= report.before_ms.as_f64() + 1e-6);
    }
}
