//! The request graph builder (§4.3): turns a flat list of request
//! records and main-thread tasks into the DAG the simulator walks.

use tracing::{debug, instrument, warn};

use crate::analyzer::{finish_time, find_main_document, send_time};
use crate::error::LanternError;
use crate::graph::{Graph, Node};
use crate::record::{Initiator, RequestRecord, ResourceType};
use crate::settings::Settings;
use crate::trace::TaskRecord;
use crate::units::NodeId;

/// Builds the request graph from a network-log reader's output plus a
/// segmented main-thread trace (§4.3).
///
/// # Errors
///
/// Returns [`LanternError::MissingMainDocument`] if `records` contains
/// no root-frame `Document` record matching (or falling back to)
/// `root_url`.
#[instrument(skip(records, tasks), fields(records = records.len(), tasks = tasks.len()))]
pub fn build_graph(
    records: &[RequestRecord],
    tasks: &[TaskRecord],
    root_url: &str,
    settings: &Settings,
) -> Result<Graph, LanternError> {
    let root_record = find_main_document(records, root_url).ok_or(LanternError::MissingMainDocument)?;

    let mut graph = Graph::new(Vec::new(), NodeId::try_new(0).expect("0 is a valid node id"));

    // §4.3 step 1: seed a network node per request record (cache-hit and
    // data/blob records are seeded too, since they still participate in
    // dependency ordering — they are scheduled as zero-cost nodes, §4.5
    // edge-case policies — and a single CPU node per task that clears
    // the configured minimum duration.
    let mut network_ids: Vec<NodeId> = Vec::with_capacity(records.len());
    let mut root_id = None;
    for record in records {
        let id = graph.add_node(Node::Network(record.clone()));
        network_ids.push(id);
        if record.index == root_record.index {
            root_id = Some(id);
        }
    }
    let root_id = root_id.expect("root_record is drawn from records");

    let mut cpu_ids: Vec<Option<NodeId>> = Vec::with_capacity(tasks.len());
    for task in tasks {
        if task.duration.as_f64() >= settings.min_task_duration_ms {
            cpu_ids.push(Some(graph.add_node(Node::Cpu(task.clone()))));
        } else {
            cpu_ids.push(None);
        }
    }

    // §4.3 step 2: redirect chain edges — each hop depends on its
    // predecessor hop.
    for (i, record) in records.iter().enumerate() {
        if let Some(link) = &record.redirect_source {
            add_edge_guarded(&mut graph, network_ids[i], network_ids[link.index], root_id);
        }
    }

    // §4.3 step 3: initiator edges.
    for (i, record) in records.iter().enumerate() {
        if record.index == root_record.index {
            continue;
        }
        if record.redirect_source.is_some() {
            // Already covered by the redirect chain edge above.
            continue;
        }
        let dependency = resolve_initiator(
            records,
            &network_ids,
            tasks,
            &cpu_ids,
            settings,
            record,
        );
        let dependency = dependency.unwrap_or(root_id);
        add_edge_guarded(&mut graph, network_ids[i], dependency, root_id);
    }

    // §4.3 step 4: CPU-to-network edges. A CPU node depends on every
    // prior network node whose response was available before the task
    // started.
    for (i, task) in tasks.iter().enumerate() {
        let Some(cpu_id) = cpu_ids[i] else {
            continue;
        };
        for (j, record) in records.iter().enumerate() {
            if finish_time(record).as_f64() <= task.start_time.as_f64() {
                add_edge_guarded(&mut graph, cpu_id, network_ids[j], root_id);
            }
        }
    }

    label_critical(&mut graph, root_id);

    debug!(nodes = graph.len(), "graph built");
    Ok(graph)
}

fn add_edge_guarded(graph: &mut Graph, dependent: NodeId, dependency: NodeId, root: NodeId) {
    if dependent == dependency {
        return;
    }
    // §4.3 step 5: reject any edge that would close a cycle, falling
    // back to a dependency on the root document. The fallback itself is
    // re-checked: if the root is already (transitively) a dependent of
    // this node — possible when a caller's `root_url` resolves to a
    // record later in a redirect chain than this one — depending on it
    // too would close a cycle just as surely, so the edge is dropped
    // entirely rather than corrupting the graph's acyclicity invariant.
    if graph.would_cycle(dependent, dependency) {
        warn!(?dependent, ?dependency, "initiator edge would cycle, falling back to root");
        if dependent != root && !graph.would_cycle(dependent, root) {
            graph.add_edge(dependent, root);
        }
        return;
    }
    graph.add_edge(dependent, dependency);
}

fn resolve_initiator(
    records: &[RequestRecord],
    network_ids: &[NodeId],
    tasks: &[TaskRecord],
    cpu_ids: &[Option<NodeId>],
    settings: &Settings,
    record: &RequestRecord,
) -> Option<NodeId> {
    match &record.initiator {
        Initiator::Parser | Initiator::Preload => resolve_parser_initiator(records, network_ids, record),
        Initiator::Script { url } => resolve_script_initiator(
            records, network_ids, tasks, cpu_ids, settings, record, url,
        )
        .or_else(|| resolve_parser_initiator(records, network_ids, record)),
        Initiator::Redirect => None,
    }
}

/// Finds the most recent network node in the same frame whose resource
/// type is HTML/CSS and whose finish time precedes this request's send
/// time (§4.3 step 3, "Parser").
fn resolve_parser_initiator(
    records: &[RequestRecord],
    network_ids: &[NodeId],
    record: &RequestRecord,
) -> Option<NodeId> {
    let send = send_time(record);
    records
        .iter()
        .enumerate()
        .filter(|(_, candidate)| {
            candidate.index != record.index
                && candidate.frame_id == record.frame_id
                && matches!(
                    candidate.resource_type,
                    ResourceType::Document | ResourceType::Stylesheet
                )
                && finish_time(candidate).as_f64() <= send.as_f64()
        })
        .max_by(|(_, a), (_, b)| finish_time(a).as_f64().total_cmp(&finish_time(b).as_f64()))
        .map(|(i, _)| network_ids[i])
}

/// Resolves a script-initiated request to the network node that
/// fetched the script, or, failing that, the nearest preceding CPU node
/// that executed it (§4.3 step 3, "Script").
fn resolve_script_initiator(
    records: &[RequestRecord],
    network_ids: &[NodeId],
    tasks: &[TaskRecord],
    cpu_ids: &[Option<NodeId>],
    settings: &Settings,
    record: &RequestRecord,
    script_url: &str,
) -> Option<NodeId> {
    if let Some((i, _)) = records
        .iter()
        .enumerate()
        .find(|(_, candidate)| candidate.url == script_url)
    {
        return Some(network_ids[i]);
    }

    let send = send_time(record);
    tasks
        .iter()
        .enumerate()
        .filter(|(i, task)| {
            cpu_ids[*i].is_some()
                && task.touches_script(script_url)
                && task.end_time().as_f64() <= send.as_f64()
                && task.duration.as_f64() >= settings.min_task_duration_ms
        })
        .max_by(|(_, a), (_, b)| a.end_time().as_f64().total_cmp(&b.end_time().as_f64()))
        .and_then(|(i, _)| cpu_ids[i])
}

/// Walks the graph in topological order labelling critical nodes (§4.3
/// step 6). A node is critical iff it is the root, or it has at least
/// one critical predecessor and is either High/VeryHigh priority or a
/// render-blocking resource type — criticality propagates only through
/// already-critical predecessors, never skipping a non-critical one.
fn label_critical(graph: &mut Graph, root: NodeId) {
    graph.set_critical(root, true);
    for id in graph.topological_order() {
        if id == root {
            continue;
        }
        let has_critical_predecessor = graph
            .dependencies(id)
            .iter()
            .any(|&dep| graph.is_critical(dep));
        if !has_critical_predecessor {
            continue;
        }
        let qualifies = match graph.node(id).as_network() {
            Some(record) => record.is_render_blocking() || record.priority.is_critical(),
            None => false, // CPU nodes never qualify as critical on their own
        };
        graph.set_critical(id, qualifies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CacheProvenance, FailureReason, Priority, Protocol, Timing};
    use crate::units::{Bytes, Milliseconds, RequestId};

    fn ms(v: f64) -> Milliseconds {
        Milliseconds::try_new(v).unwrap()
    }

    fn timing(sent: f64, headers: f64, finished: f64) -> Timing {
        Timing {
            request_sent: ms(sent),
            dns_start: None,
            dns_end: None,
            connect_start: None,
            connect_end: None,
            tls_start: None,
            tls_end: None,
            send_end: ms(sent),
            response_headers_received: ms(headers),
            response_finished: ms(finished),
        }
    }

    fn doc(index: usize, url: &str, t: Timing) -> RequestRecord {
        RequestRecord {
            index,
            request_id: RequestId::try_new(index.to_string()).unwrap(),
            url: url.to_string(),
            origin: "https://a.test".to_string(),
            resource_type: ResourceType::Document,
            protocol: Protocol::H1,
            initiator: Initiator::Parser,
            redirect_source: None,
            priority: Priority::VeryHigh,
            timing: Some(t),
            transfer_size: Bytes::try_new(5_000).unwrap(),
            resource_size: Bytes::try_new(5_000).unwrap(),
            failed: None,
            cache_provenance: CacheProvenance::None,
            frame_id: "main".to_string(),
            is_root_frame: true,
        }
    }

    fn css(index: usize, url: &str, t: Timing) -> RequestRecord {
        RequestRecord {
            resource_type: ResourceType::Stylesheet,
            priority: Priority::VeryHigh,
            ..doc(index, url, t)
        }
    }

    #[test]
    fn missing_main_document_errors() {
        let settings = Settings::default();
        let err = build_graph(&[], &[], "https://a.test/", &settings).unwrap_err();
        assert!(matches!(err, LanternError::MissingMainDocument));
    }

    #[test]
    fn single_document_graph_has_one_critical_root() {
        let records = vec![doc(0, "https://a.test/", timing(0.0, 50.0, 100.0))];
        let settings = Settings::default();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.is_critical(graph.root()));
    }

    #[test]
    fn css_parser_initiated_depends_on_document_and_is_critical() {
        let records = vec![
            doc(0, "https://a.test/", timing(0.0, 50.0, 100.0)),
            css(1, "https://a.test/style.css", timing(100.0, 150.0, 200.0)),
        ];
        let settings = Settings::default();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let css_id = graph
            .node_ids()
            .find(|&id| {
                graph
                    .node(id)
                    .as_network()
                    .is_some_and(|r| r.resource_type == ResourceType::Stylesheet)
            })
            .unwrap();
        assert_eq!(graph.dependencies(css_id), &[graph.root()]);
        assert!(graph.is_critical(css_id));
    }

    #[test]
    fn unreachable_initiator_falls_back_to_root() {
        let mut script = doc(1, "https://a.test/a.js", timing(0.0, 10.0, 20.0));
        script.resource_type = ResourceType::Script;
        script.initiator = Initiator::Script {
            url: "https://a.test/missing.js".to_string(),
        };
        script.priority = Priority::Low;
        let records = vec![doc(0, "https://a.test/", timing(0.0, 50.0, 100.0)), script];
        let settings = Settings::default();
        let graph = build_graph(&records, &[], "https://a.test/", &settings).unwrap();
        let script_id = graph
            .node_ids()
            .find(|&id| {
                graph
                    .node(id)
                    .as_network()
                    .is_some_and(|r| r.resource_type == ResourceType::Script)
            })
            .unwrap();
        assert_eq!(graph.dependencies(script_id), &[graph.root()]);
    }

    #[test]
    fn unused_failure_reason_compiles() {
        let _ = FailureReason("x".to_string());
    }
}
