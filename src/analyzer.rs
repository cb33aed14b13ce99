//! The network analyzer (§4.2): pure statistical functions over a list
//! of request records, used by the connection pool and simulator to
//! parameterise a run when the caller has no explicit per-origin
//! measurement.

use std::collections::HashMap;

use tracing::debug;

use crate::error::LanternWarning;
use crate::record::{RequestRecord, ResourceType};
use crate::settings::Settings;
use crate::units::{Milliseconds, RttMs, ServerResponseTimeMs};

/// Follows `redirect_source` links from `record` to the terminal
/// (truly fetched) record in its chain.
///
/// Records form a forest under redirect links (§3); following
/// `redirect_source` walks *backwards* from a later hop to its
/// predecessor, so to resolve a record to its terminal destination this
/// instead walks *forward*: it looks up, among all records, the one
/// whose `redirect_source` points at `record`, repeating until no
/// record redirects further.
#[must_use]
pub fn resolve_redirects<'a>(
    records: &'a [RequestRecord],
    record: &'a RequestRecord,
) -> &'a RequestRecord {
    let mut current = record;
    loop {
        let next = records
            .iter()
            .find(|candidate| matches!(&candidate.redirect_source, Some(link) if link.index == current.index));
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
}

/// Finds the record fetched for `url`: the first record whose URL
/// exactly matches, or, failing that, the first `Document` record (the
/// browser landed on an error page for the requested URL, per §4.2).
#[must_use]
pub fn find_resource_for_url<'a>(
    records: &'a [RequestRecord],
    url: &str,
) -> Option<&'a RequestRecord> {
    records.iter().find(|r| r.url == url).or_else(|| {
        records
            .iter()
            .find(|r| r.resource_type == ResourceType::Document)
    })
}

/// Per-origin round-trip time estimates, keyed by origin string.
pub type RttByOrigin = HashMap<String, RttMs>;

/// Per-origin server response time estimates, keyed by origin string.
pub type ServerResponseTimeByOrigin = HashMap<String, ServerResponseTimeMs>;

/// Estimates the round-trip time for every origin that established at
/// least one fresh TCP connection (§4.2).
///
/// For each origin, takes the minimum of `connectEnd - connectStart`
/// minus any TLS portion across records with a fresh connection,
/// clamped to `settings.rtt_floor_ms`. Origins with no fresh-connect
/// sample inherit the site-wide median of the origins that did have
/// one; if not even one origin has a sample, the caller's analysis
/// falls back to `settings.default_rtt()` at the call site and an
/// `UnknownOrigin` warning is appended for every such origin.
pub fn estimate_rtt_per_origin(
    records: &[RequestRecord],
    settings: &Settings,
) -> (RttByOrigin, Vec<LanternWarning>) {
    let floor = settings.rtt_floor_ms;
    let mut samples: HashMap<String, f64> = HashMap::new();

    for record in records {
        let Some(timing) = &record.timing else {
            continue;
        };
        let (Some(connect_start), Some(connect_end)) = (timing.connect_start, timing.connect_end)
        else {
            continue;
        };
        let tls_portion = match (timing.tls_start, timing.tls_end) {
            (Some(start), Some(end)) => (end.as_f64() - start.as_f64()).max(0.0),
            _ => 0.0,
        };
        let raw = (connect_end.as_f64() - connect_start.as_f64() - tls_portion).max(0.0);
        let clamped = raw.max(floor);
        samples
            .entry(record.origin.clone())
            .and_modify(|min| *min = min.min(clamped))
            .or_insert(clamped);
    }

    let site_median = median(samples.values().copied());

    let mut estimates: RttByOrigin = HashMap::new();
    for record in records {
        estimates
            .entry(record.origin.clone())
            .or_insert_with(|| {
                let value = samples.get(&record.origin).copied().or(site_median);
                value
                    .and_then(|v| RttMs::try_new(v.max(floor)).ok())
                    .unwrap_or_else(|| {
                        settings
                            .default_rtt()
                            .unwrap_or_else(|_| RttMs::try_new(1.0).expect("1.0 is a valid rtt"))
                    })
            });
    }

    let mut warnings = Vec::new();
    for (origin, rtt) in &estimates {
        if !samples.contains_key(origin) && site_median.is_none() {
            warnings.push(LanternWarning {
                origin: origin.clone(),
                fallback_rtt_ms: rtt.as_f64(),
            });
        }
    }
    debug!(origins = estimates.len(), "rtt estimated per origin");
    (estimates, warnings)
}

/// Estimates the server response time for every origin (§4.2).
///
/// For non-cached records, `responseHeadersReceived - requestSent -
/// RTT(origin)`, median per origin, clamped to zero.
pub fn estimate_server_response_time_per_origin(
    records: &[RequestRecord],
    rtt_by_origin: &RttByOrigin,
) -> ServerResponseTimeByOrigin {
    let mut samples: HashMap<String, Vec<f64>> = HashMap::new();
    for record in records {
        if record.cache_provenance.is_cache_hit() {
            continue;
        }
        let Some(timing) = &record.timing else {
            continue;
        };
        let Some(rtt) = rtt_by_origin.get(&record.origin) else {
            continue;
        };
        let raw = timing.response_headers_received.as_f64()
            - timing.request_sent.as_f64()
            - rtt.as_f64();
        samples
            .entry(record.origin.clone())
            .or_default()
            .push(raw.max(0.0));
    }

    samples
        .into_iter()
        .map(|(origin, values)| {
            let value = median(values.into_iter()).unwrap_or(0.0).max(0.0);
            (
                origin,
                ServerResponseTimeMs::try_new(value).unwrap_or_default(),
            )
        })
        .collect()
}

/// Finds the main document record: the root-frame `Document` request
/// whose URL matches `root_url`, falling back to the first root-frame
/// `Document` record if no exact URL match exists.
#[must_use]
pub fn find_main_document<'a>(
    records: &'a [RequestRecord],
    root_url: &str,
) -> Option<&'a RequestRecord> {
    records
        .iter()
        .find(|r| r.is_root_frame && r.resource_type == ResourceType::Document && r.url == root_url)
        .or_else(|| {
            records
                .iter()
                .find(|r| r.is_root_frame && r.resource_type == ResourceType::Document)
        })
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Convenience: `Milliseconds` form of a record's response-finished
/// timing, used by the graph builder's initiator resolution. Returns
/// `Milliseconds::zero()` for instantaneous (cache/data) records with
/// no timing.
#[must_use]
pub fn finish_time(record: &RequestRecord) -> Milliseconds {
    record
        .timing
        .as_ref()
        .map_or_else(Milliseconds::zero, |t| t.response_finished)
}

/// Convenience: `Milliseconds` form of a record's request-sent timing.
#[must_use]
pub fn send_time(record: &RequestRecord) -> Milliseconds {
    record
        .timing
        .as_ref()
        .map_or_else(Milliseconds::zero, |t| t.request_sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CacheProvenance, FailureReason, Initiator, Priority, Protocol, Timing};
    use crate::units::{Bytes, RequestId};

    fn record(
        index: usize,
        url: &str,
        origin: &str,
        resource_type: ResourceType,
        timing: Option<Timing>,
    ) -> RequestRecord {
        RequestRecord {
            index,
            request_id: RequestId::try_new(index.to_string()).unwrap(),
            url: url.to_string(),
            origin: origin.to_string(),
            resource_type,
            protocol: Protocol::H1,
            initiator: Initiator::Parser,
            redirect_source: None,
            priority: Priority::Medium,
            timing,
            transfer_size: Bytes::zero(),
            resource_size: Bytes::zero(),
            failed: None,
            cache_provenance: CacheProvenance::None,
            frame_id: "main".to_string(),
            is_root_frame: true,
        }
    }

    fn ms(v: f64) -> Milliseconds {
        Milliseconds::try_new(v).unwrap()
    }

    #[test]
    fn rtt_estimate_clamps_to_floor() {
        let mut timing = base_timing();
        timing.connect_start = Some(ms(0.0));
        timing.connect_end = Some(ms(1.0));
        let records = vec![record(
            0,
            "https://a.test/",
            "https://a.test",
            ResourceType::Document,
            Some(timing),
        )];
        let settings = Settings::default();
        let (estimates, _) = estimate_rtt_per_origin(&records, &settings);
        assert_eq!(estimates["https://a.test"].as_f64(), settings.rtt_floor_ms);
    }

    #[test]
    fn unestimated_origin_falls_back_to_default_and_warns() {
        let records = vec![record(
            0,
            "https://a.test/",
            "https://a.test",
            ResourceType::Document,
            Some(base_timing()),
        )];
        let settings = Settings::default();
        let (estimates, warnings) = estimate_rtt_per_origin(&records, &settings);
        assert_eq!(estimates["https://a.test"].as_f64(), settings.default_rtt_ms);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].origin, "https://a.test");
    }

    #[test]
    fn find_resource_falls_back_to_document() {
        let records = vec![record(
            0,
            "https://a.test/",
            "https://a.test",
            ResourceType::Document,
            Some(base_timing()),
        )];
        let found = find_resource_for_url(&records, "https://a.test/missing").unwrap();
        assert_eq!(found.resource_type, ResourceType::Document);
    }

    fn base_timing() -> Timing {
        Timing {
            request_sent: ms(0.0),
            dns_start: None,
            dns_end: None,
            connect_start: None,
            connect_end: None,
            tls_start: None,
            tls_end: None,
            send_end: ms(0.0),
            response_headers_received: ms(50.0),
            response_finished: ms(100.0),
        }
    }

    #[test]
    fn server_response_time_clamped_at_zero() {
        let mut rtts = HashMap::new();
        rtts.insert("https://a.test".to_string(), RttMs::try_new(200.0).unwrap());
        let records = vec![record(
            0,
            "https://a.test/",
            "https://a.test",
            ResourceType::Document,
            Some(base_timing()),
        )];
        let estimate = estimate_server_response_time_per_origin(&records, &rtts);
        assert_eq!(estimate["https://a.test"].as_f64(), 0.0);
    }

    #[test]
    fn redirect_resolves_to_terminal() {
        use crate::record::RedirectLink;
        let mut records = vec![
            record(
                0,
                "https://a.test/old",
                "https://a.test",
                ResourceType::Document,
                Some(base_timing()),
            ),
            record(
                1,
                "https://a.test/new",
                "https://a.test",
                ResourceType::Document,
                Some(base_timing()),
            ),
        ];
        records[1].redirect_source = Some(RedirectLink {
            index: 0,
            status: Some(302),
        });
        let terminal = resolve_redirects(&records, &records[0]);
        assert_eq!(terminal.url, "https://a.test/new");
    }

    #[test]
    fn unused_failure_reason_field_compiles() {
        let _ = FailureReason("timeout".to_string());
    }
}
