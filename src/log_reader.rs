//! The network-log reader (§4.1): turns a flat stream of protocol
//! events into the ordered list of [`RequestRecord`]s every other
//! module consumes.
//!
//! The protocol event shape mirrors the Chrome DevTools Protocol's
//! `Network` domain, per the distilled spec's external-interface
//! contract (§6: `{ method, params }`, millisecond timestamps). Event
//! kinds this reader does not recognise are ignored, exactly as §6
//! specifies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::record::{
    CacheProvenance, FailureReason, Initiator, Priority, Protocol, RedirectLink, RequestRecord,
    ResourceType, Timing,
};
use crate::units::{Bytes, Milliseconds, RequestId};
use crate::LanternError;

/// One event from the recorded protocol log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// The CDP-style method name, e.g. `"Network.requestWillBeSent"`.
    pub method: String,
    /// Event-specific parameters.
    pub params: EventParams,
}

/// The union of parameter shapes this reader recognises. Events whose
/// `method` this reader does not recognise are skipped entirely, so
/// their `params` shape is never inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventParams {
    /// Parameters for `requestWillBeSent`.
    RequestWillBeSent(RequestWillBeSentParams),
    /// Parameters for `responseReceived`.
    ResponseReceived(ResponseReceivedParams),
    /// Parameters for `dataReceived`.
    DataReceived(DataReceivedParams),
    /// Parameters for `loadingFinished`.
    LoadingFinished(LoadingFinishedParams),
    /// Parameters for `loadingFailed`.
    LoadingFailed(LoadingFailedParams),
    /// Parameters for `requestServedFromCache`.
    ServedFromCache(ServedFromCacheParams),
}

/// Parameters carried by a `requestWillBeSent` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestWillBeSentParams {
    /// The protocol-level request identifier.
    pub request_id: String,
    /// When the request was sent, in milliseconds from the log origin.
    pub timestamp: f64,
    /// The requested URL.
    pub url: String,
    /// The frame this request belongs to.
    pub frame_id: String,
    /// The resource type string (`"Document"`, `"Script"`, ...).
    pub resource_type: String,
    /// Scheduling priority string, if the log carries one.
    pub priority: Option<String>,
    /// What initiated this request.
    pub initiator: InitiatorParams,
    /// Present iff this event closes out a redirect: the status code of
    /// the redirect response on the *previous* hop.
    pub redirect_response: Option<RedirectResponseParams>,
}

/// Initiator details on a `requestWillBeSent` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatorParams {
    /// `"parser"`, `"script"`, `"preload"`, or `"redirect"`.
    pub kind: String,
    /// The initiating script's URL, when `kind == "script"`.
    pub url: Option<String>,
}

/// The redirect-response details attached to the event that supersedes
/// a redirected request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectResponseParams {
    /// HTTP status code of the redirect response.
    pub status: u16,
    /// Transfer size of the redirect response itself, if known.
    pub encoded_data_length: Option<u64>,
}

/// Parameters carried by a `responseReceived` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseReceivedParams {
    /// The protocol-level request identifier.
    pub request_id: String,
    /// When headers were received, in milliseconds from the log origin.
    pub timestamp: f64,
    /// Response details.
    pub response: ResponseParams,
}

/// The `response` object of a `responseReceived` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseParams {
    /// The protocol actually used (`"h2"`, `"http/1.1"`, `"h3"`, ...).
    pub protocol: String,
    /// Whether this response came from the browser's disk cache.
    pub from_disk_cache: bool,
    /// Whether this response came from a prefetched response.
    pub from_prefetch_cache: bool,
    /// Fine-grained connection timing, absent for cached responses.
    pub timing: Option<ResourceTimingParams>,
}

/// Fine-grained connection timing, mirroring CDP's `ResourceTiming`.
/// Fields are `None` when the corresponding phase did not occur (e.g.
/// no fresh DNS lookup on a reused connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTimingParams {
    /// DNS resolution start, milliseconds from the log origin.
    pub dns_start: Option<f64>,
    /// DNS resolution end, milliseconds from the log origin.
    pub dns_end: Option<f64>,
    /// TCP connect start, milliseconds from the log origin.
    pub connect_start: Option<f64>,
    /// TCP connect end, milliseconds from the log origin.
    pub connect_end: Option<f64>,
    /// TLS handshake start, milliseconds from the log origin.
    pub ssl_start: Option<f64>,
    /// TLS handshake end, milliseconds from the log origin.
    pub ssl_end: Option<f64>,
    /// When the request body finished sending.
    pub send_end: f64,
}

/// Parameters carried by a `dataReceived` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataReceivedParams {
    /// The protocol-level request identifier.
    pub request_id: String,
    /// Decoded bytes received in this chunk.
    pub data_length: u64,
    /// Transfer (wire) bytes received in this chunk.
    pub encoded_data_length: u64,
}

/// Parameters carried by a `loadingFinished` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingFinishedParams {
    /// The protocol-level request identifier.
    pub request_id: String,
    /// When loading finished, in milliseconds from the log origin.
    pub timestamp: f64,
    /// Total transfer bytes, superseding the sum of `dataReceived`
    /// chunks if larger.
    pub encoded_data_length: u64,
}

/// Parameters carried by a `loadingFailed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingFailedParams {
    /// The protocol-level request identifier.
    pub request_id: String,
    /// When the failure was observed, in milliseconds from the log
    /// origin.
    pub timestamp: f64,
    /// A human-readable failure reason.
    pub error_text: String,
}

/// Parameters carried by a `requestServedFromCache` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedFromCacheParams {
    /// The protocol-level request identifier.
    pub request_id: String,
}

fn map_resource_type(raw: &str) -> ResourceType {
    match raw {
        "Document" => ResourceType::Document,
        "Stylesheet" => ResourceType::Stylesheet,
        "Script" => ResourceType::Script,
        "Image" => ResourceType::Image,
        "Font" => ResourceType::Font,
        "XHR" | "Fetch" => ResourceType::Xhr,
        "Media" => ResourceType::Media,
        _ => ResourceType::Other,
    }
}

fn map_protocol(raw: &str) -> Protocol {
    match raw {
        "h2" => Protocol::H2,
        "h3" | "h3-29" | "quic" => Protocol::H3,
        "data" => Protocol::Data,
        "blob" => Protocol::Blob,
        "ws" | "websocket" => Protocol::Ws,
        _ => Protocol::H1,
    }
}

fn map_priority(raw: Option<&str>) -> Priority {
    match raw {
        Some("VeryLow") => Priority::VeryLow,
        Some("Low") => Priority::Low,
        Some("High") => Priority::High,
        Some("VeryHigh") => Priority::VeryHigh,
        _ => Priority::Medium,
    }
}

fn map_initiator(raw: &InitiatorParams) -> Initiator {
    match raw.kind.as_str() {
        "script" => Initiator::Script {
            url: raw.url.clone().unwrap_or_default(),
        },
        "preload" => Initiator::Preload,
        "redirect" => Initiator::Redirect,
        _ => Initiator::Parser,
    }
}

fn ms(value: f64) -> Milliseconds {
    Milliseconds::try_new(value.max(0.0)).unwrap_or_default()
}

/// Parses a recorded sequence of protocol events into an ordered list
/// of request records (§4.1).
///
/// Ordering of the output follows first-seen order of request
/// identifiers, as specified.
///
/// # Errors
///
/// Returns [`LanternError::MalformedLog`] if an event references a
/// request identifier with no preceding `requestWillBeSent`, or if a
/// record's timing marks are not monotonic once finalised.
#[instrument(skip(events))]
pub fn read_log(events: &[ProtocolEvent]) -> Result<Vec<RequestRecord>, LanternError> {
    let mut records: Vec<RequestRecord> = Vec::new();
    let mut open: HashMap<String, usize> = HashMap::new();
    let mut main_frame_id: Option<String> = None;

    for event in events {
        match (event.method.as_str(), &event.params) {
            ("Network.requestWillBeSent", EventParams::RequestWillBeSent(p)) => {
                if let Some(redirect) = &p.redirect_response {
                    let prev_index = *open.get(&p.request_id).ok_or_else(|| {
                        LanternError::MalformedLog {
                            request_id: p.request_id.clone(),
                            reason: "redirect with no preceding requestWillBeSent".to_string(),
                        }
                    })?;
                    close_out_redirect(&mut records, prev_index, redirect, p.timestamp)?;
                }

                if p.resource_type == "Document" && main_frame_id.is_none() {
                    main_frame_id = Some(p.frame_id.clone());
                }
                let is_root_frame = main_frame_id.as_deref() == Some(p.frame_id.as_str());

                let redirect_source = p.redirect_response.as_ref().map(|_| RedirectLink {
                    index: *open.get(&p.request_id).expect("checked above"),
                    status: p.redirect_response.as_ref().map(|r| r.status),
                });

                let record = RequestRecord {
                    index: records.len(),
                    request_id: RequestId::try_new(p.request_id.clone()).map_err(|_| {
                        LanternError::MalformedLog {
                            request_id: p.request_id.clone(),
                            reason: "empty request id".to_string(),
                        }
                    })?,
                    url: p.url.clone(),
                    origin: origin_of(&p.url),
                    resource_type: map_resource_type(&p.resource_type),
                    protocol: Protocol::H1,
                    initiator: map_initiator(&p.initiator),
                    redirect_source,
                    priority: map_priority(p.priority.as_deref()),
                    timing: Some(Timing {
                        request_sent: ms(p.timestamp),
                        dns_start: None,
                        dns_end: None,
                        connect_start: None,
                        connect_end: None,
                        tls_start: None,
                        tls_end: None,
                        send_end: ms(p.timestamp),
                        response_headers_received: ms(p.timestamp),
                        response_finished: ms(p.timestamp),
                    }),
                    transfer_size: Bytes::zero(),
                    resource_size: Bytes::zero(),
                    failed: None,
                    cache_provenance: CacheProvenance::None,
                    frame_id: p.frame_id.clone(),
                    is_root_frame,
                };
                open.insert(p.request_id.clone(), record.index);
                records.push(record);
            }
            ("Network.responseReceived", EventParams::ResponseReceived(p)) => {
                let index = resolve_open(&open, &p.request_id)?;
                let record = &mut records[index];
                record.protocol = map_protocol(&p.response.protocol);
                record.cache_provenance = if p.response.from_prefetch_cache {
                    CacheProvenance::Prefetch
                } else if p.response.from_disk_cache {
                    CacheProvenance::Disk
                } else {
                    CacheProvenance::None
                };
                if let Some(timing) = record.timing.as_mut() {
                    if let Some(t) = &p.response.timing {
                        timing.dns_start = t.dns_start.map(ms);
                        timing.dns_end = t.dns_end.map(ms);
                        timing.connect_start = t.connect_start.map(ms);
                        timing.connect_end = t.connect_end.map(ms);
                        timing.tls_start = t.ssl_start.map(ms);
                        timing.tls_end = t.ssl_end.map(ms);
                        timing.send_end = ms(t.send_end);
                    }
                    timing.response_headers_received = ms(p.timestamp);
                    timing.response_finished = timing.response_headers_received;
                }
            }
            ("Network.dataReceived", EventParams::DataReceived(p)) => {
                let index = resolve_open(&open, &p.request_id)?;
                let record = &mut records[index];
                record.resource_size = Bytes::try_new(
                    record.resource_size.into_inner() + p.data_length,
                )
                .unwrap_or(record.resource_size);
                record.transfer_size = Bytes::try_new(
                    record.transfer_size.into_inner() + p.encoded_data_length,
                )
                .unwrap_or(record.transfer_size);
            }
            ("Network.loadingFinished", EventParams::LoadingFinished(p)) => {
                let index = resolve_open(&open, &p.request_id)?;
                let record = &mut records[index];
                if p.encoded_data_length > record.transfer_size.into_inner() {
                    record.transfer_size =
                        Bytes::try_new(p.encoded_data_length).unwrap_or(record.transfer_size);
                }
                if let Some(timing) = record.timing.as_mut() {
                    timing.response_finished = ms(p.timestamp);
                }
                validate_monotonic(record)?;
            }
            ("Network.loadingFailed", EventParams::LoadingFailed(p)) => {
                let index = resolve_open(&open, &p.request_id)?;
                let record = &mut records[index];
                record.failed = Some(FailureReason(p.error_text.clone()));
                if let Some(timing) = record.timing.as_mut() {
                    timing.response_finished = timing.response_finished.max(ms(p.timestamp));
                }
            }
            ("Network.requestServedFromCache", EventParams::ServedFromCache(p)) => {
                let index = resolve_open(&open, &p.request_id)?;
                records[index].cache_provenance = CacheProvenance::Memory;
            }
            (method, _) => {
                debug!(method, "ignoring unrecognised protocol event");
            }
        }
    }

    debug!(records = records.len(), "network log parsed");
    Ok(records)
}

fn resolve_open(open: &HashMap<String, usize>, request_id: &str) -> Result<usize, LanternError> {
    open.get(request_id)
        .copied()
        .ok_or_else(|| LanternError::MalformedLog {
            request_id: request_id.to_string(),
            reason: "event references unknown request id".to_string(),
        })
}

fn close_out_redirect(
    records: &mut [RequestRecord],
    index: usize,
    redirect: &RedirectResponseParams,
    at: f64,
) -> Result<(), LanternError> {
    let record = &mut records[index];
    if let Some(size) = redirect.encoded_data_length {
        record.transfer_size = Bytes::try_new(size).unwrap_or(record.transfer_size);
    }
    if let Some(timing) = record.timing.as_mut() {
        timing.response_headers_received = ms(at);
        timing.response_finished = ms(at);
    }
    validate_monotonic(record)
}

fn validate_monotonic(record: &RequestRecord) -> Result<(), LanternError> {
    let Some(timing) = &record.timing else {
        return Ok(());
    };
    if timing.request_sent.as_f64() > timing.response_headers_received.as_f64()
        || timing.response_headers_received.as_f64() > timing.response_finished.as_f64()
    {
        return Err(LanternError::MalformedLog {
            request_id: record.request_id.to_string(),
            reason: "timing marks are not monotonic".to_string(),
        });
    }
    Ok(())
}

fn origin_of(url: &str) -> String {
    // A deliberately small parser: scheme://host[:port], no path, no
    // userinfo. Good enough for origin-keyed pooling without pulling in
    // a general-purpose URL crate the rest of the simulator has no
    // other use for.
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    format!("{}://{}", &url[..scheme_end], &rest[..authority_end])
}
