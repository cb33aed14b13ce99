//! The request record: the unit of data the network-log reader produces
//! and every other module consumes.

use serde::{Deserialize, Serialize};

use crate::units::{Bytes, Milliseconds, RequestId};

/// The kind of resource a request fetched, used by the graph builder to
/// decide render-blocking status and by the network analyzer to find
/// the main document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    /// The top-level HTML document, or an iframe's document.
    Document,
    /// A CSS stylesheet.
    Stylesheet,
    /// A JavaScript resource.
    Script,
    /// An image resource, including the LCP candidate image.
    Image,
    /// A web font.
    Font,
    /// An XMLHttpRequest or `fetch` request.
    Xhr,
    /// Audio or video media.
    Media,
    /// Anything not covered above (manifests, pings, beacons, etc).
    Other,
}

/// The wire protocol a request was served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// HTTP/1.1.
    H1,
    /// HTTP/2.
    H2,
    /// HTTP/3 (QUIC); modelled identically to H2 for multiplexing
    /// purposes, distinguished only for reporting.
    H3,
    /// A `data:` URI, resolved without any network activity.
    Data,
    /// A `blob:` URI, resolved without any network activity.
    Blob,
    /// A WebSocket upgrade.
    Ws,
}

impl Protocol {
    /// Whether this protocol multiplexes many requests over one
    /// connection (HTTP/2 and HTTP/3), as opposed to HTTP/1.1's
    /// one-request-per-connection-slot model.
    #[must_use]
    pub fn is_multiplexed(self) -> bool {
        matches!(self, Protocol::H2 | Protocol::H3)
    }

    /// Whether this protocol requires no simulated network activity at
    /// all (data/blob URIs are resolved in-process by the browser).
    #[must_use]
    pub fn is_instantaneous(self) -> bool {
        matches!(self, Protocol::Data | Protocol::Blob)
    }
}

/// Request priority as assigned by the browser's scheduler, used both to
/// arbitrate scarce connection/CPU slots (§4.5 tie-breaks) and to decide
/// render-blocking status (§4.3 step 6).
///
/// Declaration order is deliberately ascending so the derived `Ord`
/// matches priority semantics: `VeryLow < Low < Medium < High <
/// VeryHigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Lowest scheduling priority (e.g. prefetch hints).
    VeryLow,
    /// Below-default priority (e.g. async scripts, below-the-fold images).
    Low,
    /// Default priority.
    Medium,
    /// Above-default priority (e.g. preloaded fonts, visible images).
    High,
    /// Highest priority (the main document, render-blocking CSS).
    VeryHigh,
}

impl Priority {
    /// Whether this priority alone is sufficient to mark a node critical
    /// (§4.3 step 6: "its priority is High/VeryHigh").
    #[must_use]
    pub fn is_critical(self) -> bool {
        matches!(self, Priority::High | Priority::VeryHigh)
    }
}

/// Where a request's bytes actually came from, distinguishing a real
/// network fetch from a cache hit (which is modelled as instantaneous,
/// §4.5 edge-case policies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheProvenance {
    /// Served from the browser's disk cache.
    Disk,
    /// Served from the in-memory cache.
    Memory,
    /// Served from a prefetched response.
    Prefetch,
    /// Not served from any cache; a genuine network fetch.
    None,
}

impl CacheProvenance {
    /// Whether this provenance means the request cost zero simulated
    /// time (any cache hit).
    #[must_use]
    pub fn is_cache_hit(self) -> bool {
        !matches!(self, CacheProvenance::None)
    }
}

/// What caused a request to be issued, carrying enough context for the
/// graph builder to resolve an initiator edge (§4.3 step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initiator {
    /// The HTML/CSS parser discovered this request while parsing a
    /// document or stylesheet.
    Parser,
    /// A script issued this request; carries the script's URL so the
    /// builder can resolve it to an owning network node.
    Script {
        /// URL of the script that initiated the request.
        url: String,
    },
    /// A `<link rel=preload>` (or equivalent) hint.
    Preload,
    /// This record is a hop in a redirect chain; the predecessor hop is
    /// linked via `RequestRecord::redirect_source`.
    Redirect,
}

/// A link to the record that redirected to (or was redirected from)
/// this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectLink {
    /// The identifier of the linked record within the reader's output
    /// list (its index, since `RequestId` may be shared across hops).
    pub index: usize,
    /// The HTTP status code of the redirect response, recorded on the
    /// source hop when it is closed out.
    pub status: Option<u16>,
}

/// The monotonic timing marks recorded for a request, in milliseconds
/// from an arbitrary log-wide origin.
///
/// *Invariant*: for every non-cache, non-data record,
/// `request_sent <= response_headers_received <= response_finished`
/// (§3). Constructed only through `RequestRecordBuilder`, which is the
/// sole place this invariant is checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// When the request was sent.
    pub request_sent: Milliseconds,
    /// DNS resolution start, if a fresh lookup occurred.
    pub dns_start: Option<Milliseconds>,
    /// DNS resolution end, if a fresh lookup occurred.
    pub dns_end: Option<Milliseconds>,
    /// TCP connect start, if a fresh connection was established.
    pub connect_start: Option<Milliseconds>,
    /// TCP connect end, if a fresh connection was established.
    pub connect_end: Option<Milliseconds>,
    /// TLS handshake start, if this connection is encrypted.
    pub tls_start: Option<Milliseconds>,
    /// TLS handshake end, if this connection is encrypted.
    pub tls_end: Option<Milliseconds>,
    /// When the request body, if any, finished sending.
    pub send_end: Milliseconds,
    /// When response headers arrived.
    pub response_headers_received: Milliseconds,
    /// When the response body finished arriving.
    pub response_finished: Milliseconds,
}

/// Why a request failed, when it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason(pub String);

/// A single reconstructed request lifecycle: one hop of one request id
/// if redirects were involved, or the only record for a non-redirected
/// request.
///
/// *Invariant*: if `redirect_source` is `Some`, the referenced record's
/// URL equals this record's previous-hop destination; the chain of
/// redirect links forms a forest whose leaves are truly fetched
/// responses (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Position of this record in the reader's output list; doubles as
    /// its stable identity for redirect links and initiator resolution
    /// before a graph exists.
    pub index: usize,
    /// The protocol-level request identifier. Shared across redirect
    /// hops of the same request.
    pub request_id: RequestId,
    /// The fetched (or redirected-from) URL.
    pub url: String,
    /// The request's origin (scheme + host + port), used to key
    /// connections and RTT/response-time estimates.
    pub origin: String,
    /// The kind of resource this request fetched.
    pub resource_type: ResourceType,
    /// The wire protocol used.
    pub protocol: Protocol,
    /// What caused this request.
    pub initiator: Initiator,
    /// The hop that redirected to this record, if any.
    pub redirect_source: Option<RedirectLink>,
    /// The browser-assigned scheduling priority.
    pub priority: Priority,
    /// Timing marks. `None` only for instantaneous (data/blob) records.
    pub timing: Option<Timing>,
    /// Bytes actually transferred on the wire (post-compression,
    /// including headers).
    pub transfer_size: Bytes,
    /// Bytes of the decoded response body.
    pub resource_size: Bytes,
    /// Failure reason, if the request failed.
    pub failed: Option<FailureReason>,
    /// Where this response's bytes came from.
    pub cache_provenance: CacheProvenance,
    /// The frame this request belongs to.
    pub frame_id: String,
    /// Whether `frame_id` names the page's root (outermost) frame.
    pub is_root_frame: bool,
}

impl RequestRecord {
    /// Whether this record should be modelled as a zero-cost,
    /// connectionless node in the simulator (§4.5 edge-case policies).
    #[must_use]
    pub fn is_instantaneous(&self) -> bool {
        self.protocol.is_instantaneous() || self.cache_provenance.is_cache_hit()
    }

    /// Whether this record was actually redirected onward, i.e. it is
    /// not itself a terminal response.
    #[must_use]
    pub fn is_redirect_hop(&self) -> bool {
        matches!(self.initiator, Initiator::Redirect) && self.redirect_source.is_some()
    }

    /// Whether this resource type/initiator combination blocks the
    /// first paint (§4.3 step 6: "CSS, sync script, font with
    /// preload"). A script is treated as synchronous when the HTML
    /// parser discovered it directly, as opposed to a script
    /// dynamically injecting it.
    #[must_use]
    pub fn is_render_blocking(&self) -> bool {
        match self.resource_type {
            ResourceType::Stylesheet => true,
            ResourceType::Script => matches!(self.initiator, Initiator::Parser),
            ResourceType::Font => matches!(self.initiator, Initiator::Preload),
            _ => false,
        }
    }
}
