//! The connection pool (§4.4): a stateful pool of simulated TCP/TLS
//! (and multiplexed HTTP/2) connections, keyed by origin, honouring
//! HTTP/1.1 concurrency limits, HTTP/2 coalescing, slow-start
//! congestion windows and warm-vs-cold handshake costs.
//!
//! *Invariants* (§4.4): at any simulated time the set of open
//! connections per origin respects the concurrency cap; `advance`
//! never returns a time earlier than `now`; a request is bound to
//! exactly one connection until `release`.

use std::collections::HashMap;

use tracing::debug;

use crate::record::Protocol;
use crate::settings::Settings;
use crate::units::{Bytes, CongestionWindow, ConnectionId, Milliseconds, RttMs, SegmentSize};

/// State of one simulated connection (§3 "Connection").
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    origin: String,
    is_h2: bool,
    cwnd: CongestionWindow,
    warm: bool,
    busy_until: Milliseconds,
    active_streams: usize,
}

impl Connection {
    /// This connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The origin this connection serves.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether this is a multiplexed HTTP/2 (or HTTP/3) connection.
    #[must_use]
    pub fn is_h2(&self) -> bool {
        self.is_h2
    }

    /// Whether this connection's handshake has already been paid.
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// The connection's current congestion window.
    #[must_use]
    pub fn congestion_window(&self) -> CongestionWindow {
        self.cwnd
    }
}

/// A read-only snapshot of pool occupancy, used by tests asserting the
/// concurrency-cap invariant (§8) without reaching into pool internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of open connections per origin.
    pub open_connections_per_origin: HashMap<String, usize>,
    /// Number of distinct HTTP/2 connections actually opened (after
    /// coalescing), across all origins.
    pub coalesced_connection_count: usize,
}

/// The stateful pool of simulated connections for one simulation run.
///
/// Owned by a single run; never shared across runs (§5 "Shared-resource
/// policy").
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    connections: Vec<Connection>,
    by_origin: HashMap<String, Vec<usize>>,
    next_id: u64,
    max_h1_per_origin: usize,
    initial_cwnd: CongestionWindow,
    congestion_ceiling: CongestionWindow,
    tls_handshake_rtts: u8,
    settings: Settings,
    downstream_cap_bytes_per_sec: u64,
}

impl ConnectionPool {
    /// Builds an empty pool parameterised by `settings`.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            connections: Vec::new(),
            by_origin: HashMap::new(),
            next_id: 0,
            max_h1_per_origin: settings.max_http1_connections_per_origin as usize,
            initial_cwnd: settings
                .initial_congestion_window()
                .unwrap_or_else(|_| CongestionWindow::initial()),
            congestion_ceiling: settings.congestion_window_ceiling(),
            tls_handshake_rtts: settings.tls_handshake_rtts,
            settings: settings.clone(),
            downstream_cap_bytes_per_sec: settings.throughput_down_bytes_per_sec,
        }
    }

    /// Acquires a connection for a request to `origin` over `protocol`,
    /// returning the connection id and the earliest time it is actually
    /// ready to start sending bytes (§4.4 `acquire`).
    ///
    /// The returned time already accounts for a cold connection's DNS,
    /// TCP and TLS handshake cost (drawn from `rtt`); a warm or queued
    /// connection pays no handshake but may still delay start until the
    /// connection currently bound to it frees up (HTTP/1.1 only — a
    /// busy HTTP/2 connection is never queued on, since it
    /// multiplexes).
    pub fn acquire(
        &mut self,
        origin: &str,
        protocol: Protocol,
        now: Milliseconds,
        rtt: RttMs,
    ) -> (ConnectionId, Milliseconds) {
        if protocol.is_multiplexed() {
            self.acquire_h2(origin, now, rtt)
        } else {
            self.acquire_h1(origin, now, rtt)
        }
    }

    fn acquire_h2(
        &mut self,
        origin: &str,
        now: Milliseconds,
        rtt: RttMs,
    ) -> (ConnectionId, Milliseconds) {
        if let Some(index) = self.find_coalesced_h2(origin) {
            self.connections[index].active_streams += 1;
            self.connections[index].warm = true;
            let id = self.connections[index].id;
            debug!(%origin, "reusing coalesced h2 connection");
            return (id, now);
        }
        let index = self.open_connection(origin, true, now);
        let ready = now.add(self.handshake_cost(rtt));
        self.connections[index].active_streams = 1;
        (self.connections[index].id, ready)
    }

    fn acquire_h1(
        &mut self,
        origin: &str,
        now: Milliseconds,
        rtt: RttMs,
    ) -> (ConnectionId, Milliseconds) {
        if let Some(index) = self.idle_h1(origin, now) {
            self.connections[index].warm = true;
            return (self.connections[index].id, now);
        }
        let open = self.by_origin.get(origin).map_or(0, Vec::len);
        if open < self.max_h1_per_origin {
            let index = self.open_connection(origin, false, now);
            let ready = now.add(self.handshake_cost(rtt));
            return (self.connections[index].id, ready);
        }
        // At the concurrency cap: queue on whichever connection frees up
        // soonest (§4.4 acquire "a queued slot on a busy connection").
        let index = self.by_origin[origin]
            .iter()
            .copied()
            .min_by(|&a, &b| {
                self.connections[a]
                    .busy_until
                    .as_f64()
                    .total_cmp(&self.connections[b].busy_until.as_f64())
            })
            .expect("open > 0 since we are at the cap");
        let ready = self.connections[index].busy_until.max(now);
        (self.connections[index].id, ready)
    }

    fn idle_h1(&self, origin: &str, now: Milliseconds) -> Option<usize> {
        self.by_origin.get(origin)?.iter().copied().find(|&i| {
            !self.connections[i].is_h2 && self.connections[i].busy_until.as_f64() <= now.as_f64()
        })
    }

    fn find_coalesced_h2(&self, origin: &str) -> Option<usize> {
        let group = self.settings.coalescing_group_for(origin)?;
        self.connections
            .iter()
            .position(|c| c.is_h2 && group.contains(&c.origin))
    }

    fn open_connection(&mut self, origin: &str, is_h2: bool, now: Milliseconds) -> usize {
        let id = ConnectionId::try_new(self.next_id).expect("monotonic ids never collide");
        self.next_id += 1;
        let index = self.connections.len();
        self.connections.push(Connection {
            id,
            origin: origin.to_string(),
            is_h2,
            cwnd: self.initial_cwnd,
            warm: false,
            busy_until: now,
            active_streams: 0,
        });
        self.by_origin
            .entry(origin.to_string())
            .or_default()
            .push(index);
        debug!(%origin, is_h2, "opened connection");
        index
    }

    /// Applies the global downstream throughput cap on top of the
    /// congestion-window elapsed time (§4.5 "Throttling model"): when
    /// the cap would be exceeded, elapsed time is stretched to match
    /// it, with the same stretch factor standing in for the RTT
    /// inflation the spec describes — in this cost model, RTT and
    /// elapsed time for a fixed window count are directly
    /// proportional, so the two are equivalent levers.
    fn throttle(&self, cwnd_elapsed_ms: f64, byte_count: f64) -> f64 {
        if self.downstream_cap_bytes_per_sec == 0 || byte_count <= 0.0 {
            return cwnd_elapsed_ms;
        }
        let cap_elapsed_ms = byte_count / self.downstream_cap_bytes_per_sec as f64 * 1_000.0;
        cwnd_elapsed_ms.max(cap_elapsed_ms)
    }

    fn handshake_cost(&self, rtt: RttMs) -> Milliseconds {
        let rtts = 2.0 + f64::from(self.tls_handshake_rtts); // DNS + TCP + TLS
        Milliseconds::try_new(rtts * rtt.as_f64()).unwrap_or_default()
    }

    /// Charges `bytes` of transfer against `connection` starting at
    /// `start`, using its current congestion window, and returns the
    /// time the transfer completes (§4.4 `advance`).
    ///
    /// Per §4.5's cost model, `ceil(bytes / (cwnd · MSS)) · RTT`; the
    /// window then doubles (up to the configured ceiling) to reflect
    /// one successful RTT of transfer, benefiting whichever request
    /// reuses this connection next.
    ///
    /// # Panics
    ///
    /// Panics if `connection` was not returned by `acquire` on this
    /// pool.
    pub fn advance(
        &mut self,
        connection: ConnectionId,
        bytes: Bytes,
        start: Milliseconds,
        rtt: RttMs,
    ) -> Milliseconds {
        let index = self.index_of(connection);
        let mss = SegmentSize::standard();
        let window_bytes = f64::from(self.connections[index].cwnd.into_inner()) * f64::from(mss.into_inner());
        let byte_count = bytes.into_inner() as f64;
        let windows = if byte_count <= 0.0 {
            0.0
        } else {
            (byte_count / window_bytes).ceil()
        };
        let elapsed = self.throttle(windows * rtt.as_f64(), byte_count);
        let finish = start.add(Milliseconds::try_new(elapsed.max(0.0)).unwrap_or_default());
        if byte_count > 0.0 {
            self.connections[index].cwnd = self.connections[index]
                .cwnd
                .doubled(self.congestion_ceiling);
        }
        if !self.connections[index].is_h2 {
            self.connections[index].busy_until = finish;
        }
        self.connections[index].warm = true;
        finish.max(start)
    }

    /// Marks `connection` idle at `now` (§4.4 `release`). The
    /// connection is never closed — HTTP/1.1 keep-alive and HTTP/2
    /// multiplexing both survive a release, ready for reuse.
    ///
    /// # Panics
    ///
    /// Panics if `connection` was not returned by `acquire` on this
    /// pool.
    pub fn release(&mut self, connection: ConnectionId, now: Milliseconds) {
        let index = self.index_of(connection);
        if self.connections[index].is_h2 {
            self.connections[index].active_streams =
                self.connections[index].active_streams.saturating_sub(1);
        } else {
            self.connections[index].busy_until = self.connections[index].busy_until.max(now);
        }
    }

    fn index_of(&self, id: ConnectionId) -> usize {
        self.connections
            .iter()
            .position(|c| c.id == id)
            .expect("connection id was returned by acquire on this pool")
    }

    /// A read-only snapshot of current pool occupancy (§11 supplement).
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut open_connections_per_origin = HashMap::new();
        for (origin, indices) in &self.by_origin {
            open_connections_per_origin.insert(origin.clone(), indices.len());
        }
        PoolStats {
            open_connections_per_origin,
            coalesced_connection_count: self.connections.iter().filter(|c| c.is_h2).count(),
        }
    }
}
