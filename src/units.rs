//! Validated scalar primitives shared across the simulator.
//!
//! Every timing, byte count, and identifier that flows between modules is
//! wrapped in a `nutype` newtype rather than passed around as a bare
//! `f64`/`u64`/`usize`. This follows the same "make illegal states
//! unrepresentable" convention used throughout the domain layer: a
//! negative RTT or a byte count that silently went negative after a
//! subtraction are bugs we want the type system to catch at construction,
//! not at a debugging session three modules downstream.

use nutype::nutype;

/// A point in simulated time, or a duration, in milliseconds.
///
/// The simulator's clock has an arbitrary origin (matching the recorded
/// protocol log); only deltas and orderings are meaningful.
#[nutype(
    validate(finite, greater_or_equal = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default),
    default = 0.0
)]
pub struct Milliseconds(f64);

impl Milliseconds {
    /// The zero instant/duration.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Add two durations/instants, saturating at zero on underflow (which
    /// cannot occur for addition but keeps the call site uniform with
    /// `sub`).
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::try_new(self.into_inner() + other.into_inner()).unwrap_or_default()
    }

    /// Subtract, clamping the result to zero rather than producing an
    /// invalid negative value.
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self::try_new((self.into_inner() - other.into_inner()).max(0.0)).unwrap_or_default()
    }

    /// Scale by a positive factor (used for the CPU-slowdown multiplier).
    #[must_use]
    pub fn scale(self, factor: f64) -> Self {
        Self::try_new((self.into_inner() * factor).max(0.0)).unwrap_or_default()
    }

    /// The larger of two instants/durations.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.into_inner() >= other.into_inner() {
            self
        } else {
            other
        }
    }

    /// The smaller of two instants/durations.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.into_inner() <= other.into_inner() {
            self
        } else {
            other
        }
    }

    /// Round to the nearest 10ms, as required when reporting opportunity
    /// savings.
    #[must_use]
    pub fn round_to_nearest_10(self) -> Self {
        let rounded = (self.into_inner() / 10.0).round() * 10.0;
        Self::try_new(rounded).unwrap_or_default()
    }

    /// Raw millisecond value, for display and arithmetic the newtype
    /// does not otherwise expose.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.into_inner()
    }
}

/// A size in bytes: transfer size on the wire, decoded body size, or a
/// hypothetical byte saving.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default
    ),
    default = 0
)]
pub struct Bytes(u64);

impl Bytes {
    /// Zero bytes.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Subtract a byte count, clamping at zero (`new = max(0, old - saved)`
    /// from the opportunity-pricing contract).
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self::try_new(self.into_inner().saturating_sub(other.into_inner())).unwrap_or_default()
    }
}

/// Round-trip time estimate for one origin.
#[nutype(
    validate(finite, greater = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)
)]
pub struct RttMs(f64);

impl RttMs {
    /// Raw millisecond value.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.into_inner()
    }

    /// As a `Milliseconds` duration, for use in the cost model.
    #[must_use]
    pub fn as_duration(self) -> Milliseconds {
        Milliseconds::try_new(self.into_inner()).unwrap_or_default()
    }
}

/// Estimated server response time for one origin, already clamped to
/// zero per the analyzer contract.
#[nutype(
    validate(finite, greater_or_equal = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Default),
    default = 0.0
)]
pub struct ServerResponseTimeMs(f64);

impl ServerResponseTimeMs {
    /// As a `Milliseconds` duration, for use in the cost model.
    #[must_use]
    pub fn as_duration(self) -> Milliseconds {
        Milliseconds::try_new(self.into_inner()).unwrap_or_default()
    }
}

/// Number of TCP segments a connection is permitted to have in flight
/// before requiring an RTT's worth of acknowledgements.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize
    )
)]
pub struct CongestionWindow(u32);

impl CongestionWindow {
    /// Standard initial congestion window (10 segments).
    #[must_use]
    pub fn initial() -> Self {
        Self::try_new(10).expect("10 is a valid initial congestion window")
    }

    /// Double the window (slow-start growth on a successful RTT),
    /// clamped to `ceiling`.
    #[must_use]
    pub fn doubled(self, ceiling: Self) -> Self {
        let doubled = self.into_inner().saturating_mul(2);
        Self::try_new(doubled.min(ceiling.into_inner()))
            .unwrap_or(ceiling)
    }
}

/// Maximum segment size in bytes (fixed at ~1460 bytes of payload).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)
)]
pub struct SegmentSize(u32);

impl SegmentSize {
    /// The standard Ethernet-derived MSS used by the cost model.
    #[must_use]
    pub fn standard() -> Self {
        Self::try_new(1460).expect("1460 is a valid MSS")
    }
}

/// Stable identifier for a graph node, assigned by the arena on
/// insertion. Indexes directly into `Graph`'s backing `Vec`.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display
))]
pub struct NodeId(usize);

/// Identifier for a simulated connection, assigned by the connection
/// pool on creation.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display
))]
pub struct ConnectionId(u64);

/// The request identifier carried by the recorded protocol log. These
/// are opaque strings assigned by the browser's network stack (e.g.
/// `"1000.2"`); a single id can produce multiple `RequestRecord`s when
/// redirects are involved.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display
    )
)]
pub struct RequestId(String);
