//! Tunable protocol constants and validated configuration structs.
//!
//! The numeric defaults are conservative, link-agnostic starting points and
//! may be overridden per deployment via [`HostConfig`].

use std::time::Duration;

use crate::error::Error;

/// Initial per-peer MTU, in bytes, before negotiation.
pub const DEFAULT_MTU: u16 = 1400;
/// Minimum negotiable MTU.
pub const MIN_MTU: u16 = 576;
/// Maximum negotiable MTU.
pub const MAX_MTU: u16 = 4096;

/// Minimum channel count a peer may negotiate.
pub const MIN_CHANNEL_COUNT: u32 = 1;
/// Maximum channel count a peer may negotiate.
pub const MAX_CHANNEL_COUNT: u32 = 255;

/// Minimum reliable-bytes-in-flight window.
pub const MIN_WINDOW_SIZE: u32 = 4096;
/// Maximum reliable-bytes-in-flight window.
pub const MAX_WINDOW_SIZE: u32 = 65536;

/// Idle-peer ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

/// Number of RTO doublings a peer tolerates before being declared dead, once
/// past [`TIMEOUT_MINIMUM`].
pub const TIMEOUT_LIMIT: u32 = 32;
/// Minimum elapsed time since the earliest unacked reliable send, once the
/// per-command timeout has grown past its limit, before giving up on a peer.
pub const TIMEOUT_MINIMUM: Duration = Duration::from_secs(5);
/// Absolute elapsed time since the earliest unacked reliable send beyond
/// which a peer is declared dead regardless of [`TIMEOUT_LIMIT`].
pub const TIMEOUT_MAXIMUM: Duration = Duration::from_secs(30);

/// Denominator of the packet-throttle probability.
pub const PACKET_THROTTLE_SCALE: u32 = 32;
/// Initial packet-throttle numerator (100%).
pub const DEFAULT_PACKET_THROTTLE: u32 = 32;
/// Default throttle-measurement period.
pub const PACKET_THROTTLE_INTERVAL: Duration = Duration::from_secs(5);
/// Default per-interval throttle increase on improving RTT.
pub const DEFAULT_PACKET_THROTTLE_ACCELERATION: u32 = 2;
/// Default per-interval throttle decrease on worsening RTT.
pub const DEFAULT_PACKET_THROTTLE_DECELERATION: u32 = 2;

/// Denominator of the packet-loss ratio.
pub const PACKET_LOSS_SCALE: u32 = 65536;
/// Packet-loss measurement period.
pub const PACKET_LOSS_INTERVAL: Duration = Duration::from_secs(10);

/// Width, in bits, of the unsequenced-group replay window.
pub const UNSEQUENCED_WINDOW_SIZE: u32 = 1024;

/// Cadence at which the host recomputes per-peer bandwidth throttle limits.
pub const HOST_BANDWIDTH_THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Largest peer ID the wire format's 16-bit handle can address usefully; the
/// top of the `u16` range is reserved as the unassigned-peer-id sentinel.
pub const MAXIMUM_PEER_ID: u16 = 4095;

/// Per-command counter increment feeding the packet-throttle filter.
pub const PACKET_THROTTLE_COUNTER: u32 = 7;

fn clamp_u32(value: u32, min: u32, max: u32) -> u32 {
    value.clamp(min, max)
}

/// Configuration for a [`Host`](crate::Host).
///
/// Uses a validating-constructor pattern (`validate`/`clamped`) rather than a
/// long positional `Host::create` argument list.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Number of peer slots the host's fixed-size peer table holds. Bounds
    /// the number of concurrent connections (inbound + outbound).
    pub peer_count: usize,
    /// Channel-count ceiling applied (in addition to the per-connection
    /// negotiated count) to every admitted peer.
    pub channel_limit: u32,
    /// Host-wide incoming bandwidth budget, bytes/sec. `0` means unlimited.
    pub incoming_bandwidth: u32,
    /// Host-wide outgoing bandwidth budget, bytes/sec. `0` means unlimited.
    pub outgoing_bandwidth: u32,
    /// Maximum number of concurrent connections accepted from the same
    /// remote address.
    pub max_peers_per_address: usize,
    /// Default MTU offered for locally-initiated connections.
    pub mtu: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            peer_count: 32,
            channel_limit: MAX_CHANNEL_COUNT,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            max_peers_per_address: 1,
            mtu: DEFAULT_MTU,
        }
    }
}

impl HostConfig {
    /// Returns the configuration with `channel_limit` clamped to
    /// `[MIN_CHANNEL_COUNT, MAX_CHANNEL_COUNT]` and `mtu` clamped to
    /// `[MIN_MTU, MAX_MTU]`.
    pub fn clamped(mut self) -> Self {
        self.channel_limit = clamp_u32(self.channel_limit, MIN_CHANNEL_COUNT, MAX_CHANNEL_COUNT);
        self.mtu = self.mtu.clamp(MIN_MTU, MAX_MTU);
        self
    }

    /// Validates the configuration, returning an error describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), Error> {
        if self.peer_count == 0 {
            return Err(Error::InvalidConfig("peer_count must be non-zero"));
        }
        if self.peer_count > MAXIMUM_PEER_ID as usize + 1 {
            return Err(Error::InvalidConfig("peer_count exceeds MAXIMUM_PEER_ID"));
        }
        if self.max_peers_per_address == 0 {
            return Err(Error::InvalidConfig("max_peers_per_address must be non-zero"));
        }
        Ok(())
    }
}

/// Per-connection throttle parameters, settable via
/// [`Peer::throttle_configure`](crate::Peer::throttle_configure).
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Measurement period over which RTT samples are aggregated for the
    /// throttle decision.
    pub interval: Duration,
    /// Amount the throttle probability increases, per interval, while RTT is
    /// improving.
    pub acceleration: u32,
    /// Amount the throttle probability decreases, per interval, while RTT is
    /// worsening.
    pub deceleration: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval: PACKET_THROTTLE_INTERVAL,
            acceleration: DEFAULT_PACKET_THROTTLE_ACCELERATION,
            deceleration: DEFAULT_PACKET_THROTTLE_DECELERATION,
        }
    }
}

/// Clamp a proposed window size into `[MIN_WINDOW_SIZE, MAX_WINDOW_SIZE]`.
pub fn clamp_window_size(window_size: u32) -> u32 {
    clamp_u32(window_size, MIN_WINDOW_SIZE, MAX_WINDOW_SIZE)
}

/// Clamp a proposed channel count into `[MIN_CHANNEL_COUNT, MAX_CHANNEL_COUNT]`.
pub fn clamp_channel_count(channel_count: u32) -> u32 {
    clamp_u32(channel_count, MIN_CHANNEL_COUNT, MAX_CHANNEL_COUNT)
}

/// Clamp a proposed MTU into `[MIN_MTU, MAX_MTU]`.
pub fn clamp_mtu(mtu: u16) -> u16 {
    mtu.clamp(MIN_MTU, MAX_MTU)
}
