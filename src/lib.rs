#![warn(missing_docs)]

//! `rudp_host` is a connection-based layer over UDP that provides a
//! reliable, ordered, multi-channel packet streaming interface, designed
//! primarily for real-time, multiplayer games and similar latency-sensitive
//! applications. It manages connection state, congestion control,
//! sequencing, and packet fragmentation to produce a simple and robust data
//! link over an unreliable datagram transport.
//!
//! # Creating a host
//!
//! ```no_run
//! use rudp_host::{Host, HostConfig, socket::UdpSocket};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0".parse().unwrap()).unwrap();
//! let mut host = Host::create(socket, HostConfig::default()).unwrap();
//! ```
//!
//! # Servicing the host
//!
//! Call [`Host::service`] from a loop; it drives the protocol engine and
//! returns application events (connections, received packets,
//! disconnections) one at a time.

mod channel;
mod clock;
mod config;
mod error;
mod host;
mod packet;
mod peer;
mod protocol;
pub mod socket;

pub use config::{HostConfig, ThrottleConfig};
pub use error::{Error, Result};
pub use host::{Event, Host};
pub use packet::{Packet, PacketFlags};
pub use peer::{Peer, PeerId, PeerState};

/// The maximum transfer unit (MTU) of the internet, used as a reasonable
/// default initial per-peer MTU before path discovery.
pub const INTERNET_MTU: usize = 1500;

/// The number of header bytes of a UDP packet (including the IP header).
pub const UDP_HEADER_SIZE: usize = 28;
