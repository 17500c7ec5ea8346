use std::io;

/// Errors surfaced to the application by [`Host`](crate::Host) and
/// [`Peer`](crate::Peer).
///
/// Protocol-level faults that the engine can absorb on its own (a malformed
/// datagram or a timed-out peer) are never reported here. Those are logged
/// and turned into a dropped command or a [`crate::Event::Disconnect`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A fixed-size resource (the peer table, a channel array) has no room
    /// left for the requested allocation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A configuration value failed validation at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// An operation was attempted on a peer that is not in the `Connected`
    /// state (e.g. [`Peer::send`](crate::Peer::send) before the handshake
    /// completes, or after disconnection).
    #[error("peer is not connected")]
    NotConnected,

    /// The channel ID passed to [`Peer::send`](crate::Peer::send) is outside
    /// the peer's negotiated channel count.
    #[error("channel {0} is out of range")]
    InvalidChannel(u8),

    /// The datagram socket returned a fatal (non-would-block) I/O error.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
