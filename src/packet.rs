//! The [`Packet`] buffer: an immutable-sized, reference-counted byte buffer
//! passed between the application and the protocol engine.

use std::rc::Rc;

bitflags::bitflags! {
    /// Delivery semantics requested for a [`Packet`].
    ///
    /// `RELIABLE` and `UNSEQUENCED` are mutually exclusive in practice (a
    /// packet is reliable-ordered, unreliable-ordered, or unsequenced); the
    /// type does not enforce this itself, matching the C library's loose
    /// flag set, but [`Peer::send`](crate::Peer::send) rejects the
    /// combination.
    pub struct PacketFlags: u8 {
        /// Deliver in order, retransmitting until acknowledged.
        const RELIABLE = 0b001;
        /// Bypass both reliable and unreliable ordering; delivered at most
        /// once, with duplicates suppressed by the receiver's replay window.
        const UNSEQUENCED = 0b010;
        /// Hint that the receiver should not copy the packet's data out of
        /// the datagram buffer it arrived in. The Rust port always owns its
        /// buffer, so this flag is accepted for wire/API compatibility but
        /// has no effect.
        const NO_ALLOCATE = 0b100;
    }
}

#[derive(Debug)]
struct PacketData {
    bytes: Box<[u8]>,
    flags: PacketFlags,
}

/// An immutable-sized, reference-counted message buffer.
///
/// Cloning a `Packet` is cheap (an `Rc` bump): every outgoing command
/// referencing the packet, plus the in-progress incoming command during
/// reassembly, holds one clone. The backing buffer is freed once the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct Packet(Rc<PacketData>);

impl Packet {
    /// Creates a reliable packet from the given bytes.
    pub fn reliable(data: impl Into<Box<[u8]>>) -> Self {
        Self::with_flags(data, PacketFlags::RELIABLE)
    }

    /// Creates a best-effort, ordered packet from the given bytes.
    pub fn unreliable(data: impl Into<Box<[u8]>>) -> Self {
        Self::with_flags(data, PacketFlags::empty())
    }

    /// Creates a best-effort, unordered packet from the given bytes.
    pub fn unsequenced(data: impl Into<Box<[u8]>>) -> Self {
        Self::with_flags(data, PacketFlags::UNSEQUENCED)
    }

    /// Creates a packet with an explicit flag set.
    pub fn with_flags(data: impl Into<Box<[u8]>>, flags: PacketFlags) -> Self {
        Self(Rc::new(PacketData {
            bytes: data.into(),
            flags,
        }))
    }

    /// Allocates a zeroed packet of `len` bytes, for in-place reassembly.
    pub(crate) fn zeroed(len: usize, flags: PacketFlags) -> Self {
        Self(Rc::new(PacketData {
            bytes: vec![0u8; len].into_boxed_slice(),
            flags,
        }))
    }

    /// The packet's payload.
    pub fn data(&self) -> &[u8] {
        &self.0.bytes
    }

    /// The packet's length in bytes.
    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    /// Whether the packet carries no payload.
    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    /// The packet's delivery flags.
    pub fn flags(&self) -> PacketFlags {
        self.0.flags
    }

    /// Whether this packet was created/received as reliable.
    pub fn is_reliable(&self) -> bool {
        self.0.flags.contains(PacketFlags::RELIABLE)
    }

    /// Whether this packet was created/received as unsequenced.
    pub fn is_unsequenced(&self) -> bool {
        self.0.flags.contains(PacketFlags::UNSEQUENCED)
    }

    /// The number of live references to this packet's buffer, i.e. how many
    /// outgoing commands plus (during reassembly) the owning incoming
    /// command currently hold a clone. Exposed mainly for tests.
    pub fn reference_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Writes `fragment` into this packet's buffer at `offset`, for
    /// reassembly. Callers (`channel::FragmentAssembly::receive_fragment`)
    /// clamp `offset`/`fragment.len()` to the buffer's length first, so this
    /// never runs past the end of the allocation.
    pub(crate) fn write_fragment(&mut self, offset: usize, fragment: &[u8]) {
        let inner = Rc::get_mut(&mut self.0).expect("fragment buffer shared before reassembly completes");
        inner.bytes[offset..offset + fragment.len()].copy_from_slice(fragment);
    }

    /// Resizes the packet's buffer, truncating in place or reallocating and
    /// copying when growing, per `enet_packet_resize`'s contract. Returns
    /// `Err` if the packet's buffer is still shared (e.g. it has already
    /// been queued for send) — resize is only legal while the caller holds
    /// the sole reference.
    pub fn resize(&mut self, len: usize) -> Result<(), Packet> {
        match Rc::get_mut(&mut self.0) {
            Some(inner) => {
                if len <= inner.bytes.len() {
                    inner.bytes = inner.bytes[..len].to_vec().into_boxed_slice();
                } else {
                    let mut grown = vec![0u8; len].into_boxed_slice();
                    grown[..inner.bytes.len()].copy_from_slice(&inner.bytes);
                    inner.bytes = grown;
                }
                Ok(())
            }
            None => Err(self.clone()),
        }
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.0.bytes == other.0.bytes && self.0.flags == other.0.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_count_tracks_clones() {
        let p = Packet::reliable(b"hello".to_vec());
        assert_eq!(p.reference_count(), 1);
        let q = p.clone();
        assert_eq!(p.reference_count(), 2);
        drop(q);
        assert_eq!(p.reference_count(), 1);
    }

    #[test]
    fn resize_truncates_in_place() {
        let mut p = Packet::reliable(b"hello world".to_vec());
        p.resize(5).unwrap();
        assert_eq!(p.data(), b"hello");
    }

    #[test]
    fn resize_grows_and_zero_fills() {
        let mut p = Packet::reliable(b"hi".to_vec());
        p.resize(4).unwrap();
        assert_eq!(p.data(), &[b'h', b'i', 0, 0]);
    }

    #[test]
    fn resize_rejects_shared_buffer() {
        let mut p = Packet::reliable(b"hi".to_vec());
        let _q = p.clone();
        assert!(p.resize(4).is_err());
    }

    #[test]
    fn zeroed_then_write_fragment_assembles() {
        let mut p = Packet::zeroed(10, PacketFlags::RELIABLE);
        p.write_fragment(0, b"abcde");
        p.write_fragment(5, b"fghij");
        assert_eq!(p.data(), b"abcdefghij");
    }
}
