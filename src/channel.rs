//! Per-peer, per-channel sequencing state: outgoing sequence counters plus
//! the two ordered in-queues of incoming commands awaiting in-order
//! delivery.

use std::collections::VecDeque;

use crate::packet::Packet;

/// An incoming command still being assembled from fragments, or already
/// complete.
#[derive(Debug)]
pub struct FragmentAssembly {
    packet: Packet,
    fragment_count: u32,
    fragments_remaining: u32,
    total_length: u32,
    received: Vec<u32>,
}

impl FragmentAssembly {
    pub fn new(total_length: u32, fragment_count: u32) -> Self {
        let words = ((fragment_count as usize) + 31) / 32;
        Self {
            packet: Packet::zeroed(total_length as usize, crate::packet::PacketFlags::RELIABLE),
            fragment_count,
            fragments_remaining: fragment_count,
            total_length,
            received: vec![0u32; words.max(1)],
        }
    }

    pub fn matches(&self, total_length: u32, fragment_count: u32) -> bool {
        self.total_length == total_length && self.fragment_count == fragment_count
    }

    /// Records one fragment's bytes. Returns `false` if this fragment number
    /// is out of range for this assembly or was already received (duplicate,
    /// ignored).
    pub fn receive_fragment(&mut self, fragment_number: u32, offset: u32, data: &[u8]) -> bool {
        if fragment_number >= self.fragment_count {
            return false;
        }
        let word = (fragment_number / 32) as usize;
        let bit = 1u32 << (fragment_number % 32);
        if self.received[word] & bit != 0 {
            return false;
        }
        self.received[word] |= bit;
        self.fragments_remaining -= 1;

        let offset = offset as usize;
        let end = (offset + data.len()).min(self.total_length as usize);
        if offset < end {
            self.packet.write_fragment(offset, &data[..end - offset]);
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.fragments_remaining == 0
    }

    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    pub fn into_packet(self) -> Packet {
        self.packet
    }
}

/// The payload of a reliable incoming command: either a complete packet, or
/// an in-progress fragment reassembly.
#[derive(Debug)]
pub enum IncomingReliablePayload {
    Packet(Packet),
    Fragment(FragmentAssembly),
}

/// One entry in a channel's incoming-reliable queue.
#[derive(Debug)]
pub struct IncomingReliableCommand {
    /// For a single-command message this is its own reliable sequence
    /// number; for a fragmented message, this is `startSequenceNumber` (the
    /// first of the `fragmentCount` sequence numbers the message occupies).
    pub sequence_number: u32,
    pub payload: IncomingReliablePayload,
}

impl IncomingReliableCommand {
    pub fn is_complete(&self) -> bool {
        match &self.payload {
            IncomingReliablePayload::Packet(_) => true,
            IncomingReliablePayload::Fragment(f) => f.is_complete(),
        }
    }
}

/// One entry in a channel's incoming-unreliable queue.
#[derive(Debug)]
pub struct IncomingUnreliableCommand {
    pub sequence_number: u32,
    /// The sender's reliable sequence number at the time this command was
    /// sent; delivery waits until the channel's reliable stream has reached
    /// at least this point.
    pub reliable_sequence_number: u32,
    pub packet: Packet,
}

/// Per-channel sequencing and reassembly state.
pub struct Channel {
    outgoing_reliable_sequence_number: u32,
    outgoing_unreliable_sequence_number: u32,
    incoming_reliable_sequence_number: u32,
    incoming_unreliable_sequence_number: u32,
    incoming_reliable_commands: VecDeque<IncomingReliableCommand>,
    incoming_unreliable_commands: VecDeque<IncomingUnreliableCommand>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            outgoing_reliable_sequence_number: 0,
            outgoing_unreliable_sequence_number: 0,
            incoming_reliable_sequence_number: 0,
            incoming_unreliable_sequence_number: 0,
            incoming_reliable_commands: VecDeque::new(),
            incoming_unreliable_commands: VecDeque::new(),
        }
    }

    /// Allocates and returns the next outgoing reliable sequence number.
    pub fn next_outgoing_reliable_sequence_number(&mut self) -> u32 {
        self.outgoing_reliable_sequence_number += 1;
        self.outgoing_reliable_sequence_number
    }

    /// Allocates `count` consecutive reliable sequence numbers (for a
    /// fragmented message) and returns the first.
    pub fn reserve_outgoing_reliable_sequence_range(&mut self, count: u32) -> u32 {
        let start = self.outgoing_reliable_sequence_number + 1;
        self.outgoing_reliable_sequence_number += count;
        start
    }

    /// Allocates and returns the next outgoing unreliable sequence number.
    pub fn next_outgoing_unreliable_sequence_number(&mut self) -> u32 {
        self.outgoing_unreliable_sequence_number += 1;
        self.outgoing_unreliable_sequence_number
    }

    pub fn incoming_reliable_sequence_number(&self) -> u32 {
        self.incoming_reliable_sequence_number
    }

    /// Inserts a freshly decoded reliable command (single packet or the
    /// first fragment of a message) in sequence order.
    ///
    /// Drops (returns `false`) if `sequence_number` has already been
    /// delivered or already occupies a queued slot, since a retransmission
    /// can redeliver a sequence number the peer already has.
    pub fn queue_incoming_reliable(&mut self, sequence_number: u32, payload: IncomingReliablePayload) -> bool {
        if sequence_number <= self.incoming_reliable_sequence_number {
            return false;
        }

        let mut insert_at = self.incoming_reliable_commands.len();
        for (i, existing) in self.incoming_reliable_commands.iter().enumerate().rev() {
            if existing.sequence_number == sequence_number {
                return false;
            }
            if existing.sequence_number < sequence_number {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }

        self.incoming_reliable_commands.insert(insert_at, IncomingReliableCommand { sequence_number, payload });
        true
    }

    /// Applies one more fragment to an in-progress fragmented message keyed
    /// by `start_sequence_number`. Returns:
    /// - `Some(true)` if this fragment completed the message,
    /// - `Some(false)` if accepted but the message is still incomplete,
    /// - `None` if no matching in-progress assembly was found (caller should
    ///   treat this as the first fragment and create one), or the fragment
    ///   was a duplicate.
    pub fn apply_fragment(
        &mut self,
        start_sequence_number: u32,
        fragment_number: u32,
        offset: u32,
        data: &[u8],
    ) -> Option<bool> {
        let entry = self
            .incoming_reliable_commands
            .iter_mut()
            .find(|c| c.sequence_number == start_sequence_number)?;

        match &mut entry.payload {
            IncomingReliablePayload::Fragment(assembly) => {
                if assembly.receive_fragment(fragment_number, offset, data) {
                    Some(assembly.is_complete())
                } else {
                    None
                }
            }
            IncomingReliablePayload::Packet(_) => None,
        }
    }

    /// Inserts a freshly decoded unreliable command in sequence order.
    /// Drops (returns `false`) if stale: `sequence_number` at or below the
    /// current high-water mark, or its associated reliable sequence number
    /// is behind the channel's current incoming-reliable high-water mark.
    pub fn queue_incoming_unreliable(&mut self, cmd: IncomingUnreliableCommand) -> bool {
        if cmd.sequence_number <= self.incoming_unreliable_sequence_number {
            return false;
        }
        if cmd.reliable_sequence_number < self.incoming_reliable_sequence_number {
            return false;
        }

        let mut insert_at = self.incoming_unreliable_commands.len();
        for (i, existing) in self.incoming_unreliable_commands.iter().enumerate().rev() {
            if existing.sequence_number == cmd.sequence_number {
                return false;
            }
            if existing.sequence_number < cmd.sequence_number {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }

        self.incoming_unreliable_commands.insert(insert_at, cmd);
        true
    }

    /// Pops every incoming command now eligible for delivery, in delivery
    /// order (reliable commands first, in sequence order, then unreliable
    /// commands gated behind the reliable stream's progress).
    pub fn drain_deliverable(&mut self) -> Vec<Packet> {
        let mut delivered = Vec::new();

        while let Some(front) = self.incoming_reliable_commands.front() {
            if front.sequence_number != self.incoming_reliable_sequence_number + 1 || !front.is_complete() {
                break;
            }
            let command = self.incoming_reliable_commands.pop_front().unwrap();
            // A fragmented message occupies `fragment_count` consecutive
            // reliable sequence numbers (one per fragment command on the
            // wire), even though it is tracked here as a single queue entry
            // keyed by its first (start) sequence number.
            let packet = match command.payload {
                IncomingReliablePayload::Packet(p) => {
                    self.incoming_reliable_sequence_number = command.sequence_number;
                    p
                }
                IncomingReliablePayload::Fragment(assembly) => {
                    self.incoming_reliable_sequence_number = command.sequence_number + assembly.fragment_count() - 1;
                    assembly.into_packet()
                }
            };
            delivered.push(packet);
        }

        while let Some(front) = self.incoming_unreliable_commands.front() {
            if front.reliable_sequence_number > self.incoming_reliable_sequence_number {
                break;
            }
            let command = self.incoming_unreliable_commands.pop_front().unwrap();
            self.incoming_unreliable_sequence_number = command.sequence_number;
            delivered.push(command.packet);
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(data: &[u8]) -> Packet {
        Packet::reliable(data.to_vec())
    }

    #[test]
    fn reliable_delivery_is_in_order_despite_out_of_order_arrival() {
        let mut ch = Channel::new();
        ch.queue_incoming_reliable(2, IncomingReliablePayload::Packet(packet(b"two")));
        assert!(ch.drain_deliverable().is_empty());

        ch.queue_incoming_reliable(1, IncomingReliablePayload::Packet(packet(b"one")));
        let delivered = ch.drain_deliverable();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].data(), b"one");
        assert_eq!(delivered[1].data(), b"two");
    }

    #[test]
    fn duplicate_reliable_sequence_is_dropped() {
        let mut ch = Channel::new();
        assert!(ch.queue_incoming_reliable(1, IncomingReliablePayload::Packet(packet(b"a"))));
        ch.drain_deliverable();
        assert!(!ch.queue_incoming_reliable(1, IncomingReliablePayload::Packet(packet(b"dup"))));
    }

    #[test]
    fn fragment_reassembly_completes_out_of_order() {
        let mut ch = Channel::new();
        let assembly = FragmentAssembly::new(10, 2);
        ch.queue_incoming_reliable(1, IncomingReliablePayload::Fragment(assembly));

        assert_eq!(ch.apply_fragment(1, 1, 5, b"fghij"), Some(false));
        assert!(ch.drain_deliverable().is_empty());

        assert_eq!(ch.apply_fragment(1, 0, 0, b"abcde"), Some(true));
        let delivered = ch.drain_deliverable();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].data(), b"abcdefghij");
    }

    #[test]
    fn reliable_sequence_number_skips_consumed_fragment_slots() {
        // A 2-fragment message occupies sequence numbers 1 and 2; the next
        // distinct reliable message is numbered 3, not 2.
        let mut ch = Channel::new();
        let assembly = FragmentAssembly::new(10, 2);
        ch.queue_incoming_reliable(1, IncomingReliablePayload::Fragment(assembly));
        ch.apply_fragment(1, 0, 0, b"abcde");
        ch.apply_fragment(1, 1, 5, b"fghij");
        ch.drain_deliverable();
        assert_eq!(ch.incoming_reliable_sequence_number(), 2);

        assert!(ch.queue_incoming_reliable(3, IncomingReliablePayload::Packet(packet(b"next"))));
        let delivered = ch.drain_deliverable();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].data(), b"next");
    }

    #[test]
    fn unreliable_waits_behind_reliable_progress() {
        let mut ch = Channel::new();
        ch.queue_incoming_unreliable(IncomingUnreliableCommand {
            sequence_number: 1,
            reliable_sequence_number: 3,
            packet: packet(b"u1"),
        });
        assert!(ch.drain_deliverable().is_empty());

        for seq in 1..=3u32 {
            ch.queue_incoming_reliable(seq, IncomingReliablePayload::Packet(packet(b"r")));
        }
        let delivered = ch.drain_deliverable();
        assert_eq!(delivered.len(), 4); // 3 reliable + 1 unreliable
        assert_eq!(delivered.last().unwrap().data(), b"u1");
    }

    #[test]
    fn stale_unreliable_is_dropped() {
        let mut ch = Channel::new();
        ch.queue_incoming_unreliable(IncomingUnreliableCommand {
            sequence_number: 5,
            reliable_sequence_number: 0,
            packet: packet(b"a"),
        });
        ch.drain_deliverable();
        assert!(!ch.queue_incoming_unreliable(IncomingUnreliableCommand {
            sequence_number: 5,
            reliable_sequence_number: 0,
            packet: packet(b"dup"),
        }));
        assert!(!ch.queue_incoming_unreliable(IncomingUnreliableCommand {
            sequence_number: 3,
            reliable_sequence_number: 0,
            packet: packet(b"old"),
        }));
    }
}
