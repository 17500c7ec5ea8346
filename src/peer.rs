//! The peer state machine and the per-peer algorithms that operate on it:
//! RTT estimation, packet-throttle, packet-loss tracking,
//! timeout/retransmission bookkeeping, and the unsequenced replay window.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::channel::Channel;
use crate::clock;
use crate::config::{self, ThrottleConfig};
use crate::error::Error;
use crate::packet::{Packet, PacketFlags};
use crate::protocol::{Command, CommandHeader};

/// A stable handle identifying a peer's slot in a [`Host`](crate::Host)'s
/// peer table. Doubles as the wire `peerID` the remote side uses to address
/// this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u16);

/// The channel ID control commands (CONNECT, PING, DISCONNECT, ...) are
/// logged against; distinct from any application channel.
pub const CONTROL_CHANNEL: u8 = 0xff;

/// A peer's position in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    AcknowledgingConnect,
    ConnectionPending,
    Connected,
    DisconnectLater,
    Disconnecting,
    AcknowledgingDisconnect,
    Zombie,
}

/// A queued outgoing command, shared by all four of a peer's out-queues.
#[derive(Debug)]
pub struct OutgoingCommand {
    pub channel_id: u8,
    pub command: Command,
    pub reliable_sequence_number: u32,
    pub packet: Option<Packet>,
    pub fragment_offset: u32,
    pub fragment_length: u32,
    /// Set once the command has been transmitted at least once.
    pub sent_time: Option<u32>,
    pub round_trip_timeout: u32,
    pub round_trip_timeout_limit: u32,
}

impl OutgoingCommand {
    fn new(channel_id: u8, reliable_sequence_number: u32, command: Command) -> Self {
        Self {
            channel_id,
            command,
            reliable_sequence_number,
            packet: None,
            fragment_offset: 0,
            fragment_length: 0,
            sent_time: None,
            round_trip_timeout: 0,
            round_trip_timeout_limit: 0,
        }
    }
}

/// A record of a command the peer must acknowledge on its next send.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub channel_id: u8,
    pub header: CommandHeader,
    /// `sentTime` from the datagram header that delivered the acked command.
    pub received_sent_time: u32,
}

/// RTT and throttle statistics, updated on every `ACKNOWLEDGE`.
#[derive(Debug)]
pub struct RttStats {
    pub round_trip_time: u32,
    pub round_trip_time_variance: u32,
    lowest_round_trip_time: u32,
    highest_round_trip_time_variance: u32,
    pub last_round_trip_time: u32,
    pub last_round_trip_time_variance: u32,
    interval_start: u32,
}

impl RttStats {
    fn new(now: u32) -> Self {
        Self {
            round_trip_time: 500,
            round_trip_time_variance: 0,
            lowest_round_trip_time: 500,
            highest_round_trip_time_variance: 0,
            last_round_trip_time: 500,
            last_round_trip_time_variance: 0,
            interval_start: now,
        }
    }

    /// Applies one RTT sample using an exponential decay similar to RFC 6298,
    /// but tuned to converge faster under the throttle's shorter sampling
    /// interval.
    fn record(&mut self, rtt: u32) {
        self.round_trip_time_variance -= self.round_trip_time_variance / 4;

        if rtt >= self.round_trip_time {
            self.round_trip_time += (rtt - self.round_trip_time) / 8;
            self.round_trip_time_variance += (rtt - self.round_trip_time) / 4;
        } else {
            self.round_trip_time -= (self.round_trip_time - rtt) / 8;
            self.round_trip_time_variance += (self.round_trip_time - rtt) / 4;
        }

        if self.round_trip_time < self.lowest_round_trip_time {
            self.lowest_round_trip_time = self.round_trip_time;
        }
        if self.round_trip_time_variance > self.highest_round_trip_time_variance {
            self.highest_round_trip_time_variance = self.round_trip_time_variance;
        }
    }

    /// Snapshots the interval extrema into `last_*` once `interval_ms` has
    /// elapsed since the last snapshot, then resets the running extrema.
    fn maybe_roll_interval(&mut self, now: u32, interval_ms: u32) {
        if clock::diff(now, self.interval_start) >= interval_ms {
            self.last_round_trip_time = self.lowest_round_trip_time;
            self.last_round_trip_time_variance = self.highest_round_trip_time_variance;
            self.lowest_round_trip_time = self.round_trip_time;
            self.highest_round_trip_time_variance = self.round_trip_time_variance;
            self.interval_start = now;
        }
    }
}

/// Packet-throttle state.
#[derive(Debug)]
pub struct Throttle {
    pub probability: u32,
    pub limit: u32,
    pub acceleration: u32,
    pub deceleration: u32,
    pub interval_ms: u32,
    pub counter: u32,
}

impl Throttle {
    fn new() -> Self {
        Self {
            probability: config::DEFAULT_PACKET_THROTTLE,
            limit: config::PACKET_THROTTLE_SCALE,
            acceleration: config::DEFAULT_PACKET_THROTTLE_ACCELERATION,
            deceleration: config::DEFAULT_PACKET_THROTTLE_DECELERATION,
            interval_ms: clock::millis(config::PACKET_THROTTLE_INTERVAL),
            counter: 0,
        }
    }

    fn configure(&mut self, cfg: ThrottleConfig) {
        self.interval_ms = clock::millis(cfg.interval);
        self.acceleration = cfg.acceleration;
        self.deceleration = cfg.deceleration;
    }

    /// Applies one ack's worth of throttle feedback. Returns `1` if
    /// accelerated, `-1` if decelerated, `0` if unchanged.
    fn update(&mut self, rtt: u32, last_round_trip_time: u32, last_round_trip_time_variance: u32) -> i32 {
        if last_round_trip_time <= last_round_trip_time_variance {
            self.probability = self.limit;
            0
        } else if rtt < last_round_trip_time {
            self.probability = (self.probability + self.acceleration).min(self.limit);
            1
        } else if rtt > last_round_trip_time + 2 * last_round_trip_time_variance {
            self.probability = self.probability.saturating_sub(self.deceleration);
            -1
        } else {
            0
        }
    }

    /// Whether an unreliable command should be dropped by the throttle
    /// filter this round.
    fn filter(&mut self) -> bool {
        self.counter = (self.counter + config::PACKET_THROTTLE_COUNTER) % config::PACKET_THROTTLE_SCALE;
        self.counter > self.probability
    }
}

/// Packet-loss EWMA, rolled once per loss-interval.
#[derive(Debug)]
pub struct LossStats {
    pub packets_sent: u32,
    pub packets_lost: u32,
    pub packet_loss: u32,
    epoch: u32,
}

impl LossStats {
    fn new(now: u32) -> Self {
        Self { packets_sent: 0, packets_lost: 0, packet_loss: 0, epoch: now }
    }

    fn maybe_roll(&mut self, now: u32) {
        if clock::diff(now, self.epoch) >= clock::millis(config::PACKET_LOSS_INTERVAL) && self.packets_sent > 0 {
            let sample = self.packets_lost * config::PACKET_LOSS_SCALE / self.packets_sent;
            self.packet_loss = self.packet_loss - self.packet_loss / 4 + sample / 4;
            self.packets_sent = 0;
            self.packets_lost = 0;
            self.epoch = now;
        }
    }
}

/// The 1024-bit sliding replay window used to deduplicate unsequenced
/// commands.
#[derive(Debug)]
struct UnsequencedWindow {
    incoming_group: u32,
    bits: Vec<u32>,
}

impl UnsequencedWindow {
    fn new() -> Self {
        Self { incoming_group: 0, bits: vec![0u32; (config::UNSEQUENCED_WINDOW_SIZE / 32) as usize] }
    }

    /// Returns `true` if `group` should be delivered (i.e. is new), marking
    /// it seen as a side effect.
    fn accept(&mut self, group: u32) -> bool {
        if group >= self.incoming_group + config::UNSEQUENCED_WINDOW_SIZE {
            self.incoming_group = group - (group % config::UNSEQUENCED_WINDOW_SIZE);
            self.bits.iter_mut().for_each(|w| *w = 0);
        } else if group < self.incoming_group {
            return false;
        }

        let index = (group % config::UNSEQUENCED_WINDOW_SIZE) as usize;
        let word = index / 32;
        let bit = 1u32 << (index % 32);
        if self.bits[word] & bit != 0 {
            return false;
        }
        self.bits[word] |= bit;
        true
    }
}

/// A connection to a remote host: lifecycle state, per-channel sequencing,
/// out-queues, and the RTT/throttle/loss statistics that drive retransmission
/// and pacing.
pub struct Peer {
    pub id: PeerId,
    pub address: SocketAddr,
    pub outgoing_peer_id: u16,
    pub challenge: u32,
    pub state: PeerState,
    pub mtu: u16,
    pub window_size: u32,
    pub incoming_bandwidth: u32,
    pub outgoing_bandwidth: u32,
    pub allotted_incoming_bandwidth: u32,
    pub allotted_outgoing_bandwidth: u32,
    pub channels: Vec<Channel>,

    pub ack_queue: VecDeque<PendingAck>,
    pub sent_reliable: VecDeque<OutgoingCommand>,
    pub sent_unreliable: VecDeque<OutgoingCommand>,
    pub outgoing_reliable: VecDeque<OutgoingCommand>,
    pub outgoing_unreliable: VecDeque<OutgoingCommand>,

    control_reliable_sequence_number: u32,
    pub reliable_data_in_transit: u32,

    pub rtt: RttStats,
    pub throttle: Throttle,
    pub loss: LossStats,

    pub last_send_time: u32,
    pub last_receive_time: u32,
    pub next_timeout: Option<u32>,
    earliest_timeout: Option<u32>,
    pub check_for_timeouts: bool,

    pub connect_data: u32,
    pub disconnect_data: u32,
    pub disconnect_requires_no_ack: bool,

    unsequenced_out: u32,
    unsequenced_in: UnsequencedWindow,
}

impl Peer {
    pub fn new(id: PeerId, address: SocketAddr, mtu: u16, now: u32) -> Self {
        Self {
            id,
            address,
            outgoing_peer_id: id.0,
            challenge: 0,
            state: PeerState::Disconnected,
            mtu,
            window_size: config::MAX_WINDOW_SIZE,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            allotted_incoming_bandwidth: 0,
            allotted_outgoing_bandwidth: 0,
            channels: Vec::new(),
            ack_queue: VecDeque::new(),
            sent_reliable: VecDeque::new(),
            sent_unreliable: VecDeque::new(),
            outgoing_reliable: VecDeque::new(),
            outgoing_unreliable: VecDeque::new(),
            control_reliable_sequence_number: 0,
            reliable_data_in_transit: 0,
            rtt: RttStats::new(now),
            throttle: Throttle::new(),
            loss: LossStats::new(now),
            last_send_time: now,
            last_receive_time: now,
            next_timeout: None,
            earliest_timeout: None,
            check_for_timeouts: false,
            connect_data: 0,
            disconnect_data: 0,
            disconnect_requires_no_ack: false,
            unsequenced_out: 0,
            unsequenced_in: UnsequencedWindow::new(),
        }
    }

    /// Resets this slot back to its pristine `Disconnected` state, ready to
    /// be reused for a future connection. `id` never changes across reuse,
    /// so a freed slot keeps the same index in the host's peer table.
    pub fn reset(&mut self, now: u32) {
        let id = self.id;
        let address = self.address;
        *self = Peer::new(id, address, config::DEFAULT_MTU, now);
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.state, PeerState::Disconnected)
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state, PeerState::Zombie)
    }

    /// Allocates the next reliable sequence number for a control-channel
    /// (non-application) command.
    fn next_control_sequence_number(&mut self) -> u32 {
        self.control_reliable_sequence_number += 1;
        self.control_reliable_sequence_number
    }

    /// Queues a reliable control command (CONNECT, VERIFY_CONNECT,
    /// DISCONNECT, PING, BANDWIDTH_LIMIT, THROTTLE_CONFIGURE).
    pub fn queue_outgoing_control(&mut self, command: Command) {
        let seq = self.next_control_sequence_number();
        self.outgoing_reliable.push_back(OutgoingCommand::new(CONTROL_CHANNEL, seq, command));
    }

    /// Queues an unsequenced control command (used for `disconnect_now`,
    /// which does not wait for an ack).
    pub fn queue_outgoing_control_unsequenced(&mut self, command: Command) {
        self.outgoing_unreliable.push_back(OutgoingCommand::new(CONTROL_CHANNEL, 0, command));
    }

    /// Queues a reliable application command on `channel_id`, fragmenting
    /// internally if `packet` exceeds one fragment's worth of space.
    pub fn queue_outgoing_reliable(&mut self, channel_id: u8, packet: Packet) -> Result<(), &'static str> {
        let max_fragment_len = self.max_fragment_payload();
        let channel = self.channels.get_mut(channel_id as usize).ok_or("channel out of range")?;

        if packet.len() <= max_fragment_len {
            let seq = channel.next_outgoing_reliable_sequence_number();
            let mut cmd = OutgoingCommand::new(channel_id, seq, Command::SendReliable);
            cmd.fragment_length = packet.len() as u32;
            cmd.packet = Some(packet);
            self.outgoing_reliable.push_back(cmd);
        } else {
            let fragment_count = ((packet.len() + max_fragment_len - 1) / max_fragment_len) as u32;
            let start = channel.reserve_outgoing_reliable_sequence_range(fragment_count);
            for i in 0..fragment_count {
                let offset = (i as usize) * max_fragment_len;
                let len = max_fragment_len.min(packet.len() - offset);
                let mut cmd = OutgoingCommand::new(
                    channel_id,
                    start + i,
                    Command::SendFragment(crate::protocol::FragmentData {
                        start_sequence_number: start,
                        fragment_count,
                        fragment_number: i,
                        total_length: packet.len() as u32,
                        fragment_offset: offset as u32,
                    }),
                );
                cmd.packet = Some(packet.clone());
                cmd.fragment_offset = offset as u32;
                cmd.fragment_length = len as u32;
                self.outgoing_reliable.push_back(cmd);
            }
        }
        Ok(())
    }

    /// Queues a best-effort, ordered application command on `channel_id`.
    pub fn queue_outgoing_unreliable(&mut self, channel_id: u8, packet: Packet) -> Result<(), &'static str> {
        let channel = self.channels.get_mut(channel_id as usize).ok_or("channel out of range")?;
        let seq = channel.next_outgoing_unreliable_sequence_number();
        let mut cmd = OutgoingCommand::new(channel_id, 0, Command::SendUnreliable { unreliable_sequence_number: seq });
        cmd.fragment_length = packet.len() as u32;
        cmd.packet = Some(packet);
        self.outgoing_unreliable.push_back(cmd);
        Ok(())
    }

    /// Queues a best-effort, unordered application command on `channel_id`.
    pub fn queue_outgoing_unsequenced(&mut self, channel_id: u8, packet: Packet) -> Result<(), &'static str> {
        if channel_id as usize >= self.channels.len() {
            return Err("channel out of range");
        }
        self.unsequenced_out += 1;
        let group = self.unsequenced_out;
        let mut cmd = OutgoingCommand::new(channel_id, 0, Command::SendUnsequenced { unsequenced_group: group });
        cmd.fragment_length = packet.len() as u32;
        cmd.packet = Some(packet);
        self.outgoing_unreliable.push_back(cmd);
        Ok(())
    }

    pub fn max_fragment_payload(&self) -> usize {
        (self.mtu as usize)
            .saturating_sub(crate::protocol::DATAGRAM_HEADER_SIZE)
            .saturating_sub(crate::protocol::COMMAND_HEADER_SIZE + crate::protocol::FRAGMENT_HEADER_SIZE)
    }

    /// Applies one inbound ACKNOWLEDGE command: updates RTT/throttle and
    /// removes the acked command from `sent_reliable`.
    ///
    /// Returns `false` if the ack is invalid (`receivedSentTime` is in the
    /// future relative to `now`) and should be dropped without effect.
    pub fn handle_acknowledge(&mut self, now: u32, received_reliable_sequence_number: u32, received_sent_time: u32) -> bool {
        if clock::greater(received_sent_time, now) {
            return false;
        }

        let rtt = clock::diff(now, received_sent_time);
        self.rtt.record(rtt);
        self.rtt.maybe_roll_interval(now, self.throttle.interval_ms);
        self.throttle.update(rtt, self.rtt.last_round_trip_time, self.rtt.last_round_trip_time_variance);

        if let Some(pos) = self
            .sent_reliable
            .iter()
            .position(|c| c.reliable_sequence_number == received_reliable_sequence_number)
        {
            let command = self.sent_reliable.remove(pos).unwrap();
            self.reliable_data_in_transit = self.reliable_data_in_transit.saturating_sub(command.fragment_length);
            self.earliest_timeout = None;
        }

        self.next_timeout = self
            .sent_reliable
            .front()
            .and_then(|c| c.sent_time.map(|t| t.wrapping_add(c.round_trip_timeout)));

        true
    }

    /// Records that a peer command requiring acknowledgement was received,
    /// queuing the ack for the next outgoing datagram.
    pub fn queue_ack(&mut self, channel_id: u8, header: CommandHeader, datagram_sent_time: u32) {
        self.ack_queue.push_back(PendingAck { channel_id, header, received_sent_time: datagram_sent_time });
    }

    /// Scans `sent_reliable` for commands past their `round_trip_timeout`.
    /// Returns [`TimeoutOutcome::Lost`] if the peer should be declared dead;
    /// otherwise resends everything found overdue by moving it back to the
    /// front of `outgoing_reliable` with a doubled timeout.
    pub fn check_timeouts(&mut self, now: u32) -> TimeoutOutcome {
        let mut requeued = Vec::new();
        let mut lost = false;

        while let Some(front) = self.sent_reliable.front() {
            let sent_time = match front.sent_time {
                Some(t) => t,
                None => break,
            };
            if !clock::greater_equal(now, sent_time.wrapping_add(front.round_trip_timeout)) {
                break;
            }

            let mut command = self.sent_reliable.pop_front().unwrap();

            let earliest = match self.earliest_timeout {
                Some(e) if clock::less(e, sent_time) => e,
                _ => {
                    self.earliest_timeout = Some(sent_time);
                    sent_time
                }
            };

            let timeout_maximum = clock::millis(config::TIMEOUT_MAXIMUM);
            let timeout_minimum = clock::millis(config::TIMEOUT_MINIMUM);

            if clock::diff(now, earliest) >= timeout_maximum
                || (command.round_trip_timeout >= command.round_trip_timeout_limit && clock::diff(now, earliest) >= timeout_minimum)
            {
                lost = true;
                break;
            }

            self.reliable_data_in_transit = self.reliable_data_in_transit.saturating_sub(command.fragment_length);
            command.round_trip_timeout *= 2;
            command.sent_time = None;
            self.loss.packets_lost += 1;
            requeued.push(command);
        }

        for command in requeued.into_iter().rev() {
            self.outgoing_reliable.push_front(command);
        }

        if lost {
            TimeoutOutcome::Lost
        } else {
            TimeoutOutcome::Ok
        }
    }

    /// Whether an unreliable command should be dropped by the throttle
    /// filter this round.
    pub fn throttle_filter(&mut self) -> bool {
        self.throttle.filter()
    }

    /// Configures this peer's throttle parameters (enqueues
    /// THROTTLE_CONFIGURE for the remote and applies the same parameters
    /// locally, matching ENet's `enet_peer_throttle_configure`).
    pub fn throttle_configure(&mut self, cfg: ThrottleConfig) {
        self.throttle.configure(cfg);
        self.queue_outgoing_control(Command::ThrottleConfigure {
            packet_throttle_interval: clock::millis(cfg.interval),
            packet_throttle_acceleration: cfg.acceleration,
            packet_throttle_deceleration: cfg.deceleration,
        });
    }

    /// Accepts (and marks seen) an inbound unsequenced group, returning
    /// `true` if it should be delivered.
    pub fn accept_unsequenced(&mut self, group: u32) -> bool {
        self.unsequenced_in.accept(group)
    }

    pub fn record_send(&mut self, now: u32) {
        self.last_send_time = now;
        self.loss.packets_sent += 1;
        self.loss.maybe_roll(now);
    }

    pub fn record_receive(&mut self, now: u32) {
        self.last_receive_time = now;
    }

    /// Whether every out-queue has drained, i.e. it is safe for a
    /// `DisconnectLater` peer to proceed with the disconnect handshake.
    pub fn outgoing_queues_empty(&self) -> bool {
        self.outgoing_reliable.is_empty() && self.outgoing_unreliable.is_empty() && self.sent_reliable.is_empty()
    }

    /// Queues `packet` for delivery on `channel_id`, routing it to the
    /// reliable, unreliable, or unsequenced out-queue according to its
    /// flags. Fails if the peer is not `Connected` or `channel_id` is out of
    /// range.
    pub fn send(&mut self, channel_id: u8, packet: Packet) -> Result<(), Error> {
        if !matches!(self.state, PeerState::Connected) {
            return Err(Error::NotConnected);
        }
        if channel_id as usize >= self.channels.len() {
            return Err(Error::InvalidChannel(channel_id));
        }

        let flags = packet.flags();
        let routed = if flags.contains(PacketFlags::UNSEQUENCED) {
            self.queue_outgoing_unsequenced(channel_id, packet)
        } else if flags.contains(PacketFlags::RELIABLE) {
            self.queue_outgoing_reliable(channel_id, packet)
        } else {
            self.queue_outgoing_unreliable(channel_id, packet)
        };
        routed.map_err(Error::InvalidConfig)
    }

    /// Queues a keepalive `PING` command.
    pub fn ping(&mut self) {
        self.queue_outgoing_control(Command::Ping);
    }

    /// Requests a graceful disconnect: queues a reliable `DISCONNECT`
    /// command and transitions to `Disconnecting`, which completes once the
    /// remote acknowledges it.
    pub fn disconnect(&mut self, data: u32) {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie) {
            return;
        }
        self.disconnect_data = data;
        self.queue_outgoing_control(Command::Disconnect { data });
        self.state = PeerState::Disconnecting;
    }

    /// Disconnects without waiting for the remote's acknowledgement: sends
    /// `DISCONNECT` unsequenced (best-effort, at most once) and immediately
    /// becomes a `Zombie` for local bookkeeping purposes.
    pub fn disconnect_now(&mut self, data: u32) {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie) {
            return;
        }
        self.disconnect_data = data;
        self.queue_outgoing_control_unsequenced(Command::Disconnect { data });
        self.state = PeerState::Zombie;
    }

    /// Requests a disconnect that waits for all currently queued outgoing
    /// data to be acknowledged before the `DISCONNECT` handshake begins.
    pub fn disconnect_later(&mut self, data: u32) {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie) {
            return;
        }
        self.disconnect_data = data;
        self.state = PeerState::DisconnectLater;
    }

    /// Current smoothed round-trip time estimate, in milliseconds.
    pub fn round_trip_time(&self) -> u32 {
        self.rtt.round_trip_time
    }

    /// Current packet-loss ratio, scaled to [`config::PACKET_LOSS_SCALE`].
    pub fn packet_loss(&self) -> u32 {
        self.loss.packet_loss
    }

    /// Number of channels negotiated for this connection.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// The peer's current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// The peer's remote address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Advances a `DisconnectLater` peer to `Disconnecting` once its
    /// outgoing queues have drained. Called once per service tick.
    pub fn advance_disconnect_later(&mut self) {
        if matches!(self.state, PeerState::DisconnectLater) && self.outgoing_queues_empty() {
            let data = self.disconnect_data;
            self.queue_outgoing_control(Command::Disconnect { data });
            self.state = PeerState::Disconnecting;
        }
    }
}

/// Outcome of a [`Peer::check_timeouts`] scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Ok,
    Lost,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn reliable_fragmentation_splits_large_packets() {
        let mut peer = Peer::new(PeerId(0), addr(), 1400, 0);
        peer.channels.push(Channel::new());
        let data = vec![7u8; 6000];
        peer.queue_outgoing_reliable(0, Packet::reliable(data)).unwrap();

        let max_fragment = peer.max_fragment_payload();
        let expected_fragments = (6000 + max_fragment - 1) / max_fragment;
        assert_eq!(peer.outgoing_reliable.len(), expected_fragments);

        let total: usize = peer.outgoing_reliable.iter().map(|c| c.fragment_length as usize).sum();
        assert_eq!(total, 6000);
    }

    #[test]
    fn throttle_update_is_monotone_in_rtt_sign() {
        let mut t = Throttle::new();
        t.limit = config::PACKET_THROTTLE_SCALE;
        let last_rtt = 200;
        let last_var = 10;
        let before = t.probability;
        t.update(100, last_rtt, last_var); // improving
        assert!(t.probability >= before);

        let mut t2 = Throttle::new();
        let before2 = t2.probability;
        t2.update(400, last_rtt, last_var); // worsening beyond last_rtt + 2*var
        assert!(t2.probability <= before2);
    }

    #[test]
    fn unsequenced_window_rejects_replays() {
        let mut w = UnsequencedWindow::new();
        assert!(w.accept(5));
        assert!(!w.accept(5));
    }

    #[test]
    fn unsequenced_window_advances_far_group() {
        let mut w = UnsequencedWindow::new();
        assert!(w.accept(5));
        assert!(w.accept(5000)); // far beyond window, forces advance+clear
        assert!(!w.accept(5)); // now stale relative to new window base
    }

    #[test]
    fn check_timeouts_requeues_before_timeout_limit() {
        let mut peer = Peer::new(PeerId(0), addr(), 1400, 0);
        let mut command = OutgoingCommand::new(0, 1, Command::Ping);
        command.sent_time = Some(0);
        command.round_trip_timeout = 100;
        command.round_trip_timeout_limit = 100 * config::TIMEOUT_LIMIT;
        peer.sent_reliable.push_back(command);

        let outcome = peer.check_timeouts(150);

        assert!(matches!(outcome, TimeoutOutcome::Ok));
        assert!(peer.sent_reliable.is_empty());
        assert_eq!(peer.outgoing_reliable.len(), 1);
        assert_eq!(peer.outgoing_reliable[0].round_trip_timeout, 200);
        assert_eq!(peer.outgoing_reliable[0].sent_time, None);
    }

    #[test]
    fn check_timeouts_declares_peer_lost_past_timeout_maximum() {
        let mut peer = Peer::new(PeerId(0), addr(), 1400, 0);
        let mut command = OutgoingCommand::new(0, 1, Command::Ping);
        command.sent_time = Some(0);
        command.round_trip_timeout = 100;
        command.round_trip_timeout_limit = 100 * config::TIMEOUT_LIMIT;
        peer.sent_reliable.push_back(command);

        let past_maximum = clock::millis(config::TIMEOUT_MAXIMUM) + 1;
        let outcome = peer.check_timeouts(past_maximum);

        assert!(matches!(outcome, TimeoutOutcome::Lost));
    }

    #[test]
    fn check_timeouts_declares_peer_lost_once_rto_saturates_within_minimum() {
        let mut peer = Peer::new(PeerId(0), addr(), 1400, 0);
        let mut command = OutgoingCommand::new(0, 1, Command::Ping);
        command.sent_time = Some(0);
        command.round_trip_timeout = 100;
        command.round_trip_timeout_limit = 100; // already saturated
        peer.sent_reliable.push_back(command);

        let past_minimum = clock::millis(config::TIMEOUT_MINIMUM) + 1;
        let outcome = peer.check_timeouts(past_minimum);

        assert!(matches!(outcome, TimeoutOutcome::Lost));
    }
}
