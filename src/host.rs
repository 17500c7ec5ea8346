//! The host service loop: peer table, connection admission, datagram
//! receive/dispatch, timeout/retransmission, bandwidth throttle
//! recomputation, and round-robin event delivery.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::channel::{Channel, IncomingReliablePayload, IncomingUnreliableCommand};
use crate::clock::{self, Clock};
use crate::config::{self, HostConfig};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketFlags};
use crate::peer::{Peer, PeerId, PeerState, TimeoutOutcome, CONTROL_CHANNEL};
use crate::protocol::{
    self, Command, CommandHeader, ConnectData, DatagramHeader, VerifyConnectData, COMMAND_HEADER_SIZE,
    DATAGRAM_HEADER_SIZE, FLAG_ACKNOWLEDGE, UNASSIGNED_PEER_ID,
};
use crate::socket::Socket;

/// An application-visible occurrence produced by [`Host::service`].
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer's handshake completed; it is now `Connected`.
    Connect(PeerId),
    /// An application packet was delivered on `channel`, in the order its
    /// channel's delivery rules require.
    Receive { peer: PeerId, channel: u8, packet: Packet },
    /// A peer left the connected set, either by request (remote `DISCONNECT`,
    /// carrying `data`) or because it timed out (`data` is `0`).
    Disconnect { peer: PeerId, data: u32 },
}

/// The reliable, ordered, multi-channel transport endpoint.
///
/// Owns a fixed-size peer table, the datagram socket, and the host-wide
/// bandwidth budget. All peers are serviced cooperatively from a single
/// call to [`Host::service`]; there is no internal threading.
pub struct Host<S: Socket> {
    socket: S,
    config: HostConfig,
    peers: Vec<Peer>,
    addresses: HashMap<SocketAddr, Vec<usize>>,
    clock: Clock,
    dispatch_cursor: usize,
    pending_events: std::collections::VecDeque<Event>,
    incoming_bandwidth: u32,
    outgoing_bandwidth: u32,
    bandwidth_throttle_epoch: u32,
    recv_buf: Vec<u8>,
}

impl<S: Socket> Host<S> {
    /// Builds a host with a fixed-size peer table sized by
    /// `config.peer_count`, validating `config` first.
    pub fn create(socket: S, config: HostConfig) -> Result<Self> {
        config.validate()?;
        let config = config.clamped();

        let now = 0;
        let placeholder: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let peers = (0..config.peer_count)
            .map(|i| Peer::new(PeerId(i as u16), placeholder, config.mtu, now))
            .collect();

        Ok(Self {
            socket,
            config,
            peers,
            addresses: HashMap::new(),
            clock: Clock::new(),
            dispatch_cursor: 0,
            pending_events: std::collections::VecDeque::new(),
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            bandwidth_throttle_epoch: 0,
            recv_buf: vec![0u8; config::MAX_MTU as usize],
        })
    }

    /// Read-only access to a peer by handle.
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id.0 as usize).filter(|p| !p.is_disconnected())
    }

    /// Mutable access to a peer by handle.
    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id.0 as usize).filter(|p| !p.is_disconnected())
    }

    /// Sets the host-wide bandwidth budget, in bytes/sec (`0` = unlimited).
    /// Takes effect on the next bandwidth-throttle recomputation.
    pub fn bandwidth_limit(&mut self, incoming: u32, outgoing: u32) {
        self.incoming_bandwidth = incoming;
        self.outgoing_bandwidth = outgoing;
    }

    /// Lowers the channel-count ceiling applied to future connections.
    pub fn channel_limit(&mut self, limit: u32) {
        self.config.channel_limit = config::clamp_channel_count(limit);
    }

    /// Begins a locally-initiated connection, returning the peer's handle
    /// immediately; the handshake completes asynchronously and is reported
    /// via [`Event::Connect`] from a later [`Host::service`] call.
    pub fn connect(&mut self, address: SocketAddr, channel_count: u32, user_data: u32) -> Result<PeerId> {
        let channel_count = config::clamp_channel_count(channel_count).min(self.config.channel_limit);
        let now = self.clock.now_ms();
        let slot = self.allocate_slot(address, now)?;

        let peer = &mut self.peers[slot];
        peer.state = PeerState::Connecting;
        peer.channels = (0..channel_count).map(|_| Channel::new()).collect();
        peer.connect_data = user_data;
        peer.challenge = rand::random();

        let connect_data = ConnectData {
            outgoing_peer_id: peer.id.0,
            mtu: peer.mtu,
            window_size: peer.window_size,
            channel_count,
            incoming_bandwidth: self.incoming_bandwidth,
            outgoing_bandwidth: self.outgoing_bandwidth,
            packet_throttle_interval: clock::millis(config::PACKET_THROTTLE_INTERVAL),
            packet_throttle_acceleration: config::DEFAULT_PACKET_THROTTLE_ACCELERATION,
            packet_throttle_deceleration: config::DEFAULT_PACKET_THROTTLE_DECELERATION,
        };
        peer.queue_outgoing_control(Command::Connect(connect_data));

        Ok(PeerId(slot as u16))
    }

    fn allocate_slot(&mut self, address: SocketAddr, now: u32) -> Result<usize> {
        let existing = self.addresses.entry(address).or_default();
        if existing.len() >= self.config.max_peers_per_address {
            return Err(Error::ResourceExhausted("max_peers_per_address reached"));
        }

        let slot = self
            .peers
            .iter()
            .position(|p| p.is_disconnected())
            .ok_or(Error::ResourceExhausted("peer table full"))?;

        self.peers[slot].reset(now);
        self.peers[slot].address = address;
        self.addresses.get_mut(&address).unwrap().push(slot);
        Ok(slot)
    }

    fn free_slot(&mut self, slot: usize, now: u32) {
        let address = self.peers[slot].address;
        self.peers[slot].reset(now);
        if let Some(list) = self.addresses.get_mut(&address) {
            list.retain(|&s| s != slot);
            if list.is_empty() {
                self.addresses.remove(&address);
            }
        }
    }

    /// Advances the protocol engine: receives and processes any pending
    /// datagrams, checks timeouts, recomputes bandwidth throttle if due, and
    /// flushes outgoing datagrams for every peer. Returns the next queued
    /// application event, if any, waiting up to `timeout` for one to appear
    /// if the pending queue is empty after the first pass.
    pub fn service(&mut self, timeout: Duration) -> Result<Option<Event>> {
        self.receive_all()?;
        let now = self.clock.now_ms();
        self.check_timeouts(now);
        self.maybe_throttle_bandwidth(now);
        self.dispatch_deliverable();
        self.reap_zombies(now);
        self.flush()?;

        if self.pending_events.is_empty() && !timeout.is_zero() {
            if self.socket.wait(timeout)? {
                self.receive_all()?;
                self.dispatch_deliverable();
                self.flush()?;
            }
        }

        Ok(self.pending_events.pop_front())
    }

    fn receive_all(&mut self) -> Result<()> {
        loop {
            let mut buf = std::mem::take(&mut self.recv_buf);
            let result = self.socket.receive(&mut buf);
            match result {
                Ok(Some((len, addr))) => {
                    self.handle_datagram(&buf[..len], addr);
                    self.recv_buf = buf;
                }
                Ok(None) => {
                    self.recv_buf = buf;
                    break;
                }
                Err(e) => {
                    self.recv_buf = buf;
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(())
    }

    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let header = match DatagramHeader::read(data) {
            Some(h) => h,
            None => {
                warn!("dropping truncated datagram from {}", addr);
                return;
            }
        };

        let slot = self.resolve_peer(&header, addr, &data[DATAGRAM_HEADER_SIZE..]);
        let slot = match slot {
            Some(s) => s,
            None => return,
        };

        let now = self.clock.now_ms();
        self.peers[slot].record_receive(now);

        let mut offset = DATAGRAM_HEADER_SIZE;
        while offset < data.len() {
            let decoded = match protocol::read_command(&data[offset..]) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    trace!("dropping malformed command in datagram from {}", addr);
                    break;
                }
                Err(e) => {
                    warn!("dropping malformed datagram from {}: {}", addr, e);
                    break;
                }
            };

            if decoded.header.flags & FLAG_ACKNOWLEDGE != 0 {
                self.peers[slot].queue_ack(decoded.header.channel_id, decoded.header, header.sent_time);
            }

            self.handle_command(slot, &decoded.header, decoded.command, decoded.payload, now);

            offset += decoded.consumed;
        }
    }

    /// Finds (or admits) the peer slot a datagram belongs to. `payload` is
    /// the datagram's command region, used only to sniff a leading `CONNECT`
    /// command when `header.peer_id` is unassigned.
    fn resolve_peer(&mut self, header: &DatagramHeader, addr: SocketAddr, payload: &[u8]) -> Option<usize> {
        if header.peer_id != UNASSIGNED_PEER_ID {
            let idx = header.peer_id as usize;
            if let Some(peer) = self.peers.get(idx) {
                if peer.address == addr && !peer.is_disconnected() {
                    return Some(idx);
                }
            }
        }

        let decoded = protocol::read_command(payload).ok().flatten()?;
        let connect_data = match decoded.command {
            Command::Connect(data) => data,
            _ => {
                trace!("dropping datagram from unknown peer {}", addr);
                return None;
            }
        };

        if let Some(&slot) = self.addresses.get(&addr).and_then(|slots| {
            slots
                .iter()
                .find(|&&s| matches!(self.peers[s].state, PeerState::AcknowledgingConnect | PeerState::ConnectionPending))
        }) {
            return Some(slot);
        }

        let now = self.clock.now_ms();
        let slot = match self.allocate_slot(addr, now) {
            Ok(s) => s,
            Err(e) => {
                debug!("refusing connection from {}: {}", addr, e);
                return None;
            }
        };

        self.admit_connection(slot, connect_data);
        Some(slot)
    }

    fn admit_connection(&mut self, slot: usize, connect_data: ConnectData) {
        let channel_count = config::clamp_channel_count(connect_data.channel_count).min(self.config.channel_limit);
        let peer = &mut self.peers[slot];

        peer.state = PeerState::AcknowledgingConnect;
        peer.outgoing_peer_id = connect_data.outgoing_peer_id;
        peer.mtu = peer.mtu.min(connect_data.mtu);
        peer.window_size = config::clamp_window_size(connect_data.window_size.min(peer.window_size));
        peer.channels = (0..channel_count).map(|_| Channel::new()).collect();
        peer.connect_data = 0;

        let verify = VerifyConnectData {
            connect: ConnectData {
                outgoing_peer_id: connect_data.outgoing_peer_id,
                mtu: peer.mtu,
                window_size: peer.window_size,
                channel_count,
                incoming_bandwidth: self.incoming_bandwidth,
                outgoing_bandwidth: self.outgoing_bandwidth,
                packet_throttle_interval: connect_data.packet_throttle_interval,
                packet_throttle_acceleration: connect_data.packet_throttle_acceleration,
                packet_throttle_deceleration: connect_data.packet_throttle_deceleration,
            },
            incoming_peer_id: peer.id.0,
        };
        peer.queue_outgoing_control(Command::VerifyConnect(verify));
        peer.state = PeerState::ConnectionPending;
    }

    fn handle_command(&mut self, slot: usize, header: &CommandHeader, command: Command, payload: &[u8], now: u32) {
        match command {
            Command::Acknowledge { received_reliable_sequence_number, received_sent_time } => {
                let peer = &mut self.peers[slot];
                let was_pending = matches!(peer.state, PeerState::ConnectionPending);
                let was_disconnecting = matches!(peer.state, PeerState::Disconnecting);
                if peer.handle_acknowledge(now, received_reliable_sequence_number, received_sent_time) {
                    if was_pending && peer.sent_reliable.is_empty() && peer.outgoing_reliable.is_empty() {
                        peer.state = PeerState::Connected;
                        self.pending_events.push_back(Event::Connect(PeerId(slot as u16)));
                    } else if was_disconnecting && peer.outgoing_queues_empty() {
                        let data = peer.disconnect_data;
                        peer.state = PeerState::Zombie;
                        self.pending_events.push_back(Event::Disconnect { peer: PeerId(slot as u16), data });
                    }
                }
            }
            Command::Connect(_) => {
                trace!("ignoring duplicate CONNECT from established peer slot {}", slot);
            }
            Command::VerifyConnect(data) => {
                let peer = &mut self.peers[slot];
                if !matches!(peer.state, PeerState::Connecting) {
                    trace!("ignoring unexpected VERIFY_CONNECT on slot {}", slot);
                    return;
                }
                peer.outgoing_peer_id = data.incoming_peer_id;
                peer.mtu = peer.mtu.min(data.connect.mtu);
                peer.window_size = config::clamp_window_size(data.connect.window_size);
                peer.state = PeerState::Connected;
                self.pending_events.push_back(Event::Connect(PeerId(slot as u16)));
            }
            Command::Disconnect { data } => {
                let peer = &mut self.peers[slot];
                let already_gone = peer.is_zombie();
                peer.state = PeerState::Zombie;
                if !already_gone {
                    self.pending_events.push_back(Event::Disconnect { peer: PeerId(slot as u16), data });
                }
            }
            Command::Ping => {}
            Command::SendReliable => {
                let channel_id = header.channel_id;
                let seq = header.reliable_sequence_number;
                if let Some(channel) = self.peers[slot].channels.get_mut(channel_id as usize) {
                    let packet = Packet::with_flags(payload.to_vec(), PacketFlags::RELIABLE);
                    channel.queue_incoming_reliable(seq, IncomingReliablePayload::Packet(packet));
                }
            }
            Command::SendFragment(frag) => {
                let channel_id = header.channel_id;
                if let Some(channel) = self.peers[slot].channels.get_mut(channel_id as usize) {
                    if channel
                        .apply_fragment(frag.start_sequence_number, frag.fragment_number, frag.fragment_offset, payload)
                        .is_none()
                    {
                        let assembly = crate::channel::FragmentAssembly::new(frag.total_length, frag.fragment_count);
                        if channel.queue_incoming_reliable(frag.start_sequence_number, IncomingReliablePayload::Fragment(assembly)) {
                            channel.apply_fragment(frag.start_sequence_number, frag.fragment_number, frag.fragment_offset, payload);
                        }
                    }
                }
            }
            Command::SendUnreliable { unreliable_sequence_number } => {
                let channel_id = header.channel_id;
                if let Some(channel) = self.peers[slot].channels.get_mut(channel_id as usize) {
                    let packet = Packet::unreliable(payload.to_vec());
                    channel.queue_incoming_unreliable(IncomingUnreliableCommand {
                        sequence_number: unreliable_sequence_number,
                        reliable_sequence_number: header.reliable_sequence_number,
                        packet,
                    });
                }
            }
            Command::SendUnsequenced { unsequenced_group } => {
                let peer = &mut self.peers[slot];
                if peer.accept_unsequenced(unsequenced_group) {
                    let packet = Packet::unsequenced(payload.to_vec());
                    self.pending_events.push_back(Event::Receive { peer: PeerId(slot as u16), channel: header.channel_id, packet });
                }
            }
            Command::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                let peer = &mut self.peers[slot];
                peer.incoming_bandwidth = incoming_bandwidth;
                peer.outgoing_bandwidth = outgoing_bandwidth;
            }
            Command::ThrottleConfigure { packet_throttle_interval, packet_throttle_acceleration, packet_throttle_deceleration } => {
                let peer = &mut self.peers[slot];
                peer.throttle.interval_ms = packet_throttle_interval;
                peer.throttle.acceleration = packet_throttle_acceleration;
                peer.throttle.deceleration = packet_throttle_deceleration;
            }
        }
    }

    fn check_timeouts(&mut self, now: u32) {
        for slot in 0..self.peers.len() {
            if self.peers[slot].is_disconnected() || self.peers[slot].is_zombie() {
                continue;
            }
            if matches!(self.peers[slot].check_timeouts(now), TimeoutOutcome::Lost) {
                self.peers[slot].state = PeerState::Zombie;
                self.pending_events.push_back(Event::Disconnect { peer: PeerId(slot as u16), data: 0 });
                continue;
            }
            if matches!(self.peers[slot].state, PeerState::Connected)
                && clock::diff(now, self.peers[slot].last_receive_time) >= clock::millis(config::PING_INTERVAL)
            {
                self.peers[slot].queue_outgoing_control(Command::Ping);
            }

            self.peers[slot].advance_disconnect_later();
        }
    }

    /// Recomputes each connected peer's fair-share bandwidth allotment once
    /// per [`config::HOST_BANDWIDTH_THROTTLE_INTERVAL`] and notifies peers
    /// whose allotment changed via `BANDWIDTH_LIMIT` (decision recorded in
    /// `DESIGN.md`: emitted only on change, riding the ordinary reliable
    /// control-command path rather than a bespoke atomic update). Stores the
    /// computed allotment in `allotted_{incoming,outgoing}_bandwidth` rather
    /// than overwriting `incoming_bandwidth`/`outgoing_bandwidth`, which stay
    /// the peer's declared limits as set by CONNECT/BANDWIDTH_LIMIT.
    fn maybe_throttle_bandwidth(&mut self, now: u32) {
        if clock::diff(now, self.bandwidth_throttle_epoch) < clock::millis(config::HOST_BANDWIDTH_THROTTLE_INTERVAL) {
            return;
        }
        self.bandwidth_throttle_epoch = now;

        let connected = self.peers.iter().filter(|p| matches!(p.state, PeerState::Connected)).count() as u32;
        if connected == 0 {
            return;
        }

        let fair_incoming = if self.incoming_bandwidth == 0 { 0 } else { self.incoming_bandwidth / connected };
        let fair_outgoing = if self.outgoing_bandwidth == 0 { 0 } else { self.outgoing_bandwidth / connected };

        for peer in self.peers.iter_mut().filter(|p| matches!(p.state, PeerState::Connected)) {
            if peer.allotted_incoming_bandwidth != fair_incoming || peer.allotted_outgoing_bandwidth != fair_outgoing {
                peer.allotted_incoming_bandwidth = fair_incoming;
                peer.allotted_outgoing_bandwidth = fair_outgoing;
                peer.queue_outgoing_control(Command::BandwidthLimit {
                    incoming_bandwidth: fair_incoming,
                    outgoing_bandwidth: fair_outgoing,
                });
            }
        }
    }

    /// Drains every connected peer's channels for newly-deliverable packets,
    /// starting the scan at `dispatch_cursor` so a peer with a standing
    /// backlog cannot starve its neighbors of delivery turns across calls.
    fn dispatch_deliverable(&mut self) {
        let n = self.peers.len();
        if n == 0 {
            return;
        }
        for i in 0..n {
            let slot = (self.dispatch_cursor + i) % n;
            if !matches!(self.peers[slot].state, PeerState::Connected | PeerState::DisconnectLater) {
                continue;
            }
            for channel_id in 0..self.peers[slot].channels.len() {
                let packets = self.peers[slot].channels[channel_id].drain_deliverable();
                for packet in packets {
                    self.pending_events.push_back(Event::Receive {
                        peer: PeerId(slot as u16),
                        channel: channel_id as u8,
                        packet,
                    });
                }
            }
        }
        self.dispatch_cursor = (self.dispatch_cursor + 1) % n;
    }

    fn reap_zombies(&mut self, now: u32) {
        for slot in 0..self.peers.len() {
            if self.peers[slot].is_zombie() && self.peers[slot].outgoing_queues_empty() {
                self.free_slot(slot, now);
            }
        }
    }

    /// Composes and sends one outgoing datagram per peer that has something
    /// to say: queued acknowledgements, unsent reliable commands (respecting
    /// the reliable window), and unsent unreliable commands (subject to the
    /// packet-throttle filter). Peers with nothing pending are left silent.
    pub fn flush(&mut self) -> Result<()> {
        let now = self.clock.now_ms();
        for slot in 0..self.peers.len() {
            if self.peers[slot].is_disconnected() {
                continue;
            }
            self.flush_peer(slot, now)?;
        }
        Ok(())
    }

    fn flush_peer(&mut self, slot: usize, now: u32) -> Result<()> {
        let mtu = self.peers[slot].mtu as usize;
        let budget = mtu.saturating_sub(DATAGRAM_HEADER_SIZE);
        let mut body = Vec::with_capacity(budget.min(mtu));
        let mut command_count: u8 = 0;

        while let Some(ack) = self.peers[slot].ack_queue.pop_front() {
            if body.len() + COMMAND_HEADER_SIZE + 8 > budget {
                self.peers[slot].ack_queue.push_front(ack);
                break;
            }
            let header = CommandHeader {
                command: protocol::CMD_ACKNOWLEDGE,
                channel_id: ack.channel_id,
                flags: 0,
                reserved: 0,
                command_length: (COMMAND_HEADER_SIZE + 8) as u32,
                reliable_sequence_number: ack.header.reliable_sequence_number,
            };
            let command = Command::Acknowledge {
                received_reliable_sequence_number: ack.header.reliable_sequence_number,
                received_sent_time: ack.received_sent_time,
            };
            protocol::write_command(&mut body, &header, &command, &[]);
            command_count += 1;
        }

        while let Some(mut cmd) = self.peers[slot].outgoing_reliable.pop_front() {
            let payload_len = cmd.packet.as_ref().map(|p| p.len()).unwrap_or(0);
            let fragment_len = cmd.fragment_length.max(payload_len as u32);
            let size = COMMAND_HEADER_SIZE + cmd.command.fixed_size() + payload_len;
            if body.len() + size > budget
                || self.peers[slot].reliable_data_in_transit + fragment_len > self.peers[slot].window_size
            {
                self.peers[slot].outgoing_reliable.push_front(cmd);
                break;
            }

            let rtt = self.peers[slot].rtt.round_trip_time;
            let rtt_var = self.peers[slot].rtt.round_trip_time_variance;
            let rto = rtt + 4 * rtt_var;
            cmd.sent_time = Some(now);
            cmd.round_trip_timeout = rto.max(100);
            cmd.round_trip_timeout_limit = cmd.round_trip_timeout * config::TIMEOUT_LIMIT;

            let payload_slice: &[u8] = cmd
                .packet
                .as_ref()
                .map(|p| &p.data()[cmd.fragment_offset as usize..cmd.fragment_offset as usize + cmd.fragment_length as usize])
                .unwrap_or(&[]);
            let header = CommandHeader {
                command: cmd.command.id(),
                channel_id: cmd.channel_id,
                flags: FLAG_ACKNOWLEDGE,
                reserved: 0,
                command_length: size as u32,
                reliable_sequence_number: cmd.reliable_sequence_number,
            };
            protocol::write_command(&mut body, &header, &cmd.command, payload_slice);
            command_count += 1;

            self.peers[slot].reliable_data_in_transit += fragment_len;
            self.peers[slot].sent_reliable.push_back(cmd);
        }

        while let Some(cmd) = self.peers[slot].outgoing_unreliable.pop_front() {
            if cmd.channel_id != CONTROL_CHANNEL && self.peers[slot].throttle_filter() {
                continue;
            }

            let payload_len = cmd.packet.as_ref().map(|p| p.len()).unwrap_or(0);
            let size = COMMAND_HEADER_SIZE + cmd.command.fixed_size() + payload_len;
            if body.len() + size > budget {
                self.peers[slot].outgoing_unreliable.push_front(cmd);
                break;
            }

            let header = CommandHeader {
                command: cmd.command.id(),
                channel_id: cmd.channel_id,
                flags: 0,
                reserved: 0,
                command_length: size as u32,
                reliable_sequence_number: cmd.reliable_sequence_number,
            };
            let payload: &[u8] = cmd.packet.as_ref().map(|p| p.data()).unwrap_or(&[]);
            protocol::write_command(&mut body, &header, &cmd.command, payload);
            command_count += 1;
        }

        if command_count == 0 {
            return Ok(());
        }

        let header = DatagramHeader {
            peer_id: self.peers[slot].outgoing_peer_id,
            flags: 0,
            command_count,
            sent_time: now,
            challenge: self.peers[slot].challenge,
        };
        let mut datagram = Vec::with_capacity(DATAGRAM_HEADER_SIZE + body.len());
        header.write(&mut datagram);
        datagram.extend_from_slice(&body);

        let address = self.peers[slot].address;
        self.socket.send(address, &datagram).map_err(Error::Io)?;
        self.peers[slot].record_send(now);
        Ok(())
    }

    /// Queues `packet` for delivery to every currently connected peer on
    /// `channel_id`.
    pub fn broadcast(&mut self, channel_id: u8, packet: Packet) {
        for slot in 0..self.peers.len() {
            if !matches!(self.peers[slot].state, PeerState::Connected) {
                continue;
            }
            let result = if packet.is_reliable() {
                self.peers[slot].queue_outgoing_reliable(channel_id, packet.clone())
            } else if packet.is_unsequenced() {
                self.peers[slot].queue_outgoing_unsequenced(channel_id, packet.clone())
            } else {
                self.peers[slot].queue_outgoing_unreliable(channel_id, packet.clone())
            };
            if let Err(e) = result {
                warn!("broadcast to peer {} dropped: {}", slot, e);
            }
        }
    }
}
