//! The command wire codec: fixed-layout command structures and the datagram
//! header, all big-endian, hand-packed rather than through a serialization
//! crate.

use crate::error::Error;

/// Size in bytes of the fixed command header that precedes every command.
pub const COMMAND_HEADER_SIZE: usize = 12;
/// Size in bytes of the datagram header that precedes every command run.
pub const DATAGRAM_HEADER_SIZE: usize = 12;

/// `SEND_FRAGMENT`'s fixed fields, ahead of the fragment payload slice.
pub const FRAGMENT_HEADER_SIZE: usize = 20;

/// Flag bit on [`CommandHeader::flags`] requesting that the receiver
/// acknowledge this command explicitly (reliable commands only).
pub const FLAG_ACKNOWLEDGE: u8 = 0x01;

/// Sentinel [`DatagramHeader::peer_id`] value meaning "not yet assigned",
/// used only on the `CONNECT` datagram that opens a handshake, before either
/// side knows what index the other has allocated for it.
pub const UNASSIGNED_PEER_ID: u16 = 0xffff;

macro_rules! command_ids {
    ($($name:ident = $value:expr),+ $(,)?) => {
        $(pub const $name: u8 = $value;)+
    };
}

command_ids! {
    CMD_ACKNOWLEDGE = 1,
    CMD_CONNECT = 2,
    CMD_VERIFY_CONNECT = 3,
    CMD_DISCONNECT = 4,
    CMD_PING = 5,
    CMD_SEND_RELIABLE = 6,
    CMD_SEND_UNRELIABLE = 7,
    CMD_SEND_UNSEQUENCED = 8,
    CMD_SEND_FRAGMENT = 9,
    CMD_BANDWIDTH_LIMIT = 10,
    CMD_THROTTLE_CONFIGURE = 11,
}

/// The fixed header prefixing every command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    pub command: u8,
    pub channel_id: u8,
    pub flags: u8,
    pub reserved: u8,
    pub command_length: u32,
    pub reliable_sequence_number: u32,
}

impl CommandHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.command);
        out.push(self.channel_id);
        out.push(self.flags);
        out.push(self.reserved);
        out.extend_from_slice(&self.command_length.to_be_bytes());
        out.extend_from_slice(&self.reliable_sequence_number.to_be_bytes());
    }

    pub fn read(data: &[u8]) -> Option<Self> {
        if data.len() < COMMAND_HEADER_SIZE {
            return None;
        }
        Some(Self {
            command: data[0],
            channel_id: data[1],
            flags: data[2],
            reserved: data[3],
            command_length: u32::from_be_bytes(data[4..8].try_into().ok()?),
            reliable_sequence_number: u32::from_be_bytes(data[8..12].try_into().ok()?),
        })
    }
}

/// The fixed header prefixing every datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramHeader {
    pub peer_id: u16,
    pub flags: u8,
    pub command_count: u8,
    pub sent_time: u32,
    pub challenge: u32,
}

impl DatagramHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.peer_id.to_be_bytes());
        out.push(self.flags);
        out.push(self.command_count);
        out.extend_from_slice(&self.sent_time.to_be_bytes());
        out.extend_from_slice(&self.challenge.to_be_bytes());
    }

    pub fn read(data: &[u8]) -> Option<Self> {
        if data.len() < DATAGRAM_HEADER_SIZE {
            return None;
        }
        Some(Self {
            peer_id: u16::from_be_bytes(data[0..2].try_into().ok()?),
            flags: data[2],
            command_count: data[3],
            sent_time: u32::from_be_bytes(data[4..8].try_into().ok()?),
            challenge: u32::from_be_bytes(data[8..12].try_into().ok()?),
        })
    }
}

/// `CONNECT`'s trailing fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectData {
    pub outgoing_peer_id: u16,
    pub mtu: u16,
    pub window_size: u32,
    pub channel_count: u32,
    pub incoming_bandwidth: u32,
    pub outgoing_bandwidth: u32,
    pub packet_throttle_interval: u32,
    pub packet_throttle_acceleration: u32,
    pub packet_throttle_deceleration: u32,
}

pub const CONNECT_DATA_SIZE: usize = 2 + 2 + 4 * 7;

impl ConnectData {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.outgoing_peer_id.to_be_bytes());
        out.extend_from_slice(&self.mtu.to_be_bytes());
        out.extend_from_slice(&self.window_size.to_be_bytes());
        out.extend_from_slice(&self.channel_count.to_be_bytes());
        out.extend_from_slice(&self.incoming_bandwidth.to_be_bytes());
        out.extend_from_slice(&self.outgoing_bandwidth.to_be_bytes());
        out.extend_from_slice(&self.packet_throttle_interval.to_be_bytes());
        out.extend_from_slice(&self.packet_throttle_acceleration.to_be_bytes());
        out.extend_from_slice(&self.packet_throttle_deceleration.to_be_bytes());
    }

    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < CONNECT_DATA_SIZE {
            return None;
        }
        Some(Self {
            outgoing_peer_id: u16::from_be_bytes(data[0..2].try_into().ok()?),
            mtu: u16::from_be_bytes(data[2..4].try_into().ok()?),
            window_size: u32::from_be_bytes(data[4..8].try_into().ok()?),
            channel_count: u32::from_be_bytes(data[8..12].try_into().ok()?),
            incoming_bandwidth: u32::from_be_bytes(data[12..16].try_into().ok()?),
            outgoing_bandwidth: u32::from_be_bytes(data[16..20].try_into().ok()?),
            packet_throttle_interval: u32::from_be_bytes(data[20..24].try_into().ok()?),
            packet_throttle_acceleration: u32::from_be_bytes(data[24..28].try_into().ok()?),
            packet_throttle_deceleration: u32::from_be_bytes(data[28..32].try_into().ok()?),
        })
    }
}

/// `VERIFY_CONNECT`'s trailing fields: a mirror of [`ConnectData`] plus the
/// responder's own incoming peer ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyConnectData {
    pub connect: ConnectData,
    pub incoming_peer_id: u16,
}

pub const VERIFY_CONNECT_DATA_SIZE: usize = CONNECT_DATA_SIZE + 2;

impl VerifyConnectData {
    fn write(&self, out: &mut Vec<u8>) {
        self.connect.write(out);
        out.extend_from_slice(&self.incoming_peer_id.to_be_bytes());
    }

    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < VERIFY_CONNECT_DATA_SIZE {
            return None;
        }
        let connect = ConnectData::read(data)?;
        let incoming_peer_id = u16::from_be_bytes(data[CONNECT_DATA_SIZE..CONNECT_DATA_SIZE + 2].try_into().ok()?);
        Some(Self { connect, incoming_peer_id })
    }
}

/// `SEND_FRAGMENT`'s trailing fixed fields, ahead of the fragment payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentData {
    pub start_sequence_number: u32,
    pub fragment_count: u32,
    pub fragment_number: u32,
    pub total_length: u32,
    pub fragment_offset: u32,
}

impl FragmentData {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.start_sequence_number.to_be_bytes());
        out.extend_from_slice(&self.fragment_count.to_be_bytes());
        out.extend_from_slice(&self.fragment_number.to_be_bytes());
        out.extend_from_slice(&self.total_length.to_be_bytes());
        out.extend_from_slice(&self.fragment_offset.to_be_bytes());
    }

    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < FRAGMENT_HEADER_SIZE {
            return None;
        }
        Some(Self {
            start_sequence_number: u32::from_be_bytes(data[0..4].try_into().ok()?),
            fragment_count: u32::from_be_bytes(data[4..8].try_into().ok()?),
            fragment_number: u32::from_be_bytes(data[8..12].try_into().ok()?),
            total_length: u32::from_be_bytes(data[12..16].try_into().ok()?),
            fragment_offset: u32::from_be_bytes(data[16..20].try_into().ok()?),
        })
    }
}

/// A decoded command variant, independent of its header.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Acknowledge {
        received_reliable_sequence_number: u32,
        received_sent_time: u32,
    },
    Connect(ConnectData),
    VerifyConnect(VerifyConnectData),
    Disconnect {
        data: u32,
    },
    Ping,
    SendReliable,
    SendUnreliable {
        unreliable_sequence_number: u32,
    },
    SendUnsequenced {
        unsequenced_group: u32,
    },
    SendFragment(FragmentData),
    BandwidthLimit {
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    },
    ThrottleConfigure {
        packet_throttle_interval: u32,
        packet_throttle_acceleration: u32,
        packet_throttle_deceleration: u32,
    },
}

impl Command {
    /// The wire command ID for this variant.
    pub fn id(&self) -> u8 {
        match self {
            Command::Acknowledge { .. } => CMD_ACKNOWLEDGE,
            Command::Connect(_) => CMD_CONNECT,
            Command::VerifyConnect(_) => CMD_VERIFY_CONNECT,
            Command::Disconnect { .. } => CMD_DISCONNECT,
            Command::Ping => CMD_PING,
            Command::SendReliable => CMD_SEND_RELIABLE,
            Command::SendUnreliable { .. } => CMD_SEND_UNRELIABLE,
            Command::SendUnsequenced { .. } => CMD_SEND_UNSEQUENCED,
            Command::SendFragment(_) => CMD_SEND_FRAGMENT,
            Command::BandwidthLimit { .. } => CMD_BANDWIDTH_LIMIT,
            Command::ThrottleConfigure { .. } => CMD_THROTTLE_CONFIGURE,
        }
    }

    /// Size, in bytes, of this variant's fixed trailing fields (not
    /// including the command header or any inline payload).
    pub fn fixed_size(&self) -> usize {
        match self {
            Command::Acknowledge { .. } => 8,
            Command::Connect(_) => CONNECT_DATA_SIZE,
            Command::VerifyConnect(_) => VERIFY_CONNECT_DATA_SIZE,
            Command::Disconnect { .. } => 4,
            Command::Ping => 0,
            Command::SendReliable => 0,
            Command::SendUnreliable { .. } => 4,
            Command::SendUnsequenced { .. } => 4,
            Command::SendFragment(_) => FRAGMENT_HEADER_SIZE,
            Command::BandwidthLimit { .. } => 8,
            Command::ThrottleConfigure { .. } => 12,
        }
    }

    fn write_fixed(&self, out: &mut Vec<u8>) {
        match self {
            Command::Acknowledge { received_reliable_sequence_number, received_sent_time } => {
                out.extend_from_slice(&received_reliable_sequence_number.to_be_bytes());
                out.extend_from_slice(&received_sent_time.to_be_bytes());
            }
            Command::Connect(data) => data.write(out),
            Command::VerifyConnect(data) => data.write(out),
            Command::Disconnect { data } => out.extend_from_slice(&data.to_be_bytes()),
            Command::Ping | Command::SendReliable => {}
            Command::SendUnreliable { unreliable_sequence_number } => {
                out.extend_from_slice(&unreliable_sequence_number.to_be_bytes())
            }
            Command::SendUnsequenced { unsequenced_group } => {
                out.extend_from_slice(&unsequenced_group.to_be_bytes())
            }
            Command::SendFragment(data) => data.write(out),
            Command::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                out.extend_from_slice(&incoming_bandwidth.to_be_bytes());
                out.extend_from_slice(&outgoing_bandwidth.to_be_bytes());
            }
            Command::ThrottleConfigure {
                packet_throttle_interval,
                packet_throttle_acceleration,
                packet_throttle_deceleration,
            } => {
                out.extend_from_slice(&packet_throttle_interval.to_be_bytes());
                out.extend_from_slice(&packet_throttle_acceleration.to_be_bytes());
                out.extend_from_slice(&packet_throttle_deceleration.to_be_bytes());
            }
        }
    }

    fn read_fixed(command_id: u8, data: &[u8]) -> Option<Self> {
        Some(match command_id {
            CMD_ACKNOWLEDGE => {
                if data.len() < 8 {
                    return None;
                }
                Command::Acknowledge {
                    received_reliable_sequence_number: u32::from_be_bytes(data[0..4].try_into().ok()?),
                    received_sent_time: u32::from_be_bytes(data[4..8].try_into().ok()?),
                }
            }
            CMD_CONNECT => Command::Connect(ConnectData::read(data)?),
            CMD_VERIFY_CONNECT => Command::VerifyConnect(VerifyConnectData::read(data)?),
            CMD_DISCONNECT => {
                if data.len() < 4 {
                    return None;
                }
                Command::Disconnect { data: u32::from_be_bytes(data[0..4].try_into().ok()?) }
            }
            CMD_PING => Command::Ping,
            CMD_SEND_RELIABLE => Command::SendReliable,
            CMD_SEND_UNRELIABLE => {
                if data.len() < 4 {
                    return None;
                }
                Command::SendUnreliable { unreliable_sequence_number: u32::from_be_bytes(data[0..4].try_into().ok()?) }
            }
            CMD_SEND_UNSEQUENCED => {
                if data.len() < 4 {
                    return None;
                }
                Command::SendUnsequenced { unsequenced_group: u32::from_be_bytes(data[0..4].try_into().ok()?) }
            }
            CMD_SEND_FRAGMENT => Command::SendFragment(FragmentData::read(data)?),
            CMD_BANDWIDTH_LIMIT => {
                if data.len() < 8 {
                    return None;
                }
                Command::BandwidthLimit {
                    incoming_bandwidth: u32::from_be_bytes(data[0..4].try_into().ok()?),
                    outgoing_bandwidth: u32::from_be_bytes(data[4..8].try_into().ok()?),
                }
            }
            CMD_THROTTLE_CONFIGURE => {
                if data.len() < 12 {
                    return None;
                }
                Command::ThrottleConfigure {
                    packet_throttle_interval: u32::from_be_bytes(data[0..4].try_into().ok()?),
                    packet_throttle_acceleration: u32::from_be_bytes(data[4..8].try_into().ok()?),
                    packet_throttle_deceleration: u32::from_be_bytes(data[8..12].try_into().ok()?),
                }
            }
            _ => return None,
        })
    }

    /// Whether this variant carries an inline application payload
    /// immediately following its fixed fields.
    pub fn carries_payload(&self) -> bool {
        matches!(
            self,
            Command::SendReliable
                | Command::SendUnreliable { .. }
                | Command::SendUnsequenced { .. }
                | Command::SendFragment(_)
        )
    }
}

/// Writes `header` and `command`'s fixed fields, followed by `payload` (if
/// any), into `out`. `header.command_length` is expected to already equal
/// `COMMAND_HEADER_SIZE + command.fixed_size() + payload.len()`.
pub fn write_command(out: &mut Vec<u8>, header: &CommandHeader, command: &Command, payload: &[u8]) {
    header.write(out);
    command.write_fixed(out);
    out.extend_from_slice(payload);
}

/// One decoded command: its header, typed variant, and (for data-bearing
/// variants) a slice into the original datagram covering its payload.
pub struct DecodedCommand<'a> {
    pub header: CommandHeader,
    pub command: Command,
    pub payload: &'a [u8],
    /// Total bytes consumed from the datagram, i.e. `header.command_length`.
    pub consumed: usize,
}

/// Decodes one command starting at the front of `data`.
///
/// Returns `Err(MalformedDatagram-shaped Error)` only for conditions the
/// caller cannot usefully recover from at this datagram (header truncated);
/// an unrecognized command ID or a `command_length` shorter than the
/// variant's minimum is reported as `Ok(None)` so the engine can drop just
/// this command and keep scanning.
pub fn read_command(data: &[u8]) -> Result<Option<DecodedCommand<'_>>, Error> {
    let header = match CommandHeader::read(data) {
        Some(h) => h,
        None => return Err(Error::InvalidConfig("datagram truncated before command header")),
    };

    let command_length = header.command_length as usize;
    if command_length < COMMAND_HEADER_SIZE || command_length > data.len() {
        return Ok(None);
    }

    let fixed_start = COMMAND_HEADER_SIZE;
    let fixed_and_payload = &data[fixed_start..command_length];

    let command = match Command::read_fixed(header.command, fixed_and_payload) {
        Some(c) => c,
        None => return Ok(None),
    };

    let fixed_size = command.fixed_size();
    if fixed_and_payload.len() < fixed_size {
        return Ok(None);
    }

    let payload = &fixed_and_payload[fixed_size..];

    Ok(Some(DecodedCommand { header, command, payload, consumed: command_length }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_header_round_trips() {
        let header = DatagramHeader { peer_id: 7, flags: 0, command_count: 2, sent_time: 123456, challenge: 0xdead_beef };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), DATAGRAM_HEADER_SIZE);
        assert_eq!(DatagramHeader::read(&buf).unwrap(), header);
    }

    #[test]
    fn ping_round_trips() {
        let header = CommandHeader {
            command: CMD_PING,
            channel_id: 0,
            flags: 0,
            reserved: 0,
            command_length: (COMMAND_HEADER_SIZE) as u32,
            reliable_sequence_number: 5,
        };
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &Command::Ping, &[]);
        let decoded = read_command(&buf).unwrap().unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.command, Command::Ping);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn send_reliable_round_trips_with_payload() {
        let payload = b"hello world";
        let header = CommandHeader {
            command: CMD_SEND_RELIABLE,
            channel_id: 2,
            flags: FLAG_ACKNOWLEDGE,
            reserved: 0,
            command_length: (COMMAND_HEADER_SIZE + payload.len()) as u32,
            reliable_sequence_number: 9,
        };
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &Command::SendReliable, payload);
        let decoded = read_command(&buf).unwrap().unwrap();
        assert_eq!(decoded.command, Command::SendReliable);
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.consumed, buf.len());
    }

    #[test]
    fn send_fragment_round_trips() {
        let payload = b"fragment-bytes";
        let fragment = FragmentData {
            start_sequence_number: 10,
            fragment_count: 5,
            fragment_number: 2,
            total_length: 6000,
            fragment_offset: 2712,
        };
        let header = CommandHeader {
            command: CMD_SEND_FRAGMENT,
            channel_id: 0,
            flags: FLAG_ACKNOWLEDGE,
            reserved: 0,
            command_length: (COMMAND_HEADER_SIZE + FRAGMENT_HEADER_SIZE + payload.len()) as u32,
            reliable_sequence_number: 12,
        };
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &Command::SendFragment(fragment), payload);
        let decoded = read_command(&buf).unwrap().unwrap();
        assert_eq!(decoded.command, Command::SendFragment(fragment));
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn unknown_command_id_is_dropped_not_fatal() {
        let mut buf = vec![0u8; COMMAND_HEADER_SIZE];
        buf[0] = 200; // not a recognized command id
        buf[4..8].copy_from_slice(&(COMMAND_HEADER_SIZE as u32).to_be_bytes());
        assert!(read_command(&buf).unwrap().is_none());
    }

    #[test]
    fn truncated_command_length_is_dropped_not_fatal() {
        let header = CommandHeader {
            command: CMD_SEND_UNRELIABLE,
            channel_id: 0,
            flags: 0,
            reserved: 0,
            command_length: (COMMAND_HEADER_SIZE + 4 + 100) as u32, // claims more than buffer holds
            reliable_sequence_number: 0,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        buf.extend_from_slice(&0u32.to_be_bytes());
        assert!(read_command(&buf).unwrap().is_none());
    }

    #[test]
    fn connect_and_verify_connect_round_trip() {
        let connect = ConnectData {
            outgoing_peer_id: 3,
            mtu: 1400,
            window_size: 65536,
            channel_count: 4,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            packet_throttle_interval: 5000,
            packet_throttle_acceleration: 2,
            packet_throttle_deceleration: 2,
        };
        let verify = VerifyConnectData { connect, incoming_peer_id: 9 };
        let header = CommandHeader {
            command: CMD_VERIFY_CONNECT,
            channel_id: 0xff,
            flags: FLAG_ACKNOWLEDGE,
            reserved: 0,
            command_length: (COMMAND_HEADER_SIZE + VERIFY_CONNECT_DATA_SIZE) as u32,
            reliable_sequence_number: 1,
        };
        let mut buf = Vec::new();
        write_command(&mut buf, &header, &Command::VerifyConnect(verify), &[]);
        let decoded = read_command(&buf).unwrap().unwrap();
        assert_eq!(decoded.command, Command::VerifyConnect(verify));
    }
}
