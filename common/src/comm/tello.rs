//! Framing and payload layouts of the aircraft's binary UDP protocol.
//!
//! Every packet starts with [`START_OF_PACKET`], followed by the total packet
//! length shifted left by three bits, a CRC-8 over those first three bytes,
//! the packet type, the command id, a sequence number, the payload and
//! finally a CRC-16 over everything before it. All integers are little-endian.

use super::{ControlCommand, LinkCommand, Movement, TelemetrySnapshot};
use chrono::{NaiveTime, Timelike};
use std::{error::Error, fmt};

/// First byte of every binary packet.
pub const START_OF_PACKET: u8 = 0xCC;

/// Bytes before the payload: start, length (2), crc8, type, id (2), seq (2).
const HEADER_SIZE: usize = 9;

/// Header plus the trailing CRC-16.
const OVERHEAD: usize = HEADER_SIZE + 2;

/// Sets the video encoder bitrate.
pub const VIDEO_ENCODER_RATE: u16 = 0x20;

/// Requests a video stream start (or refresh).
pub const VIDEO_START: u16 = 0x25;

/// Sets the exposure level.
pub const EXPOSURE: u16 = 0x34;

/// Time request from the aircraft, and our reply.
pub const TIME: u16 = 0x46;

/// Stick position update.
pub const STICK: u16 = 0x50;

/// Take off.
pub const TAKE_OFF: u16 = 0x54;

/// Land.
pub const LAND: u16 = 0x55;

/// Flight data reported by the aircraft.
pub const FLIGHT_DATA: u16 = 0x56;

/// Flip.
pub const FLIP: u16 = 0x5C;

const CONNECTION_REQUEST: &[u8] = b"conn_req:";
const CONNECTION_ACK: &[u8] = b"conn_ack:";

const STICK_CENTER: f64 = 1024.0;
const STICK_RANGE: f64 = 660.0;
const STICK_MASK: u64 = 0x7FF;
const STICK_PAYLOAD_SIZE: usize = 11;

/// Smallest flight-data payload that carries every field we decode.
pub const FLIGHT_DATA_SIZE: usize = 24;

/// Reasons a datagram could not be decoded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
  /// Fewer bytes than the fixed packet overhead.
  TooShort(usize),

  /// The first byte is not `START_OF_PACKET`.
  BadStart(u8),

  /// The header claims more bytes than were received.
  Truncated {
    /// Length stated in the header.
    declared: usize,

    /// Length of the datagram.
    actual: usize,
  },

  /// The CRC-8 over the header does not match.
  HeaderChecksum,

  /// The CRC-16 over the packet does not match.
  Checksum,

  /// A payload is smaller than its layout requires.
  PayloadTooShort {
    /// Bytes the layout requires.
    expected: usize,

    /// Bytes present.
    actual: usize,
  },
}

impl fmt::Display for DecodeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::TooShort(length) => write!(f, "packet of {length} bytes is too short"),
      Self::BadStart(byte) => write!(f, "unexpected start byte {byte:#04x}"),
      Self::Truncated { declared, actual } => {
        write!(f, "header declares {declared} bytes but only {actual} arrived")
      }
      Self::HeaderChecksum => write!(f, "header checksum mismatch"),
      Self::Checksum => write!(f, "packet checksum mismatch"),
      Self::PayloadTooShort { expected, actual } => {
        write!(f, "payload has {actual} bytes, expected at least {expected}")
      }
    }
  }
}

impl Error for DecodeError {}

/// CRC-8 as used by the packet header (reflected polynomial 0x31, seed 0x77).
pub fn crc8(bytes: &[u8]) -> u8 {
  let mut crc = 0x77_u8;

  for byte in bytes {
    crc ^= byte;

    for _ in 0..8 {
      crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
    }
  }

  crc
}

/// CRC-16 as used by the packet trailer (reflected polynomial 0x1021, seed
/// 0x3692).
pub fn crc16(bytes: &[u8]) -> u16 {
  let mut crc = 0x3692_u16;

  for byte in bytes {
    crc ^= u16::from(*byte);

    for _ in 0..8 {
      crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
    }
  }

  crc
}

/// A decoded (or to-be-encoded) binary packet borrowing its payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Packet<'a> {
  /// Packet type byte, which the aircraft uses to distinguish requests from
  /// acknowledgements.
  pub packet_type: u8,

  /// What the packet is about, such as `TAKE_OFF`.
  pub command_id: u16,

  /// Sequence number.
  pub sequence: u16,

  /// Command-specific payload.
  pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
  /// Serializes the packet including both checksums.
  pub fn encode(&self) -> Vec<u8> {
    let length = self.payload.len() + OVERHEAD;
    let mut bytes = Vec::with_capacity(length);

    bytes.push(START_OF_PACKET);
    bytes.extend_from_slice(&((length as u16) << 3).to_le_bytes());
    bytes.push(crc8(&bytes[..3]));
    bytes.push(self.packet_type);
    bytes.extend_from_slice(&self.command_id.to_le_bytes());
    bytes.extend_from_slice(&self.sequence.to_le_bytes());
    bytes.extend_from_slice(self.payload);

    let checksum = crc16(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes
  }

  /// Parses and verifies a packet. Bytes past the declared length are
  /// ignored.
  pub fn decode(bytes: &'a [u8]) -> Result<Self, DecodeError> {
    if bytes.len() < OVERHEAD {
      return Err(DecodeError::TooShort(bytes.len()));
    }

    if bytes[0] != START_OF_PACKET {
      return Err(DecodeError::BadStart(bytes[0]));
    }

    let declared = usize::from(u16::from_le_bytes([bytes[1], bytes[2]]) >> 3);

    if declared > bytes.len() {
      return Err(DecodeError::Truncated {
        declared,
        actual: bytes.len(),
      });
    }

    if declared < OVERHEAD {
      return Err(DecodeError::TooShort(declared));
    }

    if crc8(&bytes[..3]) != bytes[3] {
      return Err(DecodeError::HeaderChecksum);
    }

    let (body, trailer) = bytes[..declared].split_at(declared - 2);

    if crc16(body) != u16::from_le_bytes([trailer[0], trailer[1]]) {
      return Err(DecodeError::Checksum);
    }

    Ok(Packet {
      packet_type: body[4],
      command_id: u16::from_le_bytes([body[5], body[6]]),
      sequence: u16::from_le_bytes([body[7], body[8]]),
      payload: &body[HEADER_SIZE..],
    })
  }
}

/// The handshake datagram announcing which port video should be sent to.
pub fn connection_request(video_port: u16) -> Vec<u8> {
  let mut bytes = CONNECTION_REQUEST.to_vec();
  bytes.extend_from_slice(&video_port.to_le_bytes());
  bytes
}

/// Extracts the video port from a handshake datagram.
pub fn parse_connection_request(bytes: &[u8]) -> Option<u16> {
  let port = bytes.strip_prefix(CONNECTION_REQUEST)?;

  match port {
    [low, high, ..] => Some(u16::from_le_bytes([*low, *high])),
    _ => None,
  }
}

/// The aircraft's reply to a handshake.
pub fn connection_ack(video_port: u16) -> Vec<u8> {
  let mut bytes = CONNECTION_ACK.to_vec();
  bytes.extend_from_slice(&video_port.to_le_bytes());
  bytes
}

/// Whether a datagram is the aircraft's handshake reply.
pub fn is_connection_ack(bytes: &[u8]) -> bool {
  bytes.starts_with(CONNECTION_ACK)
}

/// Encodes a one-shot command. Returns `None` for `LinkCommand::Move`, which
/// only updates the held `StickPosition` and is never sent on its own.
pub fn encode_command(command: &LinkCommand, sequence: u16) -> Option<Vec<u8>> {
  let (packet_type, command_id, sequence, payload) = match command {
    LinkCommand::StartVideo => (0x60, VIDEO_START, 0, vec![]),
    LinkCommand::SetVideoBitrate(rate) => {
      (0x68, VIDEO_ENCODER_RATE, sequence, vec![*rate as u8])
    }
    LinkCommand::SetExposure(level) => (0x48, EXPOSURE, sequence, vec![*level]),
    LinkCommand::TakeOff => (0x68, TAKE_OFF, sequence, vec![]),
    LinkCommand::Land => (0x68, LAND, sequence, vec![0x00]),
    LinkCommand::Flip(direction) => {
      (0x70, FLIP, sequence, vec![*direction as u8])
    }
    LinkCommand::Move(_) => return None,
  };

  Some(
    Packet {
      packet_type,
      command_id,
      sequence,
      payload: &payload,
    }
    .encode(),
  )
}

/// The reply to a time request from the aircraft.
pub fn encode_time(sequence: u16, time: NaiveTime) -> Vec<u8> {
  let mut payload = Vec::with_capacity(STICK_PAYLOAD_SIZE);
  payload.push(0x00);

  for field in [
    time.hour(),
    time.minute(),
    time.second(),
    time.nanosecond() / 1_000_000,
    0,
  ] {
    payload.extend_from_slice(&(field as u16).to_le_bytes());
  }

  Packet {
    packet_type: 0x50,
    command_id: TIME,
    sequence,
    payload: &payload,
  }
  .encode()
}

/// The held position of both sticks, each channel in `[-1.0, 1.0]`.
///
/// The aircraft expects the full stick state at a fixed cadence, so movement
/// commands fold into this value instead of being sent individually.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StickPosition {
  /// Roll, positive to the right.
  pub right_x: f64,

  /// Pitch, positive forward.
  pub right_y: f64,

  /// Yaw, positive clockwise.
  pub left_x: f64,

  /// Throttle, positive up.
  pub left_y: f64,

  /// Sport mode.
  pub fast: bool,
}

fn to_wire(value: f64) -> u64 {
  let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
  (STICK_CENTER + STICK_RANGE * value).round() as u64
}

fn from_wire(raw: u64) -> f64 {
  (raw as f64 - STICK_CENTER) / STICK_RANGE
}

impl StickPosition {
  /// Folds a movement command into the held position of its channel.
  pub fn apply(&mut self, command: &ControlCommand) {
    let magnitude = command.magnitude;

    match command.movement {
      Movement::Forward => self.right_y = magnitude,
      Movement::Backward => self.right_y = -magnitude,
      Movement::Right => self.right_x = magnitude,
      Movement::Left => self.right_x = -magnitude,
      Movement::Up => self.left_y = magnitude,
      Movement::Down => self.left_y = -magnitude,
      Movement::Clockwise => self.left_x = magnitude,
      Movement::CounterClockwise => self.left_x = -magnitude,
    }
  }

  /// Encodes the position as a complete stick packet stamped with `time`.
  pub fn encode(&self, time: NaiveTime) -> Vec<u8> {
    let packed = to_wire(self.right_x)
      | to_wire(self.right_y) << 11
      | to_wire(self.left_y) << 22
      | to_wire(self.left_x) << 33
      | u64::from(self.fast) << 44;

    let mut payload = [0; STICK_PAYLOAD_SIZE];
    payload[..6].copy_from_slice(&packed.to_le_bytes()[..6]);
    payload[6] = time.hour() as u8;
    payload[7] = time.minute() as u8;
    payload[8] = time.second() as u8;
    payload[9..].copy_from_slice(
      &((time.nanosecond() / 1_000_000) as u16).to_le_bytes(),
    );

    Packet {
      packet_type: 0x60,
      command_id: STICK,
      sequence: 0,
      payload: &payload,
    }
    .encode()
  }

  /// Decodes the position from a stick packet payload.
  pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
    if payload.len() < 6 {
      return Err(DecodeError::PayloadTooShort {
        expected: 6,
        actual: payload.len(),
      });
    }

    let mut raw = [0; 8];
    raw[..6].copy_from_slice(&payload[..6]);
    let packed = u64::from_le_bytes(raw);

    Ok(StickPosition {
      right_x: from_wire(packed & STICK_MASK),
      right_y: from_wire(packed >> 11 & STICK_MASK),
      left_y: from_wire(packed >> 22 & STICK_MASK),
      left_x: from_wire(packed >> 33 & STICK_MASK),
      fast: packed >> 44 & 1 == 1,
    })
  }
}

/// The subset of the aircraft's flight-data message used by the ground
/// station, in the aircraft's raw units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlightData {
  /// Height in decimeters.
  pub height: i16,

  /// Speed towards north.
  pub north_speed: i16,

  /// Speed towards east.
  pub east_speed: i16,

  /// Vertical speed.
  pub vertical_speed: i16,

  /// Remaining battery, from 0 to 100.
  pub battery_percentage: u8,

  /// Barometer reports an abnormal state.
  pub pressure_abnormal: bool,

  /// Temperature is too high.
  pub temperature_high: bool,

  /// Airborne.
  pub flying: bool,

  /// Resting on the ground.
  pub on_ground: bool,

  /// Holding position.
  pub hovering: bool,
}

fn bit(byte: u8, index: u8) -> bool {
  byte >> index & 1 == 1
}

impl FlightData {
  /// Decodes a flight-data payload.
  pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
    if payload.len() < FLIGHT_DATA_SIZE {
      return Err(DecodeError::PayloadTooShort {
        expected: FLIGHT_DATA_SIZE,
        actual: payload.len(),
      });
    }

    let word = |at: usize| i16::from_le_bytes([payload[at], payload[at + 1]]);

    Ok(FlightData {
      height: word(0),
      north_speed: word(2),
      east_speed: word(4),
      vertical_speed: word(6),
      pressure_abnormal: bit(payload[10], 1),
      battery_percentage: payload[12],
      flying: bit(payload[17], 0),
      on_ground: bit(payload[17], 1),
      hovering: bit(payload[17], 3),
      temperature_high: bit(payload[23], 0),
    })
  }

  /// Encodes a flight-data payload. Fields this type does not model are
  /// zero.
  pub fn encode(&self) -> Vec<u8> {
    let mut payload = vec![0; FLIGHT_DATA_SIZE];

    for (at, word) in [
      (0, self.height),
      (2, self.north_speed),
      (4, self.east_speed),
      (6, self.vertical_speed),
    ] {
      payload[at..at + 2].copy_from_slice(&word.to_le_bytes());
    }

    payload[10] = u8::from(self.pressure_abnormal) << 1;
    payload[12] = self.battery_percentage;
    payload[17] = u8::from(self.flying)
      | u8::from(self.on_ground) << 1
      | u8::from(self.hovering) << 3;
    payload[23] = u8::from(self.temperature_high);
    payload
  }

  /// Horizontal speed.
  pub fn ground_speed(&self) -> f64 {
    let north = f64::from(self.north_speed);
    let east = f64::from(self.east_speed);
    (north * north + east * east).sqrt()
  }

  /// Speed including the vertical component.
  pub fn air_speed(&self) -> f64 {
    let vertical = f64::from(self.vertical_speed);
    (self.ground_speed().powi(2) + vertical * vertical).sqrt()
  }

  /// Converts the raw message into the snapshot shared with the rest of the
  /// ground station.
  pub fn snapshot(&self) -> TelemetrySnapshot {
    TelemetrySnapshot {
      battery_percentage: self.battery_percentage,
      temperature_high: self.temperature_high,
      pressure_abnormal: self.pressure_abnormal,
      ground_speed: self.ground_speed(),
      air_speed: self.air_speed(),
      height: self.height,
      flying: self.flying,
      on_ground: self.on_ground,
      hovering: self.hovering,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::comm::{FlipDirection, VideoBitrate};

  // captured from a real aircraft
  const TAKE_OFF_PACKET: [u8; 11] =
    [0xcc, 0x58, 0x00, 0x7c, 0x68, 0x54, 0x00, 0xe4, 0x01, 0xc2, 0x16];

  #[test]
  fn take_off_matches_capture() {
    let encoded = encode_command(&LinkCommand::TakeOff, 0x01e4);
    assert_eq!(encoded.as_deref(), Some(&TAKE_OFF_PACKET[..]));
  }

  #[test]
  fn decodes_capture() {
    let packet = Packet::decode(&TAKE_OFF_PACKET).unwrap();

    assert_eq!(packet.packet_type, 0x68);
    assert_eq!(packet.command_id, TAKE_OFF);
    assert_eq!(packet.sequence, 0x01e4);
    assert!(packet.payload.is_empty());
  }

  #[test]
  fn rejects_corruption() {
    let mut corrupted = TAKE_OFF_PACKET;
    corrupted[6] ^= 0x01;
    assert_eq!(Packet::decode(&corrupted), Err(DecodeError::Checksum));

    let mut corrupted = TAKE_OFF_PACKET;
    corrupted[3] ^= 0x01;
    assert_eq!(Packet::decode(&corrupted), Err(DecodeError::HeaderChecksum));

    assert_eq!(
      Packet::decode(&TAKE_OFF_PACKET[..8]),
      Err(DecodeError::TooShort(8))
    );
    assert_eq!(
      Packet::decode(b"conn_ack:gh"),
      Err(DecodeError::BadStart(b'c'))
    );
  }

  #[test]
  fn ignores_trailing_bytes() {
    let mut padded = TAKE_OFF_PACKET.to_vec();
    padded.extend_from_slice(&[0xAA, 0xBB]);

    assert_eq!(Packet::decode(&padded).unwrap().command_id, TAKE_OFF);
  }

  #[test]
  fn one_shot_commands_carry_their_argument() {
    let flip = encode_command(&LinkCommand::Flip(FlipDirection::Right), 7)
      .unwrap();
    let flip = Packet::decode(&flip).unwrap();
    assert_eq!((flip.command_id, flip.payload), (FLIP, &[3][..]));

    let rate =
      encode_command(&LinkCommand::SetVideoBitrate(VideoBitrate::OneMbps), 8)
        .unwrap();
    let rate = Packet::decode(&rate).unwrap();
    assert_eq!((rate.command_id, rate.payload), (VIDEO_ENCODER_RATE, &[1][..]));

    let video = encode_command(&LinkCommand::StartVideo, 9).unwrap();
    assert_eq!(Packet::decode(&video).unwrap().sequence, 0);

    let movement = ControlCommand::new(Movement::Up, 1.0);
    assert!(encode_command(&LinkCommand::Move(movement), 10).is_none());
  }

  #[test]
  fn handshake() {
    let request = connection_request(11111);
    assert_eq!(&request[..9], b"conn_req:");
    assert_eq!(parse_connection_request(&request), Some(11111));
    assert_eq!(parse_connection_request(b"conn_req:"), None);
    assert!(is_connection_ack(&connection_ack(11111)));
    assert!(!is_connection_ack(&request));
  }

  #[test]
  fn centered_sticks_encode_to_center() {
    let time = NaiveTime::from_hms_milli_opt(13, 5, 42, 300).unwrap();
    let bytes = StickPosition::default().encode(time);
    let packet = Packet::decode(&bytes).unwrap();

    assert_eq!(packet.command_id, STICK);
    assert_eq!(packet.payload.len(), STICK_PAYLOAD_SIZE);
    assert_eq!(&packet.payload[6..], &[13, 5, 42, 0x2c, 0x01]);

    let decoded = StickPosition::decode(packet.payload).unwrap();
    assert_eq!(decoded, StickPosition::default());
  }

  #[test]
  fn movement_commands_fold_into_channels() {
    let mut position = StickPosition::default();
    position.apply(&ControlCommand::new(Movement::Backward, 0.5));
    position.apply(&ControlCommand::new(Movement::Right, 1.0));
    position.apply(&ControlCommand::new(Movement::Down, 0.25));
    position.apply(&ControlCommand::new(Movement::CounterClockwise, 0.75));

    let bytes = position.encode(NaiveTime::MIN);
    let packet = Packet::decode(&bytes).unwrap();
    let decoded = StickPosition::decode(packet.payload).unwrap();

    let close = |a: f64, b: f64| (a - b).abs() < 1.0 / STICK_RANGE;
    assert!(close(decoded.right_y, -0.5));
    assert!(close(decoded.right_x, 1.0));
    assert!(close(decoded.left_y, -0.25));
    assert!(close(decoded.left_x, -0.75));
    assert!(!decoded.fast);

    position.apply(&ControlCommand::stop(Movement::Forward));
    assert_eq!(position.right_y, 0.0);
  }

  #[test]
  fn flight_data_layout() {
    let mut payload = [0_u8; FLIGHT_DATA_SIZE];
    payload[0] = 25; // height
    payload[2] = 3; // north
    payload[4] = 4; // east
    payload[6] = 12; // vertical
    payload[10] = 0b10;
    payload[12] = 87;
    payload[17] = 0b1001;
    payload[23] = 1;

    let data = FlightData::parse(&payload).unwrap();
    let snapshot = data.snapshot();

    assert_eq!(snapshot.height, 25);
    assert_eq!(snapshot.battery_percentage, 87);
    assert!(snapshot.pressure_abnormal);
    assert!(snapshot.temperature_high);
    assert!(snapshot.flying && snapshot.hovering && !snapshot.on_ground);
    assert!((snapshot.ground_speed - 5.0).abs() < 1e-9);
    assert!((snapshot.air_speed - 13.0).abs() < 1e-9);

    assert_eq!(FlightData::parse(&data.encode()), Ok(data));
    assert_eq!(
      FlightData::parse(&payload[..10]),
      Err(DecodeError::PayloadTooShort {
        expected: FLIGHT_DATA_SIZE,
        actual: 10
      })
    );
  }

  #[test]
  fn time_reply() {
    let time = NaiveTime::from_hms_milli_opt(1, 2, 3, 4).unwrap();
    let bytes = encode_time(42, time);
    let packet = Packet::decode(&bytes).unwrap();

    assert_eq!(packet.command_id, TIME);
    assert_eq!(packet.sequence, 42);
    assert_eq!(packet.payload, &[0, 1, 0, 2, 0, 3, 0, 4, 0, 0, 0]);
  }
}
