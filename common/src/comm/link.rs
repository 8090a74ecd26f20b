use super::TelemetrySnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a flip maneuver. The discriminant is the wire value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FlipDirection {
  /// Flip forward.
  Front = 0,

  /// Flip to the left.
  Left = 1,

  /// Flip backward.
  Back = 2,

  /// Flip to the right.
  Right = 3,
}

/// Bitrate of the video stream sent by the aircraft. The discriminant is the
/// wire value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VideoBitrate {
  /// Let the aircraft decide.
  Auto = 0,

  /// 1 Mbps, the level used by the ground station.
  OneMbps = 1,

  /// 1.5 Mbps.
  OneAndHalfMbps = 2,

  /// 2 Mbps.
  TwoMbps = 3,

  /// 3 Mbps.
  ThreeMbps = 4,

  /// 4 Mbps.
  FourMbps = 5,
}

/// A single direction of movement along one of the four control channels.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
  /// Pitch forward.
  Forward,

  /// Pitch backward.
  Backward,

  /// Roll left.
  Left,

  /// Roll right.
  Right,

  /// Climb.
  Up,

  /// Descend.
  Down,

  /// Yaw clockwise.
  Clockwise,

  /// Yaw counter-clockwise.
  CounterClockwise,
}

impl fmt::Display for Movement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Forward => "forward",
        Self::Backward => "backward",
        Self::Left => "left",
        Self::Right => "right",
        Self::Up => "up",
        Self::Down => "down",
        Self::Clockwise => "clockwise",
        Self::CounterClockwise => "counter-clockwise",
      }
    )
  }
}

/// A directional command with a normalized magnitude in `[0.0, 1.0]`.
///
/// A zero magnitude is an explicit stop on that channel, not the absence of a
/// command.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ControlCommand {
  /// Which way to move.
  pub movement: Movement,

  /// How hard to move, from `0.0` (stop) to `1.0` (full deflection).
  pub magnitude: f64,
}

impl ControlCommand {
  /// Constructs a command, clamping the magnitude into `[0.0, 1.0]`. A NaN
  /// magnitude becomes a stop.
  pub fn new(movement: Movement, magnitude: f64) -> Self {
    let magnitude = if magnitude.is_nan() {
      0.0
    } else {
      magnitude.clamp(0.0, 1.0)
    };

    ControlCommand { movement, magnitude }
  }

  /// Constructs a stop command on the channel of `movement`.
  pub fn stop(movement: Movement) -> Self {
    ControlCommand {
      movement,
      magnitude: 0.0,
    }
  }
}

impl fmt::Display for ControlCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {:.0}%", self.movement, self.magnitude * 100.0)
  }
}

/// A command accepted by the aircraft link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LinkCommand {
  /// Ask the aircraft to start (or keep) streaming video.
  StartVideo,

  /// Set the video encoder bitrate.
  SetVideoBitrate(VideoBitrate),

  /// Set the exposure compensation level.
  SetExposure(u8),

  /// Take off.
  TakeOff,

  /// Land.
  Land,

  /// Perform a flip.
  Flip(FlipDirection),

  /// Update the held stick position for one channel.
  Move(ControlCommand),
}

impl fmt::Display for LinkCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::StartVideo => write!(f, "start video"),
      Self::SetVideoBitrate(rate) => write!(f, "set video bitrate {rate:?}"),
      Self::SetExposure(level) => write!(f, "set exposure {level}"),
      Self::TakeOff => write!(f, "take off"),
      Self::Land => write!(f, "land"),
      Self::Flip(direction) => write!(f, "flip {direction:?}"),
      Self::Move(command) => write!(f, "move {command}"),
    }
  }
}

/// An event emitted by the aircraft link.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
  /// The aircraft acknowledged the connection handshake.
  Connected,

  /// The aircraft has been silent for too long.
  Disconnected,

  /// A chunk of the compressed video stream.
  VideoData(Vec<u8>),

  /// A fresh telemetry snapshot.
  TelemetryUpdated(TelemetrySnapshot),
}
