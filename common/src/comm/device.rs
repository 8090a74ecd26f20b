use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The magnitude of the largest value an axis may report. Raw axis values are
/// signed and symmetric around zero, so every reading lies within
/// `[-AXIS_OFFSET, AXIS_OFFSET]`.
pub const AXIS_OFFSET: f64 = 32767.0;

/// One continuous analog channel on the controller.
#[derive(
  Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
  /// Horizontal axis of the left stick, which controls yaw.
  LeftX,

  /// Vertical axis of the left stick, which controls throttle.
  LeftY,

  /// Horizontal axis of the right stick, which controls left / right.
  RightX,

  /// Vertical axis of the right stick, which controls forward / backward.
  RightY,
}

impl Axis {
  /// Every axis, in storage order.
  pub const ALL: [Axis; 4] =
    [Axis::LeftX, Axis::LeftY, Axis::RightX, Axis::RightY];

  /// The storage slot of the axis, in `0..4`.
  pub fn index(self) -> usize {
    match self {
      Self::LeftX => 0,
      Self::LeftY => 1,
      Self::RightX => 2,
      Self::RightY => 3,
    }
  }
}

impl fmt::Display for Axis {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::LeftX => "left_x",
        Self::LeftY => "left_y",
        Self::RightX => "right_x",
        Self::RightY => "right_y",
      }
    )
  }
}

impl FromStr for Axis {
  type Err = String;

  fn from_str(name: &str) -> Result<Self, Self::Err> {
    Ok(match name {
      "left_x" => Self::LeftX,
      "left_y" => Self::LeftY,
      "right_x" => Self::RightX,
      "right_y" => Self::RightY,
      other => return Err(format!("unknown axis '{other}'")),
    })
  }
}

/// A discrete button on the controller, named after the face buttons of a
/// PlayStation-style pad.
#[derive(
  Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Button {
  /// Flips the aircraft to the left.
  Square,

  /// Takes off.
  Triangle,

  /// Flips the aircraft to the right.
  Circle,

  /// Lands.
  X,

  /// Reserved, does nothing.
  Start,

  /// Reserved, does nothing.
  Select,
}

impl fmt::Display for Button {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Square => "square",
        Self::Triangle => "triangle",
        Self::Circle => "circle",
        Self::X => "x",
        Self::Start => "start",
        Self::Select => "select",
      }
    )
  }
}

impl FromStr for Button {
  type Err = String;

  fn from_str(name: &str) -> Result<Self, Self::Err> {
    Ok(match name {
      "square" => Self::Square,
      "triangle" => Self::Triangle,
      "circle" => Self::Circle,
      "x" => Self::X,
      "start" => Self::Start,
      "select" => Self::Select,
      other => return Err(format!("unknown button '{other}'")),
    })
  }
}

/// An event produced by the input device, already translated through the
/// controller profile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceEvent {
  /// A button went from released to pressed.
  ButtonPress(Button),

  /// An axis reported a new raw value.
  AxisChange(Axis, i16),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn axis_indices_are_distinct_slots() {
    let mut seen = [false; 4];

    for axis in Axis::ALL {
      assert!(!seen[axis.index()], "{axis} shares a slot");
      seen[axis.index()] = true;
    }

    assert!(seen.iter().all(|slot| *slot));
  }

  #[test]
  fn names_match_profile_spelling() -> anyhow::Result<()> {
    let axis: Axis = serde_json::from_str("\"right_y\"")?;
    let button: Button = serde_json::from_str("\"triangle\"")?;

    assert_eq!(axis, Axis::RightY);
    assert_eq!(button, Button::Triangle);
    assert_eq!(axis.to_string(), "right_y");
    assert_eq!(button.to_string(), "triangle");
    assert_eq!("left_x".parse::<Axis>(), Ok(Axis::LeftX));
    assert_eq!("select".parse::<Button>(), Ok(Button::Select));
    assert!("left_trigger".parse::<Axis>().is_err());
    Ok(())
  }
}
