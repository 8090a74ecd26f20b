use crate::ToPrettyString;
use serde::{Deserialize, Serialize};

/// The latest status reported by the aircraft.
///
/// Snapshots are produced whole by the link on every flight-data message and
/// are never mutated afterwards; consumers replace their copy wholesale.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
  /// Remaining battery, from 0 to 100.
  pub battery_percentage: u8,

  /// Set when the aircraft reports its temperature as too high.
  pub temperature_high: bool,

  /// Set when the barometer reports an abnormal state.
  pub pressure_abnormal: bool,

  /// Horizontal speed, in m/s.
  pub ground_speed: f64,

  /// Total speed including the vertical component, in m/s.
  pub air_speed: f64,

  /// Height in decimeters, as reported by the aircraft.
  pub height: i16,

  /// The aircraft is airborne.
  pub flying: bool,

  /// The aircraft is resting on the ground.
  pub on_ground: bool,

  /// The aircraft is holding position.
  pub hovering: bool,
}

impl TelemetrySnapshot {
  /// Height in meters.
  pub fn height_meters(&self) -> f64 {
    f64::from(self.height) / 10.0
  }
}

fn flag(value: bool, good: bool) -> &'static str {
  match (value, value == good) {
    (true, true) => "\x1b[32myes\x1b[0m",
    (false, true) => "\x1b[32mno\x1b[0m",
    (true, false) => "\x1b[31myes\x1b[0m",
    (false, false) => "\x1b[31mno\x1b[0m",
  }
}

impl ToPrettyString for TelemetrySnapshot {
  fn to_pretty_string(&self) -> String {
    let battery_color = match self.battery_percentage {
      0..=15 => 31,
      16..=40 => 33,
      _ => 32,
    };

    format!(
      "battery          \x1b[{battery_color}m{}%\x1b[0m\n\
       temperature high {}\n\
       pressure abnormal {}\n\
       ground speed     {:.2} m/s\n\
       air speed        {:.2} m/s\n\
       height           {:.2} m\n\
       flying           {}\n\
       on ground        {}\n\
       hovering         {}",
      self.battery_percentage,
      flag(self.temperature_high, false),
      flag(self.pressure_abnormal, false),
      self.ground_speed,
      self.air_speed,
      self.height_meters(),
      flag(self.flying, true),
      flag(self.on_ground, true),
      flag(self.hovering, true),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn height_is_scaled_to_meters() {
    let snapshot = TelemetrySnapshot {
      height: 37,
      ..Default::default()
    };

    assert!((snapshot.height_meters() - 3.7).abs() < f64::EPSILON);
  }

  #[test]
  fn pretty_string_contains_every_field() {
    let pretty = TelemetrySnapshot {
      battery_percentage: 12,
      ..Default::default()
    }
    .to_pretty_string();

    assert_eq!(pretty.lines().count(), 9);
    assert!(pretty.contains("\x1b[31m12%"));
  }
}
