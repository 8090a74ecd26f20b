/// Events produced by the physical input device.
pub mod device;

/// Events and commands exchanged with the aircraft link.
pub mod link;

/// The telemetry snapshot reported by the aircraft.
pub mod telemetry;

/// The binary wire protocol spoken by the aircraft.
pub mod tello;

pub use device::{Axis, Button, DeviceEvent, AXIS_OFFSET};
pub use link::{
  ControlCommand,
  FlipDirection,
  LinkCommand,
  LinkEvent,
  Movement,
  VideoBitrate,
};
pub use telemetry::TelemetrySnapshot;
