use crate::config::ControllerProfile;
use common::comm::{Axis, DeviceEvent, AXIS_OFFSET};
use gilrs::{EventType, Gilrs};
use jeflog::{fail, pass, task, warn};
use std::{thread, time::Duration};
use tokio::{sync::mpsc, task as tokio_task};
use tokio_util::sync::CancellationToken;

/// Longest a read waits for the next gamepad event before checking for
/// shutdown.
pub const POLL_PERIOD: Duration = Duration::from_millis(100);

/// How long to wait before trying to reach the gamepads again.
pub const RETRY_PERIOD: Duration = Duration::from_secs(1);

/// One event from a gamepad, keyed by the native code the controller profile
/// refers to.
#[derive(Clone, Debug, PartialEq)]
pub enum PadEvent {
  /// A gamepad was plugged in.
  Connected(String),

  /// A gamepad went away.
  Disconnected(String),

  /// An axis moved to `value` in `[-1.0, 1.0]`.
  Axis {
    /// Native axis code.
    code: u16,

    /// New position.
    value: f32,
  },

  /// A button was pressed.
  Press {
    /// Native button code.
    code: u16,
  },
}

/// A source of gamepad events.
pub trait Gamepads {
  /// Waits up to `timeout` for the next event.
  fn next_event(&mut self, timeout: Duration) -> Option<PadEvent>;
}

/// Every gamepad `gilrs` can see whose name contains `filter`.
pub struct GilrsPads {
  gilrs: Gilrs,
  filter: String,
}

impl GilrsPads {
  /// Reads the gamepads matching `filter`, any gamepad when it is empty.
  pub fn new(gilrs: Gilrs, filter: String) -> Self {
    for (_, gamepad) in gilrs.gamepads() {
      if gamepad.name().contains(filter.as_str()) {
        pass!("Found gamepad {}.", gamepad.name());
      }
    }

    GilrsPads { gilrs, filter }
  }
}

/// The low 16 bits of a `gilrs` code, which on Linux are the evdev code.
fn native(code: gilrs::ev::Code) -> u16 {
  (code.into_u32() & 0xFFFF) as u16
}

impl Gamepads for GilrsPads {
  fn next_event(&mut self, timeout: Duration) -> Option<PadEvent> {
    let event = self.gilrs.next_event_blocking(Some(timeout))?;
    let name = self.gilrs.gamepad(event.id).name().to_owned();

    if !name.contains(self.filter.as_str()) {
      return None;
    }

    match event.event {
      EventType::Connected => Some(PadEvent::Connected(name)),
      EventType::Disconnected => Some(PadEvent::Disconnected(name)),
      EventType::AxisChanged(_, value, code) => Some(PadEvent::Axis {
        code: native(code),
        value,
      }),
      EventType::ButtonPressed(_, code) => Some(PadEvent::Press {
        code: native(code),
      }),
      _ => None,
    }
  }
}

/// Scales a normalized axis position to the raw device range.
pub fn raw_axis(value: f32) -> i16 {
  if value.is_nan() {
    return 0;
  }

  (f64::from(value.clamp(-1.0, 1.0)) * AXIS_OFFSET).round() as i16
}

/// Maps a gamepad event through the controller profile. Unbound codes and
/// connection changes produce nothing.
pub fn translate(event: &PadEvent, profile: &ControllerProfile) -> Option<DeviceEvent> {
  match *event {
    PadEvent::Axis { code, value } => profile
      .axis(code)
      .map(|axis| DeviceEvent::AxisChange(axis, raw_axis(value))),
    PadEvent::Press { code } => profile.button(code).map(DeviceEvent::ButtonPress),
    PadEvent::Connected(_) | PadEvent::Disconnected(_) => None,
  }
}

/// Centers every axis so a vanished gamepad does not leave the aircraft
/// drifting.
fn center(events: &mpsc::Sender<DeviceEvent>) {
  for axis in Axis::ALL {
    let _ = events.blocking_send(DeviceEvent::AxisChange(axis, 0));
  }
}

/// Forwards translated events from `pads` until `shutdown` is cancelled or
/// nobody listens anymore. Blocks for at most `POLL_PERIOD` past either.
pub fn pump<G: Gamepads>(
  mut pads: G,
  profile: &ControllerProfile,
  events: &mpsc::Sender<DeviceEvent>,
  shutdown: &CancellationToken,
) {
  while !shutdown.is_cancelled() && !events.is_closed() {
    let Some(event) = pads.next_event(POLL_PERIOD) else {
      continue;
    };

    match &event {
      PadEvent::Connected(name) => pass!("Reading {} from {name}.", profile.name),
      PadEvent::Disconnected(name) => {
        fail!("Lost gamepad {name}.");
        center(events);
      }
      _ => {
        let Some(event) = translate(&event, profile) else {
          continue;
        };

        if events.blocking_send(event).is_err() {
          break;
        }
      }
    }
  }
}

/// Sleeps for `period` in `POLL_PERIOD` steps. Returns `false` if `shutdown`
/// was cancelled meanwhile.
fn wait(period: Duration, shutdown: &CancellationToken) -> bool {
  let mut waited = Duration::ZERO;

  while waited < period {
    if shutdown.is_cancelled() {
      return false;
    }

    thread::sleep(POLL_PERIOD);
    waited += POLL_PERIOD;
  }

  !shutdown.is_cancelled()
}

/// Reads the gamepads for as long as the station runs, retrying while the
/// gamepad subsystem is unavailable. Runs on the blocking pool and returns
/// within `POLL_PERIOD` of `shutdown`.
pub async fn run(
  filter: String,
  profile: ControllerProfile,
  events: mpsc::Sender<DeviceEvent>,
  shutdown: CancellationToken,
) {
  let reading = tokio_task::spawn_blocking(move || {
    let mut reported = false;

    loop {
      match Gilrs::new() {
        Ok(gilrs) => {
          task!("Waiting for gamepad events...");
          pump(GilrsPads::new(gilrs, filter), &profile, &events, &shutdown);
          return;
        }
        Err(error) => {
          if !reported {
            warn!("Could not reach the gamepads: {error}");
            reported = true;
          }
        }
      }

      if !wait(RETRY_PERIOD, &shutdown) {
        return;
      }
    }
  });

  if let Err(error) = reading.await {
    fail!("Gamepad reader failed: {error}");
  }
}
