use crate::{link::Aircraft, state::AxisState};
use common::comm::{Axis, ControlCommand, Movement, AXIS_OFFSET};
use std::{sync::Arc, time::Duration};
use tokio::{
  task::JoinHandle,
  time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Cadence of both control loops.
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

/// Right stick values within this distance of center (inclusive) stop the
/// aircraft on that channel.
pub const TRANSLATION_DEAD_ZONE: i16 = 10;

/// Dead zone of the throttle. Wide, since a resting left stick rarely sits
/// at center.
pub const THROTTLE_DEAD_ZONE: i16 = 1000;

/// Dead zone of the yaw.
pub const YAW_DEAD_ZONE: i16 = 20;

/// Normalizes a raw axis value into a magnitude in `[0.0, 1.0]`.
///
/// Monotonic in `|value|` and saturating at `1.0` outside
/// `[-offset, offset]`. An offset that is not a positive finite number, or a
/// NaN value, yields `0.0`.
///
/// The scale is continuous: there is no extra dead band and no stepping on
/// top of the per-axis dead zones, so small deflections past a dead zone
/// still move the aircraft proportionally.
pub fn validate(value: f64, offset: f64) -> f64 {
  if !offset.is_finite() || offset <= 0.0 || value.is_nan() {
    return 0.0;
  }

  (value.abs() / offset).min(1.0)
}

/// Turns one axis into a command. Values strictly beyond the dead zone move
/// the aircraft, anything else is a zero-magnitude command on the positive
/// direction.
fn channel(
  value: i16,
  dead_zone: i16,
  negative: Movement,
  positive: Movement,
) -> ControlCommand {
  let magnitude = validate(f64::from(value), AXIS_OFFSET);

  if value < -dead_zone {
    ControlCommand::new(negative, magnitude)
  } else if value > dead_zone {
    ControlCommand::new(positive, magnitude)
  } else {
    ControlCommand::stop(positive)
  }
}

/// Commands for the right stick: pitch from `y`, then roll from `x`.
pub fn translation_commands(x: i16, y: i16) -> [ControlCommand; 2] {
  [
    channel(y, TRANSLATION_DEAD_ZONE, Movement::Backward, Movement::Forward),
    channel(x, TRANSLATION_DEAD_ZONE, Movement::Left, Movement::Right),
  ]
}

/// Commands for the left stick: throttle from `y`, then yaw from `x`.
pub fn throttle_yaw_commands(x: i16, y: i16) -> [ControlCommand; 2] {
  [
    channel(y, THROTTLE_DEAD_ZONE, Movement::Down, Movement::Up),
    channel(
      x,
      YAW_DEAD_ZONE,
      Movement::CounterClockwise,
      Movement::Clockwise,
    ),
  ]
}

/// Which axes are negated before they are turned into commands.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AxisPolicy {
  inverted: [bool; 4],
}

impl AxisPolicy {
  /// Constructs a policy from per-axis inversion flags, indexed by
  /// `Axis::index`.
  pub fn new(inverted: [bool; 4]) -> Self {
    AxisPolicy { inverted }
  }

  /// Reads an axis with the policy applied.
  pub fn read(&self, axes: &AxisState, axis: Axis) -> i16 {
    let value = axes.load(axis);

    if self.inverted[axis.index()] {
      value.saturating_neg()
    } else {
      value
    }
  }
}

/// The two fixed-cadence loops turning stick positions into movement
/// commands.
#[derive(Clone, Debug)]
pub struct FlightControlLoop {
  axes: Arc<AxisState>,
  aircraft: Aircraft,
  policy: AxisPolicy,
}

impl FlightControlLoop {
  /// Constructs the loops without starting them.
  pub fn new(axes: Arc<AxisState>, aircraft: Aircraft, policy: AxisPolicy) -> Self {
    FlightControlLoop {
      axes,
      aircraft,
      policy,
    }
  }

  /// Runs one tick of the translation loop and returns what it sent.
  pub fn translation_tick(&self) -> [ControlCommand; 2] {
    let commands = translation_commands(
      self.policy.read(&self.axes, Axis::RightX),
      self.policy.read(&self.axes, Axis::RightY),
    );

    for command in commands {
      self.aircraft.steer(command);
    }

    commands
  }

  /// Runs one tick of the throttle and yaw loop and returns what it sent.
  pub fn throttle_yaw_tick(&self) -> [ControlCommand; 2] {
    let commands = throttle_yaw_commands(
      self.policy.read(&self.axes, Axis::LeftX),
      self.policy.read(&self.axes, Axis::LeftY),
    );

    for command in commands {
      self.aircraft.steer(command);
    }

    commands
  }

  /// Starts both loops as independent tasks. Each stops once `shutdown` is
  /// cancelled.
  pub fn spawn(
    self,
    shutdown: CancellationToken,
  ) -> (JoinHandle<()>, JoinHandle<()>) {
    let translation = self.clone();

    (
      tokio::spawn(tick_until(shutdown.clone(), move || {
        translation.translation_tick();
      })),
      tokio::spawn(tick_until(shutdown, move || {
        self.throttle_yaw_tick();
      })),
    )
  }
}

async fn tick_until(shutdown: CancellationToken, mut tick: impl FnMut()) {
  let mut interval = time::interval(TICK_PERIOD);
  interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = interval.tick() => tick(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::comm::LinkCommand;
  use tokio::{sync::mpsc, time::Instant};

  fn assert_command(command: ControlCommand, movement: Movement, magnitude: f64) {
    assert_eq!(command.movement, movement);
    assert!(
      (command.magnitude - magnitude).abs() < 1e-12,
      "{command} should have magnitude {magnitude}"
    );
  }

  #[test]
  fn validate_is_bounded_and_monotonic() {
    let mut previous = 0.0;

    for value in (0..=40_000).step_by(250) {
      let magnitude = validate(f64::from(value), AXIS_OFFSET);
      assert!((0.0..=1.0).contains(&magnitude));
      assert!(magnitude >= previous);
      assert_eq!(magnitude, validate(-f64::from(value), AXIS_OFFSET));
      previous = magnitude;
    }

    assert_eq!(validate(32767.0, AXIS_OFFSET), 1.0);
    assert_eq!(validate(-99_999.0, AXIS_OFFSET), 1.0);
    assert_eq!(validate(0.0, AXIS_OFFSET), 0.0);
  }

  #[test]
  fn validate_is_continuous_for_small_deflections() {
    let small = validate(1000.0, AXIS_OFFSET);
    assert!(small > 0.0);
    assert!((small - 1000.0 / AXIS_OFFSET).abs() < 1e-12);
    assert!(validate(1001.0, AXIS_OFFSET) > small);
  }

  #[test]
  fn validate_never_fails() {
    assert_eq!(validate(100.0, 0.0), 0.0);
    assert_eq!(validate(100.0, -5.0), 0.0);
    assert_eq!(validate(100.0, f64::NAN), 0.0);
    assert_eq!(validate(100.0, f64::INFINITY), 0.0);
    assert_eq!(validate(f64::NAN, AXIS_OFFSET), 0.0);
    assert_eq!(validate(f64::INFINITY, AXIS_OFFSET), 1.0);
  }

  #[test]
  fn translation_dead_zone_is_strict() {
    for value in [-10, -3, 0, 7, 10] {
      let [pitch, roll] = translation_commands(value, value);
      assert_command(pitch, Movement::Forward, 0.0);
      assert_command(roll, Movement::Right, 0.0);
    }

    let [pitch, roll] = translation_commands(-11, 11);
    assert_command(pitch, Movement::Forward, 11.0 / AXIS_OFFSET);
    assert_command(roll, Movement::Left, 11.0 / AXIS_OFFSET);

    let [pitch, roll] = translation_commands(11, -11);
    assert_command(pitch, Movement::Backward, 11.0 / AXIS_OFFSET);
    assert_command(roll, Movement::Right, 11.0 / AXIS_OFFSET);
  }

  #[test]
  fn throttle_and_yaw_dead_zones_are_strict() {
    let [throttle, yaw] = throttle_yaw_commands(20, 1000);
    assert_command(throttle, Movement::Up, 0.0);
    assert_command(yaw, Movement::Clockwise, 0.0);

    let [throttle, yaw] = throttle_yaw_commands(-20, -1000);
    assert_command(throttle, Movement::Up, 0.0);
    assert_command(yaw, Movement::Clockwise, 0.0);

    let [throttle, yaw] = throttle_yaw_commands(21, 1001);
    assert_command(throttle, Movement::Up, 1001.0 / AXIS_OFFSET);
    assert_command(yaw, Movement::Clockwise, 21.0 / AXIS_OFFSET);

    let [throttle, yaw] = throttle_yaw_commands(-21, -32767);
    assert_command(throttle, Movement::Down, 1.0);
    assert_command(yaw, Movement::CounterClockwise, 21.0 / AXIS_OFFSET);
  }

  #[test]
  fn inverted_axes_are_negated_when_read() {
    let axes = AxisState::new();
    axes.store(Axis::RightY, -500);
    axes.store(Axis::LeftY, i16::MIN);

    let policy = AxisPolicy::new([false, true, false, true]);
    assert_eq!(policy.read(&axes, Axis::RightY), 500);
    assert_eq!(policy.read(&axes, Axis::LeftY), i16::MAX);
    assert_eq!(AxisPolicy::default().read(&axes, Axis::RightY), -500);
  }

  #[test]
  fn ticks_send_what_they_compute() {
    let (aircraft, mut commands) = Aircraft::channel();
    let axes = Arc::new(AxisState::new());
    axes.store(Axis::LeftY, 5000);

    let control = FlightControlLoop::new(axes, aircraft, AxisPolicy::default());
    let sent = control.throttle_yaw_tick();

    assert_command(sent[0], Movement::Up, 5000.0 / AXIS_OFFSET);
    assert_eq!(commands.try_recv(), Ok(LinkCommand::Move(sent[0])));
    assert_eq!(commands.try_recv(), Ok(LinkCommand::Move(sent[1])));
    assert!(commands.try_recv().is_err());
  }

  async fn next_pitch(
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
  ) -> ControlCommand {
    loop {
      match commands.recv().await {
        Some(LinkCommand::Move(command))
          if matches!(command.movement, Movement::Forward | Movement::Backward) =>
        {
          return command;
        }
        Some(_) => continue,
        None => panic!("control loops stopped early"),
      }
    }
  }

  #[tokio::test(start_paused = true)]
  async fn stick_back_then_released() {
    let (aircraft, mut commands) = Aircraft::channel();
    let axes = Arc::new(AxisState::new());
    let shutdown = CancellationToken::new();
    axes.store(Axis::RightY, -500);

    let (translation, throttle_yaw) =
      FlightControlLoop::new(axes.clone(), aircraft, AxisPolicy::default())
        .spawn(shutdown.clone());

    let backward = next_pitch(&mut commands).await;
    assert_command(backward, Movement::Backward, validate(-500.0, AXIS_OFFSET));

    let released = Instant::now();
    axes.store(Axis::RightY, 0);

    let stopped = next_pitch(&mut commands).await;
    assert_command(stopped, Movement::Forward, 0.0);
    assert!(released.elapsed() >= TICK_PERIOD);
    assert!(released.elapsed() < TICK_PERIOD * 2);

    shutdown.cancel();
    translation.await.unwrap();
    throttle_yaw.await.unwrap();
  }
}
