use bytes::Bytes;
use common::comm::{Axis, TelemetrySnapshot};
use std::sync::{
  atomic::{AtomicI16, Ordering},
  Arc,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The latest raw value of every controller axis.
///
/// Each axis is an independent atomic, so a writer replacing one axis never
/// disturbs another and a reader always sees a value that was actually
/// written. There is no multi-axis transaction; consumers read the one or two
/// axes they need.
#[derive(Debug, Default)]
pub struct AxisState {
  values: [AtomicI16; 4],
}

impl AxisState {
  /// Constructs a new `AxisState` with every axis centered.
  pub fn new() -> Self {
    AxisState::default()
  }

  /// Replaces the value of a single axis.
  pub fn store(&self, axis: Axis, value: i16) {
    self.values[axis.index()].store(value, Ordering::Relaxed);
  }

  /// Reads the value of a single axis.
  pub fn load(&self, axis: Axis) -> i16 {
    self.values[axis.index()].load(Ordering::Relaxed)
  }

  /// Centers every axis.
  pub fn reset(&self) {
    for axis in Axis::ALL {
      self.store(axis, 0);
    }
  }
}

/// Holds the most recent value of `T`, replaced wholesale by a single writer
/// and readable from anywhere.
///
/// `None` means nothing has been stored yet, which is a normal state readers
/// must handle rather than an error.
#[derive(Debug)]
pub struct Latest<T> {
  sender: watch::Sender<Option<T>>,
}

impl<T: Clone> Latest<T> {
  /// Constructs an empty store.
  pub fn new() -> Self {
    let (sender, _) = watch::channel(None);
    Latest { sender }
  }

  /// Replaces the held value and wakes every subscriber.
  pub fn store(&self, value: T) {
    self.sender.send_replace(Some(value));
  }

  /// Clones the held value out, if any.
  pub fn load(&self) -> Option<T> {
    self.sender.borrow().clone()
  }

  /// Subscribes to future replacements.
  pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
    self.sender.subscribe()
  }
}

impl<T: Clone> Default for Latest<T> {
  fn default() -> Self {
    Latest::new()
  }
}

/// Holds all state shared between the concurrently running tasks.
///
/// Everything in here is cheap to clone and safe to touch from any task.
/// **Do not abuse this struct.** It is intended for what would otherwise be
/// global state.
#[derive(Clone, Debug)]
pub struct SharedState {
  /// Controller axes, written by the input router and read by the control
  /// loops.
  pub axes: Arc<AxisState>,

  /// The latest telemetry, written by the link router and read by the
  /// overlay renderer and the stream server.
  pub telemetry: Arc<Latest<Arc<TelemetrySnapshot>>>,

  /// The latest annotated frame as a JPEG, written by the broadcast sink and
  /// read by the stream server.
  pub frames: Arc<Latest<Bytes>>,

  /// Cancelled once to stop every task.
  pub shutdown: CancellationToken,
}

impl SharedState {
  /// Constructs fresh shared state with centered axes and no telemetry.
  pub fn new() -> Self {
    SharedState {
      axes: Arc::new(AxisState::new()),
      telemetry: Arc::new(Latest::new()),
      frames: Arc::new(Latest::new()),
      shutdown: CancellationToken::new(),
    }
  }
}

impl Default for SharedState {
  fn default() -> Self {
    SharedState::new()
  }
}
