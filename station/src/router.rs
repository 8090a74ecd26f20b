use crate::{
  link::Aircraft,
  state::{AxisState, Latest},
};
use common::comm::{
  Button,
  DeviceEvent,
  FlipDirection,
  LinkEvent,
  TelemetrySnapshot,
  VideoBitrate,
};
use jeflog::{fail, pass, warn};
use std::{sync::Arc, time::Duration};
use tokio::{
  sync::mpsc::{self, error::TrySendError},
  time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

/// How often the video stream is re-requested while connected.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_millis(100);

/// Performs the one-shot action bound to a button.
pub fn handle_button(aircraft: &Aircraft, button: Button) {
  match button {
    Button::Square => aircraft.flip(FlipDirection::Left),
    Button::Circle => aircraft.flip(FlipDirection::Right),
    Button::Triangle => aircraft.take_off(),
    Button::X => aircraft.land(),
    Button::Start | Button::Select => {}
  }
}

/// Consumes device events until the device side hangs up or `shutdown` is
/// cancelled.
pub async fn route_device_events(
  mut events: mpsc::Receiver<DeviceEvent>,
  axes: Arc<AxisState>,
  aircraft: Aircraft,
  shutdown: CancellationToken,
) {
  loop {
    let event = tokio::select! {
      _ = shutdown.cancelled() => break,
      event = events.recv() => event,
    };

    match event {
      Some(DeviceEvent::ButtonPress(button)) => {
        handle_button(&aircraft, button);
      }
      Some(DeviceEvent::AxisChange(axis, value)) => axes.store(axis, value),
      None => break,
    }
  }
}

/// Re-requests the video stream every `KEEP_ALIVE_PERIOD` until cancelled.
async fn keep_alive(aircraft: Aircraft, cancel: CancellationToken) {
  let mut interval =
    time::interval_at(Instant::now() + KEEP_ALIVE_PERIOD, KEEP_ALIVE_PERIOD);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = interval.tick() => aircraft.start_video(),
    }
  }
}

/// Reacts to events coming from the aircraft link.
///
/// Owns the keep-alive task, which lives exactly as long as the connection it
/// was started for.
#[derive(Debug)]
pub struct LinkRouter {
  aircraft: Aircraft,
  telemetry: Arc<Latest<Arc<TelemetrySnapshot>>>,
  video: mpsc::Sender<Vec<u8>>,
  shutdown: CancellationToken,
  keep_alive: Option<CancellationToken>,
}

impl LinkRouter {
  /// Constructs a router forwarding video chunks into `video`.
  pub fn new(
    aircraft: Aircraft,
    telemetry: Arc<Latest<Arc<TelemetrySnapshot>>>,
    video: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
  ) -> Self {
    LinkRouter {
      aircraft,
      telemetry,
      video,
      shutdown,
      keep_alive: None,
    }
  }

  /// Whether a keep-alive task is currently armed.
  pub fn is_keeping_alive(&self) -> bool {
    self
      .keep_alive
      .as_ref()
      .is_some_and(|token| !token.is_cancelled())
  }

  fn stop_keep_alive(&mut self) {
    if let Some(token) = self.keep_alive.take() {
      token.cancel();
    }
  }

  /// Handles a single event. Must be called from within a tokio runtime.
  pub fn handle(&mut self, event: LinkEvent) {
    match event {
      LinkEvent::Connected => {
        pass!("Connected to aircraft.");
        self.stop_keep_alive();

        self.aircraft.start_video();
        self.aircraft.set_video_bitrate(VideoBitrate::OneMbps);
        self.aircraft.set_exposure(0);

        let token = self.shutdown.child_token();
        tokio::spawn(keep_alive(self.aircraft.clone(), token.clone()));
        self.keep_alive = Some(token);
      }
      LinkEvent::Disconnected => {
        fail!("Lost connection to aircraft.");
        self.stop_keep_alive();
      }
      LinkEvent::TelemetryUpdated(snapshot) => {
        self.telemetry.store(Arc::new(snapshot));
      }
      LinkEvent::VideoData(chunk) => match self.video.try_send(chunk) {
        Ok(()) => {}
        Err(TrySendError::Full(chunk)) => {
          warn!("Decoder is behind, dropped {} bytes of video.", chunk.len());
        }
        Err(TrySendError::Closed(chunk)) => {
          warn!("Decoder is gone, dropped {} bytes of video.", chunk.len());
        }
      },
    }
  }

  /// Consumes link events until the link hangs up or `shutdown` is
  /// cancelled.
  pub async fn run(mut self, mut events: mpsc::Receiver<LinkEvent>) {
    loop {
      let event = tokio::select! {
        _ = self.shutdown.cancelled() => break,
        event = events.recv() => event,
      };

      match event {
        Some(event) => self.handle(event),
        None => break,
      }
    }

    self.stop_keep_alive();
  }
}
