use clap::ArgMatches;
use common::comm::tello::{self, FlightData, Packet, StickPosition};
use jeflog::{pass, task, warn};
use std::{
  io,
  net::{SocketAddr, UdpSocket},
  time::{Duration, Instant},
};

/// A simulated aircraft speaking the binary protocol, for exercising the
/// ground station without hardware.
#[derive(Clone, Debug)]
pub struct EmulatedAircraft {
  data: FlightData,
  stick: StickPosition,
  station: Option<SocketAddr>,
  sequence: u16,
  drain: f64,
}

impl Default for EmulatedAircraft {
  fn default() -> Self {
    EmulatedAircraft::new()
  }
}

impl EmulatedAircraft {
  /// A fully charged aircraft sitting on the ground.
  pub fn new() -> Self {
    EmulatedAircraft {
      data: FlightData {
        battery_percentage: 100,
        on_ground: true,
        ..Default::default()
      },
      stick: StickPosition::default(),
      station: None,
      sequence: 0,
      drain: 0.0,
    }
  }

  /// Where telemetry goes, once a station has connected.
  pub fn station(&self) -> Option<SocketAddr> {
    self.station
  }

  /// The current simulated flight data.
  pub fn data(&self) -> &FlightData {
    &self.data
  }

  /// Reacts to one datagram from `from`, returning the reply if there is
  /// one.
  pub fn handle(&mut self, datagram: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
    if let Some(video_port) = tello::parse_connection_request(datagram) {
      if self.station != Some(from) {
        pass!("Station connected from {from}, video requested on port {video_port}.");
      }

      self.station = Some(from);
      return Some(tello::connection_ack(video_port));
    }

    let packet = match Packet::decode(datagram) {
      Ok(packet) => packet,
      Err(error) => {
        warn!("Ignoring datagram from {from}: {error}");
        return None;
      }
    };

    match packet.command_id {
      tello::TAKE_OFF => {
        task!("Taking off.");
        self.data.flying = true;
        self.data.on_ground = false;
        self.data.height = self.data.height.max(8);
      }
      tello::LAND => {
        task!("Landing.");
        self.data.flying = false;
        self.data.hovering = false;
        self.data.on_ground = true;
        self.data.height = 0;
      }
      tello::FLIP => {
        task!("Flipping (direction {:?}).", packet.payload.first());
      }
      tello::STICK => match StickPosition::decode(packet.payload) {
        Ok(stick) => {
          if stick != self.stick {
            task!(
              "Sticks: roll {:+.2} pitch {:+.2} throttle {:+.2} yaw {:+.2}",
              stick.right_x,
              stick.right_y,
              stick.left_y,
              stick.left_x,
            );
          }

          self.stick = stick;
        }
        Err(error) => warn!("Ignoring stick packet: {error}"),
      },
      tello::VIDEO_ENCODER_RATE => {
        task!("Video bitrate set to level {:?}.", packet.payload.first());
      }
      tello::EXPOSURE => {
        task!("Exposure set to {:?}.", packet.payload.first());
      }
      tello::VIDEO_START | tello::TIME => {}
      other => warn!("Ignoring unknown command {other:#06x}."),
    }

    None
  }

  /// Advances the simulation by `elapsed` and encodes the resulting
  /// flight-data packet.
  pub fn telemetry(&mut self, elapsed: Duration) -> Vec<u8> {
    let seconds = elapsed.as_secs_f64();

    if self.data.flying {
      let climb = (self.stick.left_y * 10.0 * seconds).round() as i16;
      self.data.height = self.data.height.saturating_add(climb).max(0);
      self.data.north_speed = (self.stick.right_y * 10.0).round() as i16;
      self.data.east_speed = (self.stick.right_x * 10.0).round() as i16;
      self.data.vertical_speed = (self.stick.left_y * 10.0).round() as i16;
      self.data.hovering = self.stick == StickPosition::default();

      // a little noise, as from a real barometer
      self.data.height = self.data.height.saturating_add(rand::random::<i16>() % 2);
    } else {
      self.data.north_speed = 0;
      self.data.east_speed = 0;
      self.data.vertical_speed = 0;
    }

    self.drain += seconds * if self.data.flying { 0.2 } else { 0.02 };

    while self.drain >= 1.0 && self.data.battery_percentage > 0 {
      self.drain -= 1.0;
      self.data.battery_percentage -= 1;
    }

    self.sequence = self.sequence.wrapping_add(1);

    Packet {
      packet_type: 0x88,
      command_id: tello::FLIGHT_DATA,
      sequence: self.sequence,
      payload: &self.data.encode(),
    }
    .encode()
  }
}

/// Tool function which runs an emulated aircraft until interrupted.
pub fn emulate(args: &ArgMatches) -> anyhow::Result<()> {
  let port = args.get_one::<u16>("port").copied().unwrap_or(8889);
  let frequency = args.get_one::<f64>("frequency").copied().unwrap_or(10.0);
  let period = Duration::from_secs_f64(1.0 / frequency.clamp(0.1, 1000.0));

  let socket = UdpSocket::bind(("0.0.0.0", port))?;
  socket.set_read_timeout(Some(period))?;

  pass!("Emulated aircraft listening on {}.", socket.local_addr()?);

  let mut aircraft = EmulatedAircraft::new();
  let mut buffer = [0; 2048];
  let mut last_report = Instant::now();

  loop {
    match socket.recv_from(&mut buffer) {
      Ok((size, from)) => {
        if let Some(reply) = aircraft.handle(&buffer[..size], from) {
          socket.send_to(&reply, from)?;
        }
      }
      Err(error)
        if matches!(
          error.kind(),
          io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) => {}
      Err(error) => warn!("Failed to receive: {error}"),
    }

    let elapsed = last_report.elapsed();

    if elapsed >= period {
      last_report = Instant::now();

      if let Some(station) = aircraft.station() {
        let report = aircraft.telemetry(elapsed);

        if let Err(error) = socket.send_to(&report, station) {
          warn!("Failed to send telemetry to {station}: {error}");
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::comm::{ControlCommand, LinkCommand, Movement};

  fn station() -> SocketAddr {
    "127.0.0.1:6666".parse().unwrap()
  }

  #[test]
  fn answers_the_handshake() {
    let mut aircraft = EmulatedAircraft::new();

    let reply = aircraft.handle(&tello::connection_request(11111), station());
    assert!(tello::is_connection_ack(&reply.unwrap()));
    assert_eq!(aircraft.station(), Some(station()));
  }

  #[test]
  fn takes_off_climbs_and_lands() {
    let mut aircraft = EmulatedAircraft::new();
    aircraft.handle(&tello::connection_request(11111), station());

    let take_off = tello::encode_command(&LinkCommand::TakeOff, 1).unwrap();
    assert!(aircraft.handle(&take_off, station()).is_none());
    assert!(aircraft.data().flying);

    let mut stick = StickPosition::default();
    stick.apply(&ControlCommand::new(Movement::Up, 1.0));
    let stick = stick.encode(chrono::NaiveTime::MIN);
    aircraft.handle(&stick, station());

    let before = aircraft.data().height;
    let report = aircraft.telemetry(Duration::from_secs(1));
    assert!(aircraft.data().height > before);

    let packet = Packet::decode(&report).unwrap();
    assert_eq!(packet.command_id, tello::FLIGHT_DATA);
    let data = FlightData::parse(packet.payload).unwrap();
    assert!(data.flying && !data.on_ground);
    assert!(data.vertical_speed > 0);

    let land = tello::encode_command(&LinkCommand::Land, 2).unwrap();
    aircraft.handle(&land, station());
    assert!(aircraft.data().on_ground);
    assert_eq!(aircraft.data().height, 0);
  }

  #[test]
  fn battery_drains_over_time() {
    let mut aircraft = EmulatedAircraft::new();

    for _ in 0..150 {
      aircraft.telemetry(Duration::from_secs(1));
    }

    assert!((97..=98).contains(&aircraft.data().battery_percentage));
  }

  #[test]
  fn ignores_garbage() {
    let mut aircraft = EmulatedAircraft::new();
    assert!(aircraft.handle(b"garbage", station()).is_none());
    assert!(aircraft.station().is_none());
  }
}
