use anyhow::Context;
use chrono::Local;
use common::comm::{
  tello::{self, FlightData, Packet, StickPosition},
  LinkCommand,
  LinkEvent,
};
use jeflog::{fail, pass, task, warn};
use socket2::{Domain, Socket, Type};
use std::{
  fmt,
  io,
  net::SocketAddr,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};
use tokio::{
  net::UdpSocket,
  sync::mpsc,
  task::JoinHandle,
  time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// How often the handshake is retried and the connection checked.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// Silence after which a connected aircraft is considered lost.
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(3);

/// How often the held stick position is sent while connected.
pub const STICK_PERIOD: Duration = Duration::from_millis(20);

/// Bytes prepended by the aircraft to every video datagram.
pub const VIDEO_HEADER_SIZE: usize = 2;

/// Receive buffer requested for the video socket. Keyframes arrive in bursts
/// that overflow the default buffer.
const VIDEO_RECV_BUFFER: usize = 512 * 1024;

/// Where the link listens and what it talks to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkConfig {
  /// Local port for commands and telemetry, 0 for any.
  pub listen_port: u16,

  /// The aircraft's command port.
  pub aircraft: SocketAddr,

  /// Local port the aircraft streams video to, 0 for any.
  pub video_port: u16,
}

/// The bound sockets of an aircraft link, ready to be started.
#[derive(Debug)]
pub struct Link {
  control: Arc<UdpSocket>,
  video: UdpSocket,
}

impl Link {
  /// Binds both sockets. Failure here is fatal to the station.
  pub async fn bind(config: LinkConfig) -> anyhow::Result<Self> {
    let control = UdpSocket::bind(("0.0.0.0", config.listen_port))
      .await
      .with_context(|| format!("Could not bind link port {}", config.listen_port))?;

    control.connect(config.aircraft).await.with_context(|| {
      format!("Could not address aircraft at {}", config.aircraft)
    })?;

    let video = bind_video(config.video_port)
      .with_context(|| format!("Could not bind video port {}", config.video_port))?;

    Ok(Link {
      control: Arc::new(control),
      video,
    })
  }

  /// Address of the command socket.
  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.control.local_addr()
  }

  /// Address of the video socket.
  pub fn video_addr(&self) -> io::Result<SocketAddr> {
    self.video.local_addr()
  }

  /// Spawns the command, receive and video tasks. All of them stop once
  /// `shutdown` is cancelled.
  pub fn spawn(
    self,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
  ) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let video_port = self.video_addr()?.port();
    let connected = Arc::new(AtomicBool::new(false));

    task!("Connecting to aircraft, video on port {video_port}...");

    Ok(vec![
      tokio::spawn(send_commands(
        self.control.clone(),
        commands,
        connected.clone(),
        shutdown.clone(),
      )),
      tokio::spawn(receive_control(
        self.control,
        video_port,
        events.clone(),
        connected,
        shutdown.clone(),
      )),
      tokio::spawn(receive_video(self.video, events, shutdown)),
    ])
  }
}

fn bind_video(port: u16) -> io::Result<UdpSocket> {
  let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
  let address = SocketAddr::from(([0, 0, 0, 0], port));

  if let Err(error) = socket.set_recv_buffer_size(VIDEO_RECV_BUFFER) {
    warn!("Could not enlarge the video receive buffer: {error}");
  }

  socket.bind(&address.into())?;
  socket.set_nonblocking(true)?;
  UdpSocket::from_std(socket.into())
}

async fn send(socket: &UdpSocket, bytes: &[u8], what: &(dyn fmt::Display + Sync)) {
  if let Err(error) = socket.send(bytes).await {
    warn!("Failed to send {what} to aircraft: {error}");
  }
}

/// Serializes commands onto the wire. Movement only updates the held stick
/// position, which is sent on its own cadence while connected.
async fn send_commands(
  socket: Arc<UdpSocket>,
  mut commands: mpsc::UnboundedReceiver<LinkCommand>,
  connected: Arc<AtomicBool>,
  shutdown: CancellationToken,
) {
  let mut stick = StickPosition::default();
  let mut sequence = 0_u16;
  let mut ticker = time::interval(STICK_PERIOD);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      command = commands.recv() => {
        let Some(command) = command else {
          break;
        };

        if let LinkCommand::Move(movement) = command {
          stick.apply(&movement);
          continue;
        }

        if !connected.load(Ordering::Relaxed) {
          warn!("Dropped '{command}' because the aircraft is not connected.");
          continue;
        }

        sequence = sequence.wrapping_add(1);

        if let Some(bytes) = tello::encode_command(&command, sequence) {
          send(&socket, &bytes, &command).await;
        }
      }
      _ = ticker.tick() => {
        if connected.load(Ordering::Relaxed) {
          let bytes = stick.encode(Local::now().time());
          send(&socket, &bytes, &"stick position").await;
        }
      }
    }
  }
}

/// Runs the handshake and watchdog and turns incoming packets into events.
async fn receive_control(
  socket: Arc<UdpSocket>,
  video_port: u16,
  events: mpsc::Sender<LinkEvent>,
  connected: Arc<AtomicBool>,
  shutdown: CancellationToken,
) {
  let mut buffer = vec![0; 4096];
  let mut last_heard = Instant::now();
  let mut watchdog = time::interval(WATCHDOG_PERIOD);
  watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = watchdog.tick() => {
        if connected.load(Ordering::Relaxed) && last_heard.elapsed() >= SILENCE_TIMEOUT {
          connected.store(false, Ordering::Relaxed);

          if events.send(LinkEvent::Disconnected).await.is_err() {
            break;
          }
        }

        if !connected.load(Ordering::Relaxed) {
          let request = tello::connection_request(video_port);
          send(&socket, &request, &"connection request").await;
        }
      }
      result = socket.recv(&mut buffer) => {
        let size = match result {
          Ok(size) => size,
          // nothing is listening on the aircraft's side yet
          Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => continue,
          Err(error) => {
            warn!("Failed to receive from aircraft: {error}");
            continue;
          }
        };

        last_heard = Instant::now();

        let Some(event) = interpret(&socket, &buffer[..size], &connected).await else {
          continue;
        };

        if events.send(event).await.is_err() {
          break;
        }
      }
    }
  }
}

/// Decodes one datagram from the command socket, answering it if needed.
async fn interpret(
  socket: &UdpSocket,
  datagram: &[u8],
  connected: &AtomicBool,
) -> Option<LinkEvent> {
  if tello::is_connection_ack(datagram) {
    if connected.swap(true, Ordering::Relaxed) {
      return None;
    }

    return Some(LinkEvent::Connected);
  }

  let packet = match Packet::decode(datagram) {
    Ok(packet) => packet,
    Err(error) => {
      warn!("Dropped malformed packet from aircraft: {error}");
      return None;
    }
  };

  match packet.command_id {
    tello::FLIGHT_DATA => match FlightData::parse(packet.payload) {
      Ok(data) => Some(LinkEvent::TelemetryUpdated(data.snapshot())),
      Err(error) => {
        warn!("Dropped malformed flight data: {error}");
        None
      }
    },
    tello::TIME => {
      let reply = tello::encode_time(packet.sequence, Local::now().time());
      send(socket, &reply, &"time").await;
      None
    }
    _ => None,
  }
}

/// Strips the header off every video datagram and forwards the rest.
async fn receive_video(
  socket: UdpSocket,
  events: mpsc::Sender<LinkEvent>,
  shutdown: CancellationToken,
) {
  let mut buffer = vec![0; 65_536];
  let mut streaming = false;

  loop {
    let result = tokio::select! {
      _ = shutdown.cancelled() => break,
      result = socket.recv(&mut buffer) => result,
    };

    match result {
      Ok(size) if size > VIDEO_HEADER_SIZE => {
        if !streaming {
          pass!("Receiving video from aircraft.");
          streaming = true;
        }

        let chunk = buffer[VIDEO_HEADER_SIZE..size].to_vec();

        if events.send(LinkEvent::VideoData(chunk)).await.is_err() {
          break;
        }
      }
      Ok(_) => {}
      Err(error) => fail!("Failed to receive video: {error}"),
    }
  }
}
