use crate::{
  config::{Config, ControllerProfile},
  control::{AxisPolicy, FlightControlLoop},
  input,
  link::{tello::Link, Aircraft, LinkConfig},
  router::{route_device_events, LinkRouter},
  server::StreamServer,
  state::SharedState,
  video::{decoder, Broadcast, Decoder, Fanout, FramePipeline, OverlayRenderer, Recorder},
};
use anyhow::Context;
use clap::ArgMatches;
use jeflog::{fail, pass, task, warn};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};

/// Compressed video chunks waiting for the decoder.
const VIDEO_QUEUE: usize = 256;

/// Link and device events waiting to be routed.
const EVENT_QUEUE: usize = 64;

/// Longest the runtime waits for blocking work once every task has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Tool function which flies the aircraft until interrupted.
///
/// Configuration problems, an unreadable controller profile and sockets that
/// cannot be bound are fatal before anything is started. Everything else is
/// reported and retried while the station runs.
pub fn fly(args: &ArgMatches) -> anyhow::Result<()> {
  let config = Config::from_args(args)?;
  config.validate()?;

  let profile = ControllerProfile::load(&config.controller)?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("Could not start the async runtime")?;

  let result = runtime.block_on(run(config, profile));
  runtime.shutdown_timeout(SHUTDOWN_GRACE);
  result
}

async fn run(config: Config, profile: ControllerProfile) -> anyhow::Result<()> {
  let state = SharedState::new();
  let shutdown = state.shutdown.clone();

  let recorder = Recorder::spawn(&config.output, &config.codec)?;
  let Decoder {
    mut process,
    input: decoder_input,
    output: decoder_output,
  } = Decoder::spawn()?;

  let link = Link::bind(LinkConfig {
    listen_port: config.listen_port,
    aircraft: config.aircraft,
    video_port: config.video_port,
  })
  .await?;

  let server = StreamServer::new(state.clone(), config.stream_interval);
  let listener = StreamServer::bind(config.stream_port)
    .await
    .with_context(|| format!("Could not bind stream port {}", config.stream_port))?;

  let (aircraft, commands) = Aircraft::channel();
  let (link_events, link_receiver) = mpsc::channel(EVENT_QUEUE);
  let (device_events, device_receiver) = mpsc::channel(EVENT_QUEUE);
  let (video, video_receiver) = mpsc::channel(VIDEO_QUEUE);

  let policy = AxisPolicy::new(profile.inverted());
  let mut tasks: Vec<JoinHandle<()>> =
    link.spawn(commands, link_events, shutdown.clone())?;

  tasks.push(tokio::spawn(
    LinkRouter::new(
      aircraft.clone(),
      state.telemetry.clone(),
      video,
      shutdown.clone(),
    )
    .run(link_receiver),
  ));

  tasks.push(tokio::spawn(route_device_events(
    device_receiver,
    state.axes.clone(),
    aircraft.clone(),
    shutdown.clone(),
  )));

  tasks.push(tokio::spawn(input::run(
    config.gamepad.clone(),
    profile,
    device_events,
    shutdown.clone(),
  )));

  let (translation, throttle_yaw) =
    FlightControlLoop::new(state.axes.clone(), aircraft, policy)
      .spawn(shutdown.clone());
  tasks.extend([translation, throttle_yaw]);

  tasks.push(tokio::spawn(decoder::feed(
    decoder_input,
    video_receiver,
    shutdown.clone(),
  )));

  let pipeline = tokio::spawn(
    FramePipeline::new(
      decoder_output,
      OverlayRenderer::default(),
      state.telemetry.clone(),
      Fanout::new(recorder, Broadcast::new(state.frames.clone())),
    )
    .run(shutdown.clone()),
  );

  let serving = tokio::spawn(async move { server.serve(listener).await });

  pass!("Ground station is up. Press Ctrl-C to stop.");

  tokio::select! {
    result = tokio::signal::ctrl_c() => {
      if let Err(error) = result {
        fail!("Could not listen for Ctrl-C: {error}");
      }
    }
    _ = shutdown.cancelled() => {}
  }

  task!("Shutting down...");
  shutdown.cancel();

  match pipeline.await {
    Ok(fanout) => {
      let (recorder, _) = fanout.into_sinks();
      pass!("Recorded {} frames to {}.", recorder.frames(), config.output.display());
    }
    Err(error) => fail!("Video pipeline failed: {error}"),
  }

  if let Err(error) = process.kill().await {
    warn!("Could not stop the video decoder: {error}");
  }

  for task in tasks {
    if let Err(error) = task.await {
      fail!("Task failed during shutdown: {error}");
    }
  }

  match serving.await {
    Ok(Ok(())) => {}
    Ok(Err(error)) => fail!("Stream server failed: {error}"),
    Err(error) => fail!("Stream server task failed: {error}"),
  }

  pass!("Ground station stopped.");
  Ok(())
}
