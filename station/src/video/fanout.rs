use super::{Frame, FRAME_RATE, HEIGHT, WIDTH};
use crate::state::Latest;
use anyhow::{anyhow, Context};
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, ImageError};
use jeflog::{pass, warn};
use std::{
  fs::File,
  future::Future,
  io,
  path::Path,
  process::{ExitStatus, Stdio},
  sync::Arc,
};
use thiserror::Error;
use tokio::{
  io::{AsyncWrite, AsyncWriteExt},
  process::{Child, ChildStdin, Command},
  task,
};

/// Quality of the JPEG frames sent to the broadcast.
pub const JPEG_QUALITY: u8 = 80;

/// Why a sink could not take a frame.
#[derive(Debug, Error)]
pub enum SinkError {
  /// Writing to the sink failed.
  #[error("write failed: {0}")]
  Io(#[from] io::Error),

  /// The frame could not be compressed.
  #[error("encoding failed: {0}")]
  Encode(#[from] ImageError),

  /// The sink was already closed.
  #[error("sink is closed")]
  Closed,

  /// The encoder process did not exit cleanly.
  #[error("encoder exited with {0}")]
  Encoder(ExitStatus),
}

/// A destination for annotated frames.
pub trait FrameSink: Send {
  /// Short name used in logs.
  fn name(&self) -> &'static str;

  /// Takes one frame.
  fn write(
    &mut self,
    frame: &Frame,
  ) -> impl Future<Output = Result<(), SinkError>> + Send;

  /// Flushes and releases the sink. Further writes fail.
  fn close(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Arguments for an encoder reading raw frames from stdin and writing
/// `output` with `codec`.
pub fn recorder_args(output: &Path, codec: &str) -> Vec<String> {
  let size = format!("{WIDTH}x{HEIGHT}");
  let rate = FRAME_RATE.to_string();

  [
    "-hide_banner",
    "-loglevel",
    "error",
    "-f",
    "rawvideo",
    "-pix_fmt",
    "rgb24",
    "-s",
    size.as_str(),
    "-r",
    rate.as_str(),
    "-i",
    "pipe:0",
    "-c:v",
    codec,
    "-y",
  ]
  .iter()
  .map(|arg| arg.to_string())
  .chain([output.display().to_string()])
  .collect()
}

/// Appends raw frames to a writer, normally the stdin of an `ffmpeg`
/// encoder.
#[derive(Debug)]
pub struct Recorder<W> {
  writer: Option<W>,
  encoder: Option<Child>,
  frames: u64,
}

impl Recorder<ChildStdin> {
  /// Starts an encoder writing to `output`. Failure here is fatal to the
  /// station.
  pub fn spawn(output: &Path, codec: &str) -> anyhow::Result<Self> {
    File::create(output).with_context(|| {
      format!("Could not open {} for recording", output.display())
    })?;

    let mut encoder = Command::new("ffmpeg")
      .args(recorder_args(output, codec))
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::inherit())
      .spawn()
      .context("Could not start the ffmpeg encoder")?;

    let writer = encoder
      .stdin
      .take()
      .ok_or_else(|| anyhow!("Encoder stdin is not piped."))?;

    pass!("Recording to {} with {codec}.", output.display());

    Ok(Recorder {
      writer: Some(writer),
      encoder: Some(encoder),
      frames: 0,
    })
  }
}

impl<W: AsyncWrite + Unpin + Send> Recorder<W> {
  /// Records into an arbitrary writer.
  pub fn new(writer: W) -> Self {
    Recorder {
      writer: Some(writer),
      encoder: None,
      frames: 0,
    }
  }

  /// Number of frames written so far.
  pub fn frames(&self) -> u64 {
    self.frames
  }

  /// Gives the writer back, if the recorder has not been closed.
  pub fn into_inner(self) -> Option<W> {
    self.writer
  }
}

impl<W: AsyncWrite + Unpin + Send> FrameSink for Recorder<W> {
  fn name(&self) -> &'static str {
    "recorder"
  }

  async fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
    let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
    writer.write_all(frame.as_raw()).await?;
    self.frames += 1;
    Ok(())
  }

  async fn close(&mut self) -> Result<(), SinkError> {
    if let Some(mut writer) = self.writer.take() {
      writer.shutdown().await?;
    }

    if let Some(mut encoder) = self.encoder.take() {
      let status = encoder.wait().await?;

      if !status.success() {
        return Err(SinkError::Encoder(status));
      }
    }

    Ok(())
  }
}

/// Compresses a frame to JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, ImageError> {
  let mut jpeg = Vec::new();
  JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(frame)?;
  Ok(jpeg)
}

/// Publishes every frame as the latest JPEG for the stream server.
#[derive(Debug)]
pub struct Broadcast {
  frames: Arc<Latest<Bytes>>,
  quality: u8,
}

impl Broadcast {
  /// Publishes into `frames` at `JPEG_QUALITY`.
  pub fn new(frames: Arc<Latest<Bytes>>) -> Self {
    Broadcast {
      frames,
      quality: JPEG_QUALITY,
    }
  }
}

impl FrameSink for Broadcast {
  fn name(&self) -> &'static str {
    "broadcast"
  }

  async fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
    let frame = frame.clone();
    let quality = self.quality;

    let jpeg = task::spawn_blocking(move || encode_jpeg(&frame, quality))
      .await
      .map_err(|error| SinkError::Io(io::Error::other(error)))??;

    self.frames.store(Bytes::from(jpeg));
    Ok(())
  }

  async fn close(&mut self) -> Result<(), SinkError> {
    Ok(())
  }
}

/// What happened to one frame at each sink.
#[derive(Debug)]
pub struct FanoutReport {
  /// Outcome at the recorder.
  pub recorded: Result<(), SinkError>,

  /// Outcome at the broadcast.
  pub broadcast: Result<(), SinkError>,
}

impl FanoutReport {
  /// Whether both sinks succeeded.
  pub fn is_ok(&self) -> bool {
    self.recorded.is_ok() && self.broadcast.is_ok()
  }
}

fn report<S: FrameSink>(sink: &S, result: &Result<(), SinkError>) {
  if let Err(error) = result {
    warn!("Frame not delivered to {}: {error}", sink.name());
  }
}

/// Hands every frame to both sinks. A failing sink never keeps the other one
/// from getting the frame.
#[derive(Debug)]
pub struct Fanout<R, B> {
  recorder: R,
  broadcast: B,
}

impl<R: FrameSink, B: FrameSink> Fanout<R, B> {
  /// Constructs a fanout over two sinks.
  pub fn new(recorder: R, broadcast: B) -> Self {
    Fanout {
      recorder,
      broadcast,
    }
  }

  /// Writes one frame to both sinks concurrently.
  pub async fn deliver(&mut self, frame: &Frame) -> FanoutReport {
    let (recorded, broadcast) = tokio::join!(
      self.recorder.write(frame),
      self.broadcast.write(frame),
    );

    report(&self.recorder, &recorded);
    report(&self.broadcast, &broadcast);

    FanoutReport {
      recorded,
      broadcast,
    }
  }

  /// Closes both sinks, flushing the recording.
  pub async fn close(&mut self) -> FanoutReport {
    let (recorded, broadcast) =
      tokio::join!(self.recorder.close(), self.broadcast.close());

    report(&self.recorder, &recorded);
    report(&self.broadcast, &broadcast);

    FanoutReport {
      recorded,
      broadcast,
    }
  }

  /// The sinks, recorder first.
  pub fn into_sinks(self) -> (R, B) {
    (self.recorder, self.broadcast)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::video::FRAME_SIZE;

  /// Fails every write.
  #[derive(Debug, Default)]
  struct Broken {
    attempts: usize,
  }

  impl FrameSink for Broken {
    fn name(&self) -> &'static str {
      "broken"
    }

    async fn write(&mut self, _frame: &Frame) -> Result<(), SinkError> {
      self.attempts += 1;
      Err(SinkError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
      Err(SinkError::Closed)
    }
  }

  #[test]
  fn recorder_arguments() {
    let args = recorder_args(Path::new("flight.avi"), "mpeg4").join(" ");

    assert!(args.contains("-f rawvideo -pix_fmt rgb24 -s 960x720 -r 25 -i pipe:0"));
    assert!(args.ends_with("-c:v mpeg4 -y flight.avi"));
  }

  #[test]
  fn jpeg_is_decodable() {
    let frame = Frame::from_pixel(WIDTH, HEIGHT, image::Rgb([200, 10, 10]));
    let jpeg = encode_jpeg(&frame, JPEG_QUALITY).unwrap();

    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (WIDTH, HEIGHT));
  }

  #[tokio::test]
  async fn broken_recorder_does_not_stop_the_broadcast() {
    let frames = Arc::new(Latest::new());
    let mut fanout = Fanout::new(Broken::default(), Broadcast::new(frames.clone()));

    for _ in 0..2 {
      let report = fanout.deliver(&Frame::new(WIDTH, HEIGHT)).await;
      assert!(report.recorded.is_err());
      assert!(report.broadcast.is_ok());
    }

    assert!(frames.load().is_some());
    assert_eq!(fanout.into_sinks().0.attempts, 2);
  }

  #[tokio::test]
  async fn broken_broadcast_does_not_stop_the_recorder() {
    let mut fanout = Fanout::new(Recorder::new(Vec::new()), Broken::default());

    let report = fanout.deliver(&Frame::new(WIDTH, HEIGHT)).await;
    assert!(report.recorded.is_ok());
    assert!(!report.is_ok());

    let report = fanout.close().await;
    assert!(report.recorded.is_ok());

    let (recorder, broadcast) = fanout.into_sinks();
    assert_eq!(broadcast.attempts, 1);
    assert_eq!(recorder.frames(), 1);
  }

  #[tokio::test]
  async fn closed_recorder_rejects_frames() {
    let mut recorder = Recorder::new(Vec::new());
    recorder.write(&Frame::new(WIDTH, HEIGHT)).await.unwrap();
    assert_eq!(recorder.frames(), 1);

    recorder.close().await.unwrap();
    assert!(matches!(
      recorder.write(&Frame::new(WIDTH, HEIGHT)).await,
      Err(SinkError::Closed)
    ));
    assert!(recorder.into_inner().is_none());
  }

  #[tokio::test]
  async fn recorder_appends_raw_frames() {
    let mut recorder = Recorder::new(Vec::new());

    for shade in [0, 1] {
      recorder
        .write(&Frame::from_pixel(WIDTH, HEIGHT, image::Rgb([shade; 3])))
        .await
        .unwrap();
    }

    let written = recorder.into_inner().unwrap();
    assert_eq!(written.len(), 2 * FRAME_SIZE);
    assert!(written[..FRAME_SIZE].iter().all(|byte| *byte == 0));
    assert!(written[FRAME_SIZE..].iter().all(|byte| *byte == 1));
  }
}
