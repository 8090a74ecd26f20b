use super::{
  fanout::{Fanout, FanoutReport, FrameSink},
  overlay::OverlayRenderer,
  Frame,
  FRAME_SIZE,
  HEIGHT,
  WIDTH,
};
use crate::state::Latest;
use chrono::Local;
use common::comm::TelemetrySnapshot;
use jeflog::{pass, warn};
use std::{io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
  io::{AsyncRead, AsyncReadExt},
  task,
  time,
};
use tokio_util::sync::CancellationToken;

/// Pause after a short read, so a dead decoder does not spin the loop.
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// While the decoder stays silent, only every this many stalls is logged.
pub const STALL_REPORT_INTERVAL: u32 = 100;

/// Whether the `count`th stall in a row gets logged.
pub fn reports_stall(count: u32) -> bool {
  count == 1 || count % STALL_REPORT_INTERVAL == 0
}

/// Why no frame came out of one read.
#[derive(Debug, Error)]
pub enum IngestError {
  /// The decoder output ended partway through (or before) a frame.
  #[error("stream ended after {read} of {expected} bytes")]
  ShortRead {
    /// Bytes read before the stream ended.
    read: usize,

    /// Bytes in a full frame.
    expected: usize,
  },

  /// Reading the decoder output failed.
  #[error("read failed: {0}")]
  Io(#[from] io::Error),

  /// The bytes do not form a frame of the expected shape.
  #[error("{0} bytes do not form a 960x720 RGB frame")]
  Malformed(usize),
}

/// Interprets a buffer as one frame.
pub fn decode_frame(bytes: Vec<u8>) -> Result<Frame, IngestError> {
  let length = bytes.len();

  if length != FRAME_SIZE {
    return Err(IngestError::Malformed(length));
  }

  Frame::from_raw(WIDTH, HEIGHT, bytes).ok_or(IngestError::Malformed(length))
}

/// Cuts the decoder's output into frames of exactly `FRAME_SIZE` bytes.
#[derive(Debug)]
pub struct FrameReader<R> {
  reader: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
  /// Reads frames out of `reader`.
  pub fn new(reader: R) -> Self {
    FrameReader { reader }
  }

  /// Reads exactly one frame. The bytes of a partial frame are discarded.
  pub async fn next_frame(&mut self) -> Result<Frame, IngestError> {
    let mut buffer = vec![0; FRAME_SIZE];
    let mut read = 0;

    while read < FRAME_SIZE {
      let size = self.reader.read(&mut buffer[read..]).await?;

      if size == 0 {
        return Err(IngestError::ShortRead {
          read,
          expected: FRAME_SIZE,
        });
      }

      read += size;
    }

    decode_frame(buffer)
  }
}

/// What one pass through the pipeline produced.
#[derive(Debug)]
pub enum Step {
  /// A frame was annotated and handed to both sinks.
  Delivered(FanoutReport),

  /// The bytes read were not a frame.
  Skipped,

  /// The decoder output had nothing to give; the pipeline waited before
  /// returning.
  Stalled,
}

/// Reads, annotates and fans out frames strictly one at a time.
#[derive(Debug)]
pub struct FramePipeline<I, R, B> {
  reader: FrameReader<I>,
  renderer: OverlayRenderer,
  telemetry: Arc<Latest<Arc<TelemetrySnapshot>>>,
  fanout: Fanout<R, B>,
  stalls: u32,
}

impl<I, R, B> FramePipeline<I, R, B>
where
  I: AsyncRead + Unpin,
  R: FrameSink,
  B: FrameSink,
{
  /// Assembles a pipeline.
  pub fn new(
    input: I,
    renderer: OverlayRenderer,
    telemetry: Arc<Latest<Arc<TelemetrySnapshot>>>,
    fanout: Fanout<R, B>,
  ) -> Self {
    FramePipeline {
      reader: FrameReader::new(input),
      renderer,
      telemetry,
      fanout,
      stalls: 0,
    }
  }

  /// Stalls since the last frame was read.
  pub fn stalls(&self) -> u32 {
    self.stalls
  }

  async fn process(&mut self, frame: Result<Frame, IngestError>) -> Step {
    if frame.is_ok() && self.stalls > 0 {
      pass!("Decoder output resumed after {} stalls.", self.stalls);
      self.stalls = 0;
    }

    match frame {
      Ok(mut frame) => {
        let telemetry = self.telemetry.load();
        let renderer = self.renderer;

        let drawn = task::spawn_blocking(move || {
          renderer.render(&mut frame, telemetry.as_deref(), &Local::now());
          frame
        })
        .await;

        match drawn {
          Ok(frame) => Step::Delivered(self.fanout.deliver(&frame).await),
          Err(error) => {
            warn!("Overlay failed, frame skipped: {error}");
            Step::Skipped
          }
        }
      }
      Err(IngestError::Malformed(length)) => {
        warn!("Skipped a frame of {length} bytes.");
        Step::Skipped
      }
      Err(error) => {
        self.stalls = self.stalls.saturating_add(1);

        if reports_stall(self.stalls) {
          warn!("No frame from decoder ({} in a row): {error}", self.stalls);
        }

        time::sleep(RETRY_DELAY).await;
        Step::Stalled
      }
    }
  }

  /// Runs one read, annotate and deliver pass.
  pub async fn step(&mut self) -> Step {
    let frame = self.reader.next_frame().await;
    self.process(frame).await
  }

  /// Runs until `shutdown` is cancelled, then closes both sinks and hands
  /// the fanout back. A frame already read is always delivered in full.
  pub async fn run(mut self, shutdown: CancellationToken) -> Fanout<R, B> {
    loop {
      let frame = tokio::select! {
        _ = shutdown.cancelled() => break,
        frame = self.reader.next_frame() => frame,
      };

      let stalled = matches!(self.process(frame).await, Step::Stalled);

      if stalled && shutdown.is_cancelled() {
        break;
      }
    }

    self.fanout.close().await;
    self.fanout
  }
}
