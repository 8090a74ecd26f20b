use super::{HEIGHT, WIDTH};
use anyhow::{anyhow, Context};
use jeflog::{fail, pass};
use std::process::Stdio;
use tokio::{
  io::{AsyncWrite, AsyncWriteExt},
  process::{Child, ChildStdin, ChildStdout, Command},
  sync::mpsc,
};
use tokio_util::sync::CancellationToken;

/// Arguments turning an H.264 stream on stdin into raw RGB frames on stdout.
pub fn decoder_args() -> Vec<String> {
  let size = format!("{WIDTH}x{HEIGHT}");

  [
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-pix_fmt",
    "rgb24",
    "-s",
    size.as_str(),
    "-f",
    "rawvideo",
    "pipe:1",
  ]
  .iter()
  .map(|arg| arg.to_string())
  .collect()
}

/// A running `ffmpeg` decoder. The process is killed when this is dropped.
#[derive(Debug)]
pub struct Decoder {
  /// The process itself.
  pub process: Child,

  /// Compressed video goes in here.
  pub input: ChildStdin,

  /// Raw frames come out of here.
  pub output: ChildStdout,
}

impl Decoder {
  /// Starts the decoder. Failure here is fatal to the station.
  pub fn spawn() -> anyhow::Result<Self> {
    let mut process = Command::new("ffmpeg")
      .args(decoder_args())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .context("Could not start the ffmpeg decoder")?;

    let input = process
      .stdin
      .take()
      .ok_or_else(|| anyhow!("Decoder stdin is not piped."))?;

    let output = process
      .stdout
      .take()
      .ok_or_else(|| anyhow!("Decoder stdout is not piped."))?;

    pass!("Started video decoder.");

    Ok(Decoder {
      process,
      input,
      output,
    })
  }
}

/// Writes compressed chunks into the decoder as they arrive.
///
/// Once the decoder stops accepting input, chunks are still drained and
/// discarded so the link router never sees a full queue on its account.
pub async fn feed<W: AsyncWrite + Unpin>(
  mut input: W,
  mut chunks: mpsc::Receiver<Vec<u8>>,
  shutdown: CancellationToken,
) {
  let mut broken = false;

  loop {
    let chunk = tokio::select! {
      _ = shutdown.cancelled() => break,
      chunk = chunks.recv() => chunk,
    };

    let Some(chunk) = chunk else {
      break;
    };

    if broken {
      continue;
    }

    if let Err(error) = input.write_all(&chunk).await {
      fail!("Decoder stopped accepting video: {error}");
      broken = true;
    }
  }
}
