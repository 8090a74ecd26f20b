/// The H.264 decoder subprocess.
pub mod decoder;

/// Writing annotated frames to the recording and broadcast sinks.
pub mod fanout;

/// Reading raw frames and driving them through the pipeline.
pub mod ingest;

/// Drawing telemetry onto frames.
pub mod overlay;

pub use decoder::Decoder;
pub use fanout::{Broadcast, Fanout, FanoutReport, FrameSink, Recorder, SinkError};
pub use ingest::{FramePipeline, FrameReader, IngestError, Step};
pub use overlay::OverlayRenderer;

/// Width of every frame, in pixels.
pub const WIDTH: u32 = 960;

/// Height of every frame, in pixels.
pub const HEIGHT: u32 = 720;

/// Bytes in one raw RGB frame.
pub const FRAME_SIZE: usize = (WIDTH * HEIGHT * 3) as usize;

/// Frame rate of the recording.
pub const FRAME_RATE: u32 = 25;

/// One decoded frame, three channels per pixel, no alpha.
pub type Frame = image::RgbImage;
