#![warn(missing_docs)]
#![warn(clippy::correctness)]

//! Station is the library/binary hybrid that flies a small quadcopter from a
//! joystick while recording and streaming its annotated video.

/// Startup configuration and controller profiles.
pub mod config;

/// The fixed-cadence loops turning axes into flight commands.
pub mod control;

/// Reading the gamepads.
pub mod input;

/// The UDP link to the aircraft.
pub mod link;

/// Routing of device and link events into commands and shared state.
pub mod router;

/// Components related to the live stream server, including route functions
/// and error handling.
pub mod server;

/// State shared between every task of the station.
pub mod state;

/// Everything related to the station command line tool.
pub mod tool;

/// Decoding, annotating, recording and broadcasting the aircraft's video.
pub mod video;
