/// Route functions exposing telemetry and controller state as JSON.
pub mod data;

/// Route functions serving the live video.
pub mod stream;

pub use data::*;
pub use stream::*;

use crate::server::error::{not_found, ServerError};

/// Answers every route that does not exist.
pub async fn fallback() -> ServerError {
  not_found("No such route.")
}
