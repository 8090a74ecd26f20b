use crate::server::{
  error::{unavailable, ServerResult},
  Shared,
};
use axum::{extract::State, Json};
use common::comm::{Axis, TelemetrySnapshot};
use serde::{Deserialize, Serialize};

/// The raw value of every controller axis at one instant.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AxisReadout {
  /// Yaw stick.
  pub left_x: i16,

  /// Throttle stick.
  pub left_y: i16,

  /// Roll stick.
  pub right_x: i16,

  /// Pitch stick.
  pub right_y: i16,
}

/// Route function returning the latest telemetry snapshot, or 503 before the
/// aircraft has reported any.
pub async fn telemetry(
  State(shared): State<Shared>,
) -> ServerResult<Json<TelemetrySnapshot>> {
  let snapshot = shared
    .state
    .telemetry
    .load()
    .ok_or_else(|| unavailable("No telemetry has been received yet."))?;

  Ok(Json(snapshot.as_ref().clone()))
}

/// Route function returning the current axis values.
pub async fn axes(State(shared): State<Shared>) -> Json<AxisReadout> {
  let axes = &shared.state.axes;

  Json(AxisReadout {
    left_x: axes.load(Axis::LeftX),
    left_y: axes.load(Axis::LeftY),
    right_x: axes.load(Axis::RightX),
    right_y: axes.load(Axis::RightY),
  })
}
