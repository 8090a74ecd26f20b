use crate::server::routes::AxisReadout;
use common::{comm::TelemetrySnapshot, ToPrettyString};
use jeflog::warn;
use reqwest::{blocking::Client, StatusCode};

/// Tool function which asks a running ground station for its current axes
/// and telemetry and prints them.
pub fn status(host: &str) -> anyhow::Result<()> {
  let client = Client::new();

  let axes: AxisReadout = client
    .get(format!("http://{host}/axes"))
    .send()?
    .error_for_status()?
    .json()?;

  println!(
    "Axes: left ({:+6}, {:+6})  right ({:+6}, {:+6})",
    axes.left_x, axes.left_y, axes.right_x, axes.right_y,
  );

  let response = client.get(format!("http://{host}/telemetry")).send()?;

  if response.status() == StatusCode::SERVICE_UNAVAILABLE {
    warn!("The aircraft has not reported any telemetry yet.");
    return Ok(());
  }

  let telemetry: TelemetrySnapshot = response.error_for_status()?.json()?;
  println!("{}", telemetry.to_pretty_string());

  Ok(())
}
