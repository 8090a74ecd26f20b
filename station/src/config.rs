use anyhow::{anyhow, Context};
use clap::ArgMatches;
use common::comm::{Axis, Button};
use jeflog::warn;
use serde::{Deserialize, Serialize};
use std::{
  collections::HashMap,
  fs,
  net::{SocketAddr, ToSocketAddrs},
  path::{Path, PathBuf},
  time::Duration,
};

/// Everything needed to start the ground station, collected from the command
/// line.
#[derive(Clone, Debug)]
pub struct Config {
  /// Where the recorded flight video is written.
  pub output: PathBuf,

  /// Encoder used for the recording, as understood by `ffmpeg -c:v`.
  pub codec: String,

  /// Path of the JSON controller profile.
  pub controller: PathBuf,

  /// Only gamepads whose name contains this are read. Empty reads any.
  pub gamepad: String,

  /// Local UDP port the aircraft replies to.
  pub listen_port: u16,

  /// Address of the aircraft's command port.
  pub aircraft: SocketAddr,

  /// Local UDP port the aircraft streams video to.
  pub video_port: u16,

  /// TCP port of the live stream.
  pub stream_port: u16,

  /// How often the live stream pushes a new frame.
  pub stream_interval: Duration,

  /// Face classifier resource. Detection is disabled; the path is only
  /// checked so a bad deployment fails early.
  pub face_classifier: Option<PathBuf>,
}

fn required<'a, T: Clone + Send + Sync + 'static>(
  args: &'a ArgMatches,
  name: &str,
) -> anyhow::Result<&'a T> {
  args
    .get_one::<T>(name)
    .ok_or_else(|| anyhow!("Missing required argument '{name}'."))
}

impl Config {
  /// Collects the configuration from the arguments of the `fly` subcommand.
  pub fn from_args(args: &ArgMatches) -> anyhow::Result<Self> {
    let aircraft = required::<String>(args, "drone")?;
    let aircraft = aircraft
      .to_socket_addrs()
      .with_context(|| format!("Could not resolve aircraft address '{aircraft}'."))?
      .find(|address| address.is_ipv4())
      .ok_or_else(|| anyhow!("Aircraft address '{aircraft}' has no IPv4 address."))?;

    Ok(Config {
      output: required::<PathBuf>(args, "output")?.clone(),
      codec: required::<String>(args, "codec")?.clone(),
      controller: required::<PathBuf>(args, "controller")?.clone(),
      gamepad: args.get_one::<String>("gamepad").cloned().unwrap_or_default(),
      listen_port: *required::<u16>(args, "port")?,
      aircraft,
      video_port: *required::<u16>(args, "video_port")?,
      stream_port: *required::<u16>(args, "stream_port")?,
      stream_interval: Duration::from_millis(
        *required::<u64>(args, "stream_interval")?,
      ),
      face_classifier: args.get_one::<PathBuf>("face_classifier").cloned(),
    })
  }

  /// Checks the resources that must exist before anything is started.
  pub fn validate(&self) -> anyhow::Result<()> {
    if let Some(classifier) = &self.face_classifier {
      let metadata = fs::metadata(classifier).with_context(|| {
        format!("Error reading cascade file: {}", classifier.display())
      })?;

      if !metadata.is_file() || metadata.len() == 0 {
        return Err(anyhow!(
          "Cascade file {} is not a usable classifier.",
          classifier.display()
        ));
      }
    }

    if self.stream_interval.is_zero() {
      return Err(anyhow!("The stream interval must be at least 1 ms."));
    }

    if self.listen_port != 0 && self.listen_port == self.video_port {
      return Err(anyhow!(
        "The link port and the video port must differ (both {}).",
        self.listen_port
      ));
    }

    Ok(())
  }
}

/// Binds one physical axis of the device to a logical axis.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AxisBinding {
  /// Logical name, such as `right_y`.
  pub name: String,

  /// Native axis code reported by the device.
  pub id: u16,

  /// Negate the axis before it is turned into commands.
  #[serde(default)]
  pub invert: bool,
}

/// Binds one physical button of the device to a logical button.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ButtonBinding {
  /// Logical name, such as `triangle`.
  pub name: String,

  /// Native button code reported by the device.
  pub id: u16,
}

/// Raw shape of a controller profile file.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct ProfileFile {
  name: String,

  #[serde(default)]
  axis: Vec<AxisBinding>,

  #[serde(default)]
  buttons: Vec<ButtonBinding>,
}

/// A resolved controller profile: which device numbers produce which logical
/// axes and buttons, and which axes are inverted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerProfile {
  /// Human readable name of the controller.
  pub name: String,

  axes: HashMap<u16, Axis>,
  buttons: HashMap<u16, Button>,
  inverted: [bool; 4],
}

impl ControllerProfile {
  /// Reads and resolves a profile file.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let json = fs::read_to_string(path).with_context(|| {
      format!("Could not read controller profile {}", path.display())
    })?;

    Self::from_json(&json).with_context(|| {
      format!("Invalid controller profile {}", path.display())
    })
  }

  /// Resolves a profile from its JSON text. Names this ground station has no
  /// use for (triggers, shoulder buttons, ...) are skipped with a warning.
  pub fn from_json(json: &str) -> anyhow::Result<Self> {
    let file = serde_json::from_str::<ProfileFile>(json)?;
    let mut profile = ControllerProfile {
      name: file.name,
      ..Default::default()
    };

    for binding in file.axis {
      let axis = match binding.name.parse::<Axis>() {
        Ok(axis) => axis,
        Err(error) => {
          warn!("Ignoring profile entry: {error}.");
          continue;
        }
      };

      if let Some(existing) = profile.axes.insert(binding.id, axis) {
        return Err(anyhow!(
          "Axis {} is bound to both {existing} and {axis}.",
          binding.id
        ));
      }

      profile.inverted[axis.index()] = binding.invert;
    }

    for binding in file.buttons {
      let button = match binding.name.parse::<Button>() {
        Ok(button) => button,
        Err(error) => {
          warn!("Ignoring profile entry: {error}.");
          continue;
        }
      };

      if let Some(existing) = profile.buttons.insert(binding.id, button) {
        return Err(anyhow!(
          "Button {} is bound to both {existing} and {button}.",
          binding.id
        ));
      }
    }

    for axis in Axis::ALL {
      if !profile.axes.values().any(|bound| *bound == axis) {
        warn!("Controller profile '{}' does not bind {axis}.", profile.name);
      }
    }

    Ok(profile)
  }

  /// The logical axis produced by device axis `id`.
  pub fn axis(&self, id: u16) -> Option<Axis> {
    self.axes.get(&id).copied()
  }

  /// The logical button produced by device button `id`.
  pub fn button(&self, id: u16) -> Option<Button> {
    self.buttons.get(&id).copied()
  }

  /// Which logical axes are inverted, indexed by `Axis::index`.
  pub fn inverted(&self) -> [bool; 4] {
    self.inverted
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PROFILE: &str = r#"{
    "name": "Test Pad",
    "axis": [
      { "name": "left_x", "id": 0 },
      { "name": "left_y", "id": 1, "invert": true },
      { "name": "left_trigger", "id": 2 },
      { "name": "right_x", "id": 3 },
      { "name": "right_y", "id": 4, "invert": true }
    ],
    "buttons": [
      { "name": "x", "id": 0 },
      { "name": "circle", "id": 1 },
      { "name": "square", "id": 2 },
      { "name": "triangle", "id": 3 },
      { "name": "l1", "id": 4 }
    ]
  }"#;

  #[test]
  fn resolves_known_names() {
    let profile = ControllerProfile::from_json(PROFILE).unwrap();

    assert_eq!(profile.name, "Test Pad");
    assert_eq!(profile.axis(4), Some(Axis::RightY));
    assert_eq!(profile.axis(2), None);
    assert_eq!(profile.button(3), Some(Button::Triangle));
    assert_eq!(profile.button(4), None);
    assert_eq!(profile.inverted(), [false, true, false, true]);
  }

  #[test]
  fn rejects_double_binding() {
    let json = r#"{
      "name": "Broken",
      "axis": [
        { "name": "left_x", "id": 0 },
        { "name": "right_x", "id": 0 }
      ]
    }"#;

    assert!(ControllerProfile::from_json(json).is_err());
  }

  #[test]
  fn rejects_malformed_json() {
    assert!(ControllerProfile::from_json("{ \"axis\": 3 }").is_err());
  }

  #[test]
  fn missing_classifier_is_fatal() {
    let config = Config {
      output: PathBuf::from("flight.avi"),
      codec: "mpeg4".to_owned(),
      controller: PathBuf::from("logitech.json"),
      gamepad: String::new(),
      listen_port: 6666,
      aircraft: "192.168.10.1:8889".parse().unwrap(),
      video_port: 11111,
      stream_port: 8080,
      stream_interval: Duration::from_millis(50),
      face_classifier: Some(PathBuf::from("/definitely/not/a/classifier.xml")),
    };

    assert!(config.validate().is_err());
    assert!(Config { face_classifier: None, ..config.clone() }.validate().is_ok());
    assert!(Config {
      face_classifier: None,
      video_port: 6666,
      ..config
    }
    .validate()
    .is_err());
  }
}
