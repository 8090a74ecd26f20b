/// Driver for the aircraft's binary UDP protocol.
pub mod tello;

pub use tello::LinkConfig;

use common::comm::{
  ControlCommand,
  FlipDirection,
  LinkCommand,
  VideoBitrate,
};
use jeflog::warn;
use tokio::sync::mpsc;

/// Cheaply cloneable handle through which every task commands the aircraft.
///
/// All clones feed one unbounded queue drained by the link driver, which
/// serializes the commands onto the wire. Sending never blocks and never
/// fails loudly: if the link is gone the command is dropped with a warning.
#[derive(Clone, Debug)]
pub struct Aircraft {
  commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Aircraft {
  /// Creates a handle along with the receiving end the link driver consumes.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkCommand>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    (Aircraft { commands }, receiver)
  }

  /// Queues a command for the link.
  pub fn send(&self, command: LinkCommand) {
    if self.commands.send(command).is_err() {
      warn!("Dropped command '{command}' because the link is closed.");
    }
  }

  /// Asks the aircraft to start, or keep, streaming video.
  pub fn start_video(&self) {
    self.send(LinkCommand::StartVideo);
  }

  /// Sets the video encoder bitrate.
  pub fn set_video_bitrate(&self, rate: VideoBitrate) {
    self.send(LinkCommand::SetVideoBitrate(rate));
  }

  /// Sets the exposure compensation level.
  pub fn set_exposure(&self, level: u8) {
    self.send(LinkCommand::SetExposure(level));
  }

  /// Takes off.
  pub fn take_off(&self) {
    self.send(LinkCommand::TakeOff);
  }

  /// Lands.
  pub fn land(&self) {
    self.send(LinkCommand::Land);
  }

  /// Flips in the given direction.
  pub fn flip(&self, direction: FlipDirection) {
    self.send(LinkCommand::Flip(direction));
  }

  /// Updates the held stick position of one channel.
  pub fn steer(&self, command: ControlCommand) {
    self.send(LinkCommand::Move(command));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::comm::Movement;

  #[test]
  fn clones_share_one_queue() {
    let (aircraft, mut commands) = Aircraft::channel();
    let other = aircraft.clone();

    aircraft.take_off();
    other.steer(ControlCommand::new(Movement::Left, 0.5));
    aircraft.flip(FlipDirection::Right);

    assert_eq!(commands.try_recv(), Ok(LinkCommand::TakeOff));
    assert_eq!(
      commands.try_recv(),
      Ok(LinkCommand::Move(ControlCommand::new(Movement::Left, 0.5)))
    );
    assert_eq!(
      commands.try_recv(),
      Ok(LinkCommand::Flip(FlipDirection::Right))
    );
  }

  #[test]
  fn sending_to_a_closed_link_is_harmless() {
    let (aircraft, commands) = Aircraft::channel();
    drop(commands);

    aircraft.land();
  }
}
