use clap::{value_parser, Arg, Command};
use jeflog::fail;
use station::tool;
use std::{path::PathBuf, process};

fn main() -> anyhow::Result<()> {
  let matches = Command::new("station")
    .about("Ground station for a small quadcopter")
    .subcommand_required(true)
    .subcommand(
      Command::new("fly")
        .about("Connects to the aircraft and flies it with a joystick, recording and streaming its video.")
        .arg(
          Arg::new("output")
            .short('o')
            .long("output")
            .default_value("flight.avi")
            .help("Where the recorded video is written.")
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(
          Arg::new("codec")
            .short('c')
            .long("codec")
            .default_value("mpeg4")
            .help("Encoder used for the recording, as understood by ffmpeg."),
        )
        .arg(
          Arg::new("controller")
            .long("controller")
            .default_value("logitech.json")
            .help("JSON profile mapping the joystick's axes and buttons.")
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(
          Arg::new("gamepad")
            .short('g')
            .long("gamepad")
            .required(false)
            .help("Read only gamepads whose name contains this. Any gamepad when omitted."),
        )
        .arg(
          Arg::new("drone")
            .long("drone")
            .default_value("192.168.10.1:8889")
            .help("Address of the aircraft's command port."),
        )
        .arg(
          Arg::new("port")
            .short('p')
            .long("port")
            .default_value("6666")
            .help("Local port the aircraft replies to.")
            .value_parser(value_parser!(u16)),
        )
        .arg(
          Arg::new("video_port")
            .long("video-port")
            .default_value("11111")
            .value_parser(value_parser!(u16)),
        )
        .arg(
          Arg::new("stream_port")
            .long("stream-port")
            .default_value("8080")
            .value_parser(value_parser!(u16)),
        )
        .arg(
          Arg::new("stream_interval")
            .long("stream-interval")
            .default_value("50")
            .help("Milliseconds between frames of the live stream.")
            .value_parser(value_parser!(u64)),
        )
        .arg(
          Arg::new("face_classifier")
            .long("face-classifier")
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        ),
    )
    .subcommand(
      Command::new("emulate")
        .about("Emulates the aircraft on this machine.")
        .arg(
          Arg::new("port")
            .short('p')
            .long("port")
            .default_value("8889")
            .value_parser(value_parser!(u16)),
        )
        .arg(
          Arg::new("frequency")
            .short('f')
            .long("frequency")
            .default_value("10.0")
            .help("Telemetry reports per second.")
            .value_parser(value_parser!(f64)),
        ),
    )
    .subcommand(
      Command::new("status")
        .about("Prints the axes and telemetry of a running ground station.")
        .arg(
          Arg::new("host")
            .default_value("localhost:8080")
            .help("Host and port of the ground station's stream server."),
        ),
    )
    .get_matches();

  let result = match matches.subcommand() {
    Some(("fly", args)) => tool::fly(args),
    Some(("emulate", args)) => tool::emulate(args),
    Some(("status", args)) => {
      let host = args
        .get_one::<String>("host")
        .map(String::as_str)
        .unwrap_or("localhost:8080");

      tool::status(host)
    }
    _ => unreachable!("subcommand is required"),
  };

  if let Err(error) = result {
    fail!("{error:#}");
    process::exit(1);
  }

  Ok(())
}
