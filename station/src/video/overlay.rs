use super::Frame;
use chrono::{DateTime, TimeZone, Utc};
use common::comm::TelemetrySnapshot;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::Rgb;

/// Color of the telemetry lines.
pub const TELEMETRY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Color of the timestamp.
pub const TIMESTAMP_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Left edge of every line of text.
pub const MARGIN: i32 = 10;

/// Baseline of the first telemetry line; each following line is this much
/// lower.
pub const LINE_SPACING: i32 = 20;

/// Baseline of the timestamp.
pub const TIMESTAMP_BASELINE: i32 = 700;

const GLYPH_SIZE: i32 = 8;

fn yes_nope(value: bool) -> &'static str {
  if value {
    "YES"
  } else {
    "NOPE"
  }
}

fn ok_high(value: bool) -> &'static str {
  if value {
    "HIGH"
  } else {
    "OK"
  }
}

/// The nine telemetry lines, top to bottom.
pub fn telemetry_lines(telemetry: &TelemetrySnapshot) -> [String; 9] {
  [
    format!("Battery: {:>3}%", telemetry.battery_percentage),
    format!("Temperature: {}", ok_high(telemetry.temperature_high)),
    format!("Pressure: {}", ok_high(telemetry.pressure_abnormal)),
    format!("Ground speed: {:.2}m/s", telemetry.ground_speed),
    format!("Air speed: {:.2}m/s", telemetry.air_speed),
    format!("Height: {:.2}", telemetry.height_meters()),
    format!("Flying: {}", yes_nope(telemetry.flying)),
    format!("On ground: {}", yes_nope(telemetry.on_ground)),
    format!("Hover: {}", yes_nope(telemetry.hovering)),
  ]
}

/// Formats a time the way HTTP dates are written, in GMT.
pub fn timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
  time
    .with_timezone(&Utc)
    .format("%a, %d %b %Y %H:%M:%S GMT")
    .to_string()
}

/// Draws text with the 8x8 bitmap font so that its bottom edge sits on
/// `baseline`. Pixels falling outside the frame are clipped. Characters the
/// font lacks leave a gap.
pub fn draw_text(
  frame: &mut Frame,
  text: &str,
  x: i32,
  baseline: i32,
  scale: u32,
  color: Rgb<u8>,
) {
  let scale = scale.max(1) as i32;
  let advance = GLYPH_SIZE * scale;
  let top = baseline - advance;
  let (width, height) = (frame.width() as i32, frame.height() as i32);

  for (index, character) in text.chars().enumerate() {
    let left = x + index as i32 * advance;

    if left >= width {
      break;
    }

    let Some(glyph) = BASIC_FONTS.get(character) else {
      continue;
    };

    for (row, bits) in glyph.iter().enumerate() {
      for column in 0..GLYPH_SIZE {
        if bits >> column & 1 == 0 {
          continue;
        }

        for dy in 0..scale {
          for dx in 0..scale {
            let px = left + column * scale + dx;
            let py = top + row as i32 * scale + dy;

            if (0..width).contains(&px) && (0..height).contains(&py) {
              frame.put_pixel(px as u32, py as u32, color);
            }
          }
        }
      }
    }
  }
}

/// Annotates frames with telemetry and the current time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OverlayRenderer {
  scale: u32,
}

impl Default for OverlayRenderer {
  fn default() -> Self {
    OverlayRenderer { scale: 2 }
  }
}

impl OverlayRenderer {
  /// Constructs a renderer drawing glyphs `scale` times their native size.
  pub fn new(scale: u32) -> Self {
    OverlayRenderer { scale }
  }

  /// Draws onto `frame` in place. Without telemetry only the timestamp is
  /// drawn.
  pub fn render<Tz>(
    &self,
    frame: &mut Frame,
    telemetry: Option<&TelemetrySnapshot>,
    now: &DateTime<Tz>,
  ) where
    Tz: TimeZone,
  {
    if let Some(telemetry) = telemetry {
      for (line, text) in (1..).zip(telemetry_lines(telemetry)) {
        draw_text(
          frame,
          &text,
          MARGIN,
          line * LINE_SPACING,
          self.scale,
          TELEMETRY_COLOR,
        );
      }
    }

    draw_text(
      frame,
      &timestamp(now),
      MARGIN,
      TIMESTAMP_BASELINE,
      self.scale,
      TIMESTAMP_COLOR,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::video::{HEIGHT, WIDTH};

  fn colors(frame: &Frame) -> (usize, usize, usize) {
    frame.pixels().fold((0, 0, 0), |(black, green, blue), pixel| {
      match *pixel {
        Rgb([0, 0, 0]) => (black + 1, green, blue),
        TELEMETRY_COLOR => (black, green + 1, blue),
        TIMESTAMP_COLOR => (black, green, blue + 1),
        other => panic!("unexpected pixel {other:?}"),
      }
    })
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
  }

  #[test]
  fn formats_lines() {
    let lines = telemetry_lines(&TelemetrySnapshot {
      battery_percentage: 7,
      temperature_high: true,
      pressure_abnormal: false,
      ground_speed: 1.234,
      air_speed: 2.0,
      height: 15,
      flying: true,
      on_ground: false,
      hovering: true,
    });

    assert_eq!(
      lines,
      [
        "Battery:   7%",
        "Temperature: HIGH",
        "Pressure: OK",
        "Ground speed: 1.23m/s",
        "Air speed: 2.00m/s",
        "Height: 1.50",
        "Flying: YES",
        "On ground: NOPE",
        "Hover: YES",
      ]
    );
  }

  #[test]
  fn formats_timestamp() {
    assert_eq!(timestamp(&now()), "Sat, 09 Mar 2024 14:05:07 GMT");
  }

  #[test]
  fn local_times_are_shown_in_gmt() {
    let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
    let local = now().with_timezone(&offset);

    assert_eq!(timestamp(&local), "Sat, 09 Mar 2024 14:05:07 GMT");
  }

  #[test]
  fn without_telemetry_only_the_timestamp_is_drawn() {
    let mut frame = Frame::new(WIDTH, HEIGHT);
    OverlayRenderer::default().render(&mut frame, None, &now());

    let (_, green, blue) = colors(&frame);
    assert_eq!(green, 0);
    assert!(blue > 0);

    // everything blue sits in the 16 pixel band above the baseline
    for (_, y, pixel) in frame.enumerate_pixels() {
      if *pixel == TIMESTAMP_COLOR {
        assert!((684..700).contains(&(y as i32)));
      }
    }
  }

  #[test]
  fn telemetry_is_drawn_in_the_top_left() {
    let mut frame = Frame::new(WIDTH, HEIGHT);
    OverlayRenderer::default().render(
      &mut frame,
      Some(&TelemetrySnapshot::default()),
      &now(),
    );

    let (_, green, blue) = colors(&frame);
    assert!(green > 0 && blue > 0);

    for (x, y, pixel) in frame.enumerate_pixels() {
      if *pixel == TELEMETRY_COLOR {
        assert!(x >= 10 && y < 180);
      }
    }
  }

  #[test]
  fn text_is_clipped_at_the_edges() {
    let mut frame = Frame::new(40, 20);
    draw_text(&mut frame, "HHHHHH", -5, 4, 2, TELEMETRY_COLOR);
    draw_text(&mut frame, "HHHHHH", 30, 30, 2, TELEMETRY_COLOR);

    let (_, green, _) = colors(&frame);
    assert!(green > 0);
  }

  #[test]
  fn glyphs_match_the_font() {
    let mut frame = Frame::new(8, 8);
    draw_text(&mut frame, "A", 0, 8, 1, TELEMETRY_COLOR);

    let glyph = BASIC_FONTS.get('A').unwrap();
    for (x, y, pixel) in frame.enumerate_pixels() {
      let lit = glyph[y as usize] >> x & 1 == 1;
      assert_eq!(*pixel == TELEMETRY_COLOR, lit, "pixel {x},{y}");
    }
  }
}
