use crate::server::{
  error::{unavailable, ServerResult},
  Shared,
};
use axum::{
  body::Body,
  extract::State,
  http::header,
  response::{Html, IntoResponse, Response},
};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use std::convert::Infallible;
use tokio::{
  sync::watch,
  time::{self, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Separates the parts of the MJPEG stream.
pub const BOUNDARY: &str = "frame";

const INDEX: &str = "<!DOCTYPE html>
<html>
  <head><title>Ground Station</title></head>
  <body style=\"margin: 0; background: black;\">
    <img src=\"/mjpeg\" style=\"display: block; margin: auto; max-width: 100%;\" />
  </body>
</html>
";

/// Route function serving a page that shows the live stream.
pub async fn index() -> Html<&'static str> {
  Html(INDEX)
}

/// Route function returning the latest frame as a JPEG, or 503 before the
/// first frame has been decoded.
pub async fn frame(State(shared): State<Shared>) -> ServerResult<Response> {
  let jpeg = shared
    .state
    .frames
    .load()
    .ok_or_else(|| unavailable("No frame has been decoded yet."))?;

  Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

/// Wraps one JPEG as a part of the multipart stream.
pub fn part(jpeg: &[u8]) -> Bytes {
  let header = format!(
    "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
    jpeg.len()
  );

  let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
  part.put_slice(header.as_bytes());
  part.put_slice(jpeg);
  part.put_slice(b"\r\n");
  part.freeze()
}

struct Streamer {
  frames: watch::Receiver<Option<Bytes>>,
  ticker: Interval,
  shutdown: CancellationToken,
  primed: bool,
}

impl Streamer {
  /// Waits for the next tick with a frame the client has not seen yet.
  /// Returns `None` once the station shuts down.
  async fn next(&mut self) -> Option<Bytes> {
    loop {
      tokio::select! {
        _ = self.shutdown.cancelled() => return None,
        _ = self.ticker.tick() => {}
      }

      let fresh = match self.frames.has_changed() {
        Ok(changed) => changed || !self.primed,
        Err(_) => return None,
      };

      if !fresh {
        continue;
      }

      if let Some(jpeg) = self.frames.borrow_and_update().clone() {
        self.primed = true;
        return Some(part(&jpeg));
      }
    }
  }
}

/// Route function streaming frames as `multipart/x-mixed-replace`, one part
/// per interval whenever the frame has changed. The stream ends when the
/// station shuts down.
pub async fn mjpeg(State(shared): State<Shared>) -> Response {
  let mut ticker = time::interval(shared.stream_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

  let streamer = Streamer {
    frames: shared.state.frames.subscribe(),
    ticker,
    shutdown: shared.state.shutdown.clone(),
    primed: false,
  };

  let parts = stream::unfold(streamer, |mut streamer| async move {
    let part = streamer.next().await?;
    Some((Ok::<_, Infallible>(part), streamer))
  });

  (
    [(
      header::CONTENT_TYPE,
      format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
    )],
    Body::from_stream(parts),
  )
    .into_response()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::SharedState;
  use axum::http::StatusCode;
  use std::time::Duration;

  fn shared() -> Shared {
    Shared {
      state: SharedState::new(),
      stream_interval: Duration::from_millis(50),
    }
  }

  #[test]
  fn parts_are_delimited() {
    let part = part(&[0xFF, 0xD8, 0xFF, 0xD9]);

    assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
    assert!(part.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']));
    assert!(String::from_utf8_lossy(&part).contains("Content-Length: 4\r\n\r\n"));
  }

  #[tokio::test]
  async fn frame_is_unavailable_until_published() {
    let shared = shared();

    let response = frame(State(shared.clone())).await.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    shared.state.frames.store(Bytes::from_static(&[0xFF, 0xD8]));
    let response = frame(State(shared)).await.into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
  }

  #[tokio::test(start_paused = true)]
  async fn streamer_sends_changed_frames_and_ends_on_shutdown() {
    let shared = shared();
    shared.state.frames.store(Bytes::from_static(b"first"));

    let mut streamer = Streamer {
      frames: shared.state.frames.subscribe(),
      ticker: time::interval(shared.stream_interval),
      shutdown: shared.state.shutdown.clone(),
      primed: false,
    };

    // the frame already there when the client connects is sent right away
    assert_eq!(streamer.next().await, Some(part(b"first")));

    shared.state.frames.store(Bytes::from_static(b"second"));
    assert_eq!(streamer.next().await, Some(part(b"second")));

    // nothing new: the streamer waits until shutdown
    let waiting = tokio::spawn(async move { streamer.next().await });
    time::sleep(Duration::from_millis(500)).await;
    assert!(!waiting.is_finished());

    shared.state.shutdown.cancel();
    assert_eq!(waiting.await.unwrap(), None);
  }
}
