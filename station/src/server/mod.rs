/// Server error components.
pub mod error;

/// All server API route functions.
pub mod routes;

pub use error::{ServerError as Error, ServerResult as Result};

use crate::state::SharedState;
use axum::{routing::get, Router};
use jeflog::pass;
use std::{io, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::{self, CorsLayer};

/// State handed to every route function.
#[derive(Clone, Debug)]
pub struct Shared {
  /// The station's shared state.
  pub state: SharedState,

  /// How often the MJPEG stream pushes a new part.
  pub stream_interval: Duration,
}

/// The live stream server, constructed with all route functions ready.
#[derive(Clone, Debug)]
pub struct StreamServer {
  /// The shared state of the server, to be passed to route functions.
  pub shared: Shared,
}

impl StreamServer {
  /// Constructs a new `StreamServer` over the station's state.
  pub fn new(state: SharedState, stream_interval: Duration) -> Self {
    StreamServer {
      shared: Shared {
        state,
        stream_interval,
      },
    }
  }

  /// Builds the router with permissive CORS.
  pub fn router(&self) -> Router {
    let cors = CorsLayer::new()
      .allow_methods(cors::Any)
      .allow_headers(cors::Any)
      .allow_origin(cors::Any);

    Router::new()
      .route("/", get(routes::index))
      .route("/mjpeg", get(routes::mjpeg))
      .route("/frame.jpg", get(routes::frame))
      .route("/telemetry", get(routes::telemetry))
      .route("/axes", get(routes::axes))
      .fallback(routes::fallback)
      .layer(cors)
      .with_state(self.shared.clone())
  }

  /// Binds the listening socket on every interface. Failure here is fatal to
  /// the station.
  pub async fn bind(port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
  }

  /// Serves the route functions until the station shuts down. Open streams
  /// end on shutdown, so the graceful shutdown does not wait on clients.
  pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
    let shutdown = self.shared.state.shutdown.clone();
    pass!("Streaming on http://{}/", listener.local_addr()?);

    axum::serve(listener, self.router())
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await
  }
}
