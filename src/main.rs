//! ByteDeck · Quest Progression Backend
//!
//! - Axum HTTP API over an in-memory deck
//! - Background task workers (availability refresh, map regeneration, badge sweeps)
//! - Demo deck when no config file is given
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   DECK_CONFIG_PATH  : path to TOML config (settings, engine tuning, seed catalogue)
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use bytedeck::clock::SystemClock;
use bytedeck::config::load_deck_config_from_env;
use bytedeck::deck::Deck;
use bytedeck::routes::build_router;
use bytedeck::{seeds, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = load_deck_config_from_env().unwrap_or_else(|| {
    info!(target: "bytedeck", "No deck config; starting with the demo deck");
    seeds::demo_config()
  });

  // Shared deck plus the receiving half of its task queue.
  let (deck, rx) = Deck::new(&config, Arc::new(SystemClock))?;
  let workers = deck.start_workers(rx);

  let app = build_router(deck.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "bytedeck", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  for w in workers {
    w.abort();
  }
  info!(target: "bytedeck", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "bytedeck", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
