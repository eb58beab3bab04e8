//! HTTP control surface (feature `http`).
//!
//! Axum server exposing the engine's control operations under `/api/audio`
//! plus a Server-Sent Events stream of analysis frames.

mod routes;
mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use crate::engine::EngineHandle;

pub use routes::{build_router, run_http_server, HttpServerError, HttpState};
pub use sse::FrameStream;

/// Serve `handle` on `addr` until the server fails or the process exits.
pub async fn serve(handle: Arc<EngineHandle>, addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid bind address '{addr}'"))?;
    run_http_server(HttpState::new(handle), addr).await
}
