#![allow(dead_code)]

use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use axum::Router;
use colossus_model::Context;
use tokio::net::TcpListener;

pub const APP: &str = "vtex.store-theme@4.x";

pub fn ctx() -> Context {
    Context::new("acme", "dev", "test-token").with_user_agent("colossus-tests")
}

/// Serves `router` on an ephemeral local port until the test runtime stops.
pub async fn serve(router: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind test listener")?;
    let addr = listener.local_addr().context("read test listener address")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}
