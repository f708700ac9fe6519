pub mod api;
pub mod events;

use anyhow::Result;
use colored::*;
use tokio::net::TcpListener;

pub use api::{router, AppState};

use crate::storage::ContentStore;

/// Bind `host:port` and serve the content API until the process stops
pub async fn start(host: &str, port: u16, store: ContentStore) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    println!(
        "{} Server running at {} ({} backend)",
        "✓".green(),
        format!("http://{}", addr).bright_blue(),
        store.backend_name().bright_yellow()
    );

    serve(listener, AppState::new(store)).await
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    // Fail fast on an unreachable backend instead of on the first request
    let snapshot = state.store.load().await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        version = snapshot.version,
        "content API listening"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
