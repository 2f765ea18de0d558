// ============================
// livecollab-backend-bin/src/main.rs
// ============================

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use livecollab_backend_lib::auth::verifier::{InMemoryUserDirectory, JwtVerifier};
use livecollab_backend_lib::config::Settings;
use livecollab_backend_lib::fetch::{AlphaVantageFetcher, FbrefFetcher};
use livecollab_backend_lib::{ws_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::load()?);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let users = match &settings.users_file {
        Some(path) => Arc::new(
            InMemoryUserDirectory::from_file(path)
                .with_context(|| format!("loading users from {}", path.display()))?,
        ),
        None => Arc::new(InMemoryUserDirectory::default()),
    };
    let verifier = Arc::new(JwtVerifier::new(&settings.jwt_secret, users));

    let series = Arc::new(AlphaVantageFetcher::new(&settings));
    let matches = Arc::new(FbrefFetcher::new());

    let state = Arc::new(AppState::new(settings.clone(), verifier, series, matches));
    let app = ws_router::create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
