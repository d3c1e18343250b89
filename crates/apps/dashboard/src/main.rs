use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod error;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;
    if config.admin_password.is_none() {
        info!("no admin password configured; uploads are disabled");
    }

    let app = routes::build_app(state, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| format!("bind {}: {e}", config.addr))?;
    info!(
        "dashboard listening on http://{} (data in {})",
        config.addr,
        config.data_dir.display()
    );
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {e}"))
}
