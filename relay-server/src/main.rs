use std::error::Error;
use std::sync::Arc;

use tokio::signal;

use relay_server::config::ServerConfig;
use relay_server::http::{self, AppState};
use relay_server::network::registry::PeerRegistry;
use relay_server::storage::MessageStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = ServerConfig::from_env();
    log::info!("Starting relay server on port {}", config.port);

    let store = MessageStore::open(&config.sqlite_path)?;
    let state = AppState {
        registry: Arc::new(PeerRegistry::new()),
        store: Arc::new(store),
        config: Arc::new(config.clone()),
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Relay server listening on {addr}");

    tokio::select! {
        result = axum::serve(listener, http::router(state)) => {
            if let Err(err) = result {
                log::error!("Relay server terminated unexpectedly: {err}");
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping relay server...");
        }
    }

    Ok(())
}
