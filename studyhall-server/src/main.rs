use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

use studyhall_collab::{Gateway, Messenger};
use studyhall_core::StaticDirectory;
use studyhall_groups::GroupService;
use studyhall_server::{build_hub, router, AppState, ServerConfig};
use studyhall_store::GroupStore;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = ServerConfig::from_env()?;
    log::info!("Starting studyhall server...");

    let store = GroupStore::open(config.store.clone())?;
    let directory = StaticDirectory::load(&config.directory_path)?;
    log::info!(
        "Loaded {} users from {}",
        directory.len(),
        config.directory_path.display()
    );

    let groups = Arc::new(GroupService::new(Arc::new(store), Arc::new(directory)));
    let hub = build_hub(&config).await?;
    let messenger = Arc::new(Messenger::new(groups, hub));

    let gateway = Gateway::new(config.gateway.clone(), messenger.clone());
    tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            log::error!("Room gateway stopped: {e}");
        }
    });

    let app = router(AppState::new(messenger));
    let listener = TcpListener::bind(&config.http_addr).await?;
    log::info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;
    Ok(())
}
