//! Herald Server
//!
//! HTTP backend that publishes notifications to application devices and
//! tracks their delivery.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use herald_core::config::load_config;
use herald_core::tracing_init::init_tracing;
use herald_server::api::{AppState, build_router};
use herald_server::attachments::{AttachmentStore, FilesystemAttachmentStore};
use herald_server::dispatcher::NotificationDispatcher;
use herald_server::hub::BroadcastHub;
use herald_server::storage::HeraldDatabase;
use herald_server::versions::VersionStore;

#[derive(Parser, Debug)]
#[command(name = "herald-server")]
#[command(
    version,
    about = "Herald server - notification fan-out and delivery tracking"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "HERALD_LISTEN_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long, env = "HERALD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Directory for uploaded attachments.
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Notifications kept per application.
    #[arg(long)]
    retention_limit: Option<u32>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "HERALD_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.listen_addr = addr;
    }
    if let Some(path) = args.db_path {
        config.database_path = Some(path);
    }
    if let Some(dir) = args.upload_dir {
        config.upload_dir = dir;
    }
    if let Some(limit) = args.retention_limit {
        config.retention_limit = limit;
    }
    config.log_json |= args.log_json;
    config.validate()?;

    init_tracing("herald_server=info,herald_core=info", config.log_json)?;

    info!(
        addr = %config.listen_addr,
        upload_dir = %config.upload_dir.display(),
        retention_limit = config.retention_limit,
        "Starting herald-server"
    );

    let db_path = config.resolved_database_path()?;
    info!(path = %db_path.display(), "Opening herald database");
    let db = HeraldDatabase::open(&db_path).await?;

    let hub = BroadcastHub::new(config.subscriber_queue_capacity);
    let attachments: Arc<dyn AttachmentStore> = Arc::new(FilesystemAttachmentStore::new(
        &config.upload_dir,
        &config.public_upload_prefix,
    ));

    let versions = VersionStore::new(db.clone(), Arc::clone(&attachments));
    let dispatcher =
        NotificationDispatcher::new(db, Arc::clone(&hub), attachments, config.retention_limit);

    let state = AppState {
        versions,
        dispatcher,
        keep_alive: Duration::from_secs(config.keep_alive_secs.max(1)),
    };
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Herald server listening");

    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
            // Ends every live stream so in-flight connections can drain.
            shutdown_hub.shutdown();
        })
        .await?;

    hub.shutdown();
    info!("Herald server stopped");
    Ok(())
}
