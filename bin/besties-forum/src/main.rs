//! # Besties Forum Binary
//!
//! Assembles the application from the plugins selected at compile time.

use std::sync::Arc;

use actix_files::Files;
use actix_web::{web, App, HttpServer};
use bf_api::handlers::AppState;
use bf_api::middleware::{cors_policy, security_headers, standard_middleware};
use bf_config::{AppConfig, LogConfig};
use bf_core::{BlobStore, ForumRepo};
use bf_services::{ForumService, ServiceOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "db-sqlite")]
use bf_db_sqlite::SqliteForumRepo;
#[cfg(feature = "db-sqlite")]
use secrecy::ExposeSecret;

#[cfg(all(feature = "db-memory", not(feature = "db-sqlite")))]
use bf_db_memory::MemoryForumRepo;

#[cfg(feature = "storage-local")]
use bf_storage_local::LocalBlobStore;

#[cfg(not(any(feature = "db-sqlite", feature = "db-memory")))]
compile_error!("enable a store plugin: `db-sqlite` or `db-memory`");

#[cfg(not(feature = "storage-local"))]
compile_error!("enable a blob plugin: `storage-local`");

fn init_tracing(log: &LogConfig) {
    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.log);

    // 1. Store implementation
    #[cfg(feature = "db-sqlite")]
    let repo: Arc<dyn ForumRepo> = Arc::new(SqliteForumRepo::new(config.database.url.expose_secret()).await?);

    #[cfg(all(feature = "db-memory", not(feature = "db-sqlite")))]
    let repo: Arc<dyn ForumRepo> = Arc::new(MemoryForumRepo::new());

    // 2. Blob implementation
    std::fs::create_dir_all(&config.storage.root_path)?;
    #[cfg(feature = "storage-local")]
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(
        config.storage.root_path.clone(),
        config.storage.url_prefix.clone(),
    ));

    let options = ServiceOptions {
        default_page_size: config.forum.default_page_size,
        vote_retry_limit: config.forum.vote_retry_limit,
    };
    let state = web::Data::new(AppState {
        forum: ForumService::with_options(repo, blobs, options),
    });

    let (host, port) = config.bind_address();
    let allowed_origin = config.server.allowed_origin.clone();
    let upload_root = config.storage.root_path.clone();
    let upload_prefix = config.storage.url_prefix.clone();

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(cors_policy(allowed_origin.as_deref()))
            .wrap(security_headers())
            .wrap(standard_middleware())
            .app_data(state.clone())
            .configure(bf_api::configure_routes)
            .service(Files::new(&upload_prefix, upload_root.clone()))
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    info!(%host, port, "besties forum listening");
    server.bind((host, port))?.run().await?;
    Ok(())
}
