use anyhow::{Context, Result};
use s3lazy::{
    build_app,
    config::{AppConfig, Backend},
    services::{
        disk_store::DiskStore,
        lazy_store::LazyStore,
        memory_store::MemoryStore,
        remote_store::RemoteStore,
        sigv4::Credentials,
        store::{Store, StoreError},
    },
    state::AppState,
};
use std::{future::IntoFuture, io::ErrorKind, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

/// How long in-flight requests may run once shutdown has been requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!(
        listen_addr = %cfg.listen_addr,
        backend = %cfg.backend,
        origin = %cfg.origin_endpoint,
        region = %cfg.aws_region,
        mappings = cfg.bucket_map.len(),
        "starting s3lazy"
    );

    // --- Stores ---
    let cache = build_cache(&cfg).await?;

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        tracing::warn!("no AWS credentials in environment; origin requests are anonymous");
    }
    let origin = RemoteStore::new(&cfg.origin_endpoint, &cfg.aws_region, cfg.origin_timeout)
        .context("creating origin client")?
        .with_credentials(credentials);

    let lazy = LazyStore::new(cache, Arc::new(origin)).with_origin_timeout(cfg.origin_timeout);
    lazy.set_namespace_mapping(cfg.bucket_map.clone());
    let stats = lazy.stats();
    let store: Arc<dyn Store> = Arc::new(lazy);

    create_init_buckets(store.as_ref(), &cfg.init_buckets).await;

    // --- Build router ---
    let app = build_app(AppState::new(store).with_stats(stats));

    // --- Start server ---
    let listener = bind(&cfg.listen_addr).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .into_future();

    tokio::select! {
        result = server => result.context("serving HTTP")?,
        _ = async {
            if shutdown_rx.wait_for(|stopping| *stopping).await.is_ok() {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::warn!(grace = ?SHUTDOWN_GRACE, "in-flight requests did not finish; exiting");
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn build_cache(cfg: &AppConfig) -> Result<Arc<dyn Store>> {
    let cache: Arc<dyn Store> = match cfg.backend {
        Backend::Disk => {
            let store = DiskStore::open(&cfg.data_dir).await.with_context(|| {
                format!("opening disk cache at {}", cfg.data_dir.display())
            })?;
            tracing::info!(data_dir = %cfg.data_dir.display(), "using disk cache");
            Arc::new(store)
        }
        Backend::Memory => {
            tracing::info!("using in-memory cache");
            Arc::new(MemoryStore::new())
        }
        Backend::Localstack => {
            let store =
                RemoteStore::new(&cfg.localstack_endpoint, &cfg.aws_region, cfg.origin_timeout)
                    .context("creating localstack client")?;
            tracing::info!(endpoint = store.endpoint(), "using localstack cache");
            Arc::new(store)
        }
    };
    Ok(cache)
}

/// Startup bucket creation is best effort; failures are logged, not fatal.
async fn create_init_buckets(store: &dyn Store, buckets: &[String]) {
    for bucket in buckets {
        match store.create_bucket(bucket).await {
            Ok(()) => tracing::info!(bucket = %bucket, "created bucket"),
            Err(StoreError::BucketAlreadyExists(_)) => {
                tracing::debug!(bucket = %bucket, "bucket already exists")
            }
            Err(err) => tracing::warn!(bucket = %bucket, error = %err, "failed to create bucket"),
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            let Some((host, port)) = addr.rsplit_once(':') else {
                return Err(err.into());
            };
            if !matches!(host, "0.0.0.0" | "[::]" | "::") {
                return Err(err.into());
            }
            let fallback_addr = format!("127.0.0.1:{port}");
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            Ok(TcpListener::bind(&fallback_addr).await?)
        }
        Err(err) => Err(err).with_context(|| format!("binding {addr}")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}
