mod batching;
mod cache;
mod config;
mod db;
mod embedding;
mod errors;
mod inference;
mod matching;
mod models;
mod routes;
mod state;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::batching::BatchScheduler;
use crate::cache::disk::DiskTier;
use crate::cache::local::LocalTier;
use crate::cache::remote::{RedisKvStore, RemoteTier};
use crate::cache::{CacheTier, InferenceCache};
use crate::config::{load_manifest, ArtifactSource, Config};
use crate::db::{create_pool, PgRecordStore, RecordStore};
use crate::embedding::EmbeddingService;
use crate::inference::artifacts::{ArtifactStore, FsArtifactStore, S3ArtifactStore};
use crate::inference::loader::ArtifactModelLoader;
use crate::inference::{ModelRegistry, TaskKind};
use crate::matching::{MatchEngine, MatchWeights};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Compass API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (optional: only id-based match requests need it)
    let records: Option<Arc<dyn RecordStore>> = match &config.database_url {
        Some(url) => Some(Arc::new(PgRecordStore::new(create_pool(url).await?))),
        None => {
            warn!("DATABASE_URL not set; id-based match requests are disabled");
            None
        }
    };

    // Initialize model registry
    let artifacts = build_artifact_store(&config).await;
    let loader = ArtifactModelLoader::new(artifacts, config.generation_api_key.clone());
    let registry = ModelRegistry::new(Arc::new(loader), config.memory_budget_mb);
    for descriptor in load_manifest(&config.model_manifest)? {
        info!(
            "Registering {} model '{}' ({}, {} MB)",
            descriptor.task, descriptor.id, descriptor.version, descriptor.memory_mb
        );
        registry.register(descriptor)?;
    }
    let default_model = registry
        .descriptor(&config.default_embedding_model)
        .context("DEFAULT_EMBEDDING_MODEL is not in the model manifest")?;
    if default_model.task != TaskKind::Embedding {
        bail!(
            "DEFAULT_EMBEDDING_MODEL '{}' is a {} model",
            default_model.id,
            default_model.task
        );
    }

    // Initialize inference cache: local LRU → Redis → disk
    let cache = Arc::new(build_cache(&config)?);

    // Initialize batching, embedding and matching services
    let scheduler = BatchScheduler::new(registry.clone(), config.batch_policy());
    let embeddings = EmbeddingService::new(registry.clone(), cache.clone(), scheduler);
    let matcher = MatchEngine::new(embeddings.clone());
    let weights = match &config.weights_file {
        Some(path) => MatchWeights::from_file(path)?,
        None => MatchWeights::default(),
    };
    info!("Match weights: {weights:?}");

    spawn_idle_reaper(registry.clone(), &config);

    // Build app state
    let state = AppState {
        registry,
        embeddings,
        cache,
        matcher,
        records,
        weights,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cache(config: &Config) -> Result<InferenceCache> {
    let capacity = NonZeroUsize::new(config.cache_local_capacity)
        .context("CACHE_LOCAL_CAPACITY must be greater than zero")?;

    let mut lower: Vec<Box<dyn CacheTier>> = Vec::new();
    match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            lower.push(Box::new(RemoteTier::new(
                Arc::new(RedisKvStore::new(client)),
                config.cache_remote_prefix.clone(),
                config.cache_remote_ttl,
                config.cache_remote_timeout,
            )));
            info!("Redis cache tier enabled");
        }
        None => warn!("REDIS_URL not set; shared cache tier disabled"),
    }
    lower.push(Box::new(DiskTier::new(
        config.cache_dir.clone(),
        config.cache_disk_ttl,
    )));
    info!("Disk cache tier at {}", config.cache_dir.display());

    // Local entries never outlive the shared tier's TTL.
    let local = LocalTier::new(capacity, config.cache_remote_ttl);
    Ok(InferenceCache::new(local, lower))
}

async fn build_artifact_store(config: &Config) -> Arc<dyn ArtifactStore> {
    match &config.artifact_source {
        ArtifactSource::Fs { root } => {
            info!("Loading model artifacts from {}", root.display());
            Arc::new(FsArtifactStore::new(root.clone()))
        }
        ArtifactSource::S3 {
            bucket,
            prefix,
            endpoint,
            aws_access_key_id,
            aws_secret_access_key,
        } => {
            let client =
                build_s3_client(endpoint, aws_access_key_id, aws_secret_access_key).await;
            info!("Loading model artifacts from s3://{bucket}/{prefix}");
            Arc::new(S3ArtifactStore::new(client, bucket.clone(), prefix.clone()))
        }
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(
    endpoint: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        "compass-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}

/// Periodically unloads models that have sat idle past their threshold.
fn spawn_idle_reaper(registry: ModelRegistry, config: &Config) {
    let max_idle = config.idle_unload;
    let mut ticker = tokio::time::interval(config.reaper_interval);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            registry.release_idle(max_idle);
        }
    });
}
