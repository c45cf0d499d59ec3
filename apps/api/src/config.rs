use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::batching::BatchPolicy;
use crate::inference::model::ModelDescriptor;

/// Where model artifacts are fetched from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    Fs {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        prefix: String,
        endpoint: String,
        aws_access_key_id: String,
        aws_secret_access_key: String,
    },
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Without it, id-based match requests are rejected.
    pub database_url: Option<String>,
    /// Without it, the shared cache tier is skipped.
    pub redis_url: Option<String>,
    pub artifact_source: ArtifactSource,
    pub model_manifest: PathBuf,
    pub weights_file: Option<PathBuf>,
    pub default_embedding_model: String,
    pub generation_api_key: String,

    pub cache_local_capacity: usize,
    pub cache_remote_prefix: String,
    pub cache_remote_ttl: Duration,
    pub cache_remote_timeout: Duration,
    pub cache_dir: PathBuf,
    pub cache_disk_ttl: Duration,

    pub batch_max_wait: Duration,
    pub batch_hard_ceiling: Duration,
    pub request_timeout: Duration,

    pub memory_budget_mb: u64,
    pub idle_unload: Duration,
    pub reaper_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let batch_max_wait = Duration::from_millis(env_or("BATCH_MAX_WAIT_MS", 50)?);
        let batch_hard_ceiling = match optional_env("BATCH_HARD_CEILING_MS") {
            Some(raw) => Duration::from_millis(parse_var("BATCH_HARD_CEILING_MS", &raw)?),
            None => batch_max_wait * 2,
        };
        if batch_hard_ceiling < batch_max_wait {
            bail!("BATCH_HARD_CEILING_MS must not be shorter than BATCH_MAX_WAIT_MS");
        }
        let reaper_interval = Duration::from_secs(env_or("MODEL_REAPER_INTERVAL_SECS", 60)?);
        if reaper_interval.is_zero() {
            bail!("MODEL_REAPER_INTERVAL_SECS must be greater than zero");
        }

        Ok(Config {
            port: env_or("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            database_url: optional_env("DATABASE_URL"),
            redis_url: optional_env("REDIS_URL"),
            artifact_source: artifact_source_from_env()?,
            model_manifest: env_or("MODEL_MANIFEST", PathBuf::from("models.json"))?,
            weights_file: optional_env("MATCH_WEIGHTS_FILE").map(PathBuf::from),
            default_embedding_model: require_env("DEFAULT_EMBEDDING_MODEL")?,
            generation_api_key: optional_env("ANTHROPIC_API_KEY").unwrap_or_default(),

            cache_local_capacity: env_or("CACHE_LOCAL_CAPACITY", 10_000)?,
            cache_remote_prefix: env_or("CACHE_REMOTE_PREFIX", "emb".to_string())?,
            cache_remote_ttl: Duration::from_secs(env_or("CACHE_REMOTE_TTL_SECS", 3_600)?),
            cache_remote_timeout: Duration::from_millis(env_or("CACHE_REMOTE_TIMEOUT_MS", 250)?),
            cache_dir: env_or("CACHE_DIR", PathBuf::from("cache"))?,
            cache_disk_ttl: Duration::from_secs(env_or("CACHE_DISK_TTL_SECS", 7 * 86_400)?),

            batch_max_wait,
            batch_hard_ceiling,
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 30)?),

            memory_budget_mb: env_or("MODEL_MEMORY_BUDGET_MB", 4_096)?,
            idle_unload: Duration::from_secs(env_or("MODEL_IDLE_UNLOAD_SECS", 900)?),
            reaper_interval,
        })
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            max_wait: self.batch_max_wait,
            hard_ceiling: self.batch_hard_ceiling,
            request_timeout: self.request_timeout,
        }
    }
}

fn artifact_source_from_env() -> Result<ArtifactSource> {
    let kind = optional_env("ARTIFACT_STORE").unwrap_or_else(|| "fs".to_string());
    match kind.as_str() {
        "fs" => Ok(ArtifactSource::Fs {
            root: env_or("ARTIFACT_DIR", PathBuf::from("artifacts"))?,
        }),
        "s3" => Ok(ArtifactSource::S3 {
            bucket: require_env("S3_BUCKET")?,
            prefix: optional_env("S3_PREFIX").unwrap_or_default(),
            endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
        }),
        other => bail!("ARTIFACT_STORE must be 'fs' or 's3', got '{other}'"),
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => parse_var(key, &raw),
        None => Ok(default),
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'"))
}

#[derive(Debug, Deserialize)]
struct ModelManifest {
    models: Vec<ModelDescriptor>,
}

/// Reads the JSON model manifest: `{"models": [<descriptor>, ...]}`.
pub fn load_manifest(path: &Path) -> Result<Vec<ModelDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model manifest {}", path.display()))?;
    let manifest: ModelManifest = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid model manifest {}", path.display()))?;
    if manifest.models.is_empty() {
        bail!("Model manifest {} registers no models", path.display());
    }
    Ok(manifest.models)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::inference::model::TaskKind;

    #[test]
    fn test_parse_var_reports_key() {
        let err = parse_var::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert_eq!(parse_var::<u64>("X", " 42 ").unwrap(), 42);
    }

    #[test]
    fn test_manifest_applies_descriptor_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"models": [
                {{"id": "minilm", "task": "embedding", "version": "v3", "artifact": "minilm.json"}},
                {{"id": "seniority", "task": "classification", "version": "v1",
                  "artifact": "seniority.json", "memory_mb": 8, "max_batch_size": 1}}
            ]}}"#
        )
        .unwrap();

        let models = load_manifest(file.path()).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].task, TaskKind::Embedding);
        assert_eq!(models[0].max_batch_size, 32);
        assert_eq!(models[1].memory_mb, 8);
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"models": []}}"#).unwrap();
        assert!(load_manifest(file.path()).is_err());
    }
}
