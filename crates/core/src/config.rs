use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub postgres: PostgresConfig,
    pub jobs: JobsConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CONDUIT_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CONDUIT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            jobs: JobsConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:     data_dir={}", self.storage.data_dir.display());
        tracing::info!("  aws:         region={}, bucket={}", self.aws.region, self.aws.s3_bucket.as_deref().unwrap_or("(none)"));
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  jobs:        poll={}ms, batch={}, error_log_cap={}",
            self.jobs.poll_interval_ms, self.jobs.batch_size, self.jobs.max_error_log
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a multipart import upload.
    pub max_upload_mb: u32,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8080),
            max_upload_mb: profiled_env_u32(p, "MAX_UPLOAD_MB", 512),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the local blob backend used when S3 is not configured.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            s3_bucket: profiled_env_opt(p, "S3_BUCKET"),
            s3_prefix: profiled_env_opt(p, "S3_PREFIX"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.s3_bucket.is_some()
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; when set it overrides the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "conduit"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

// ── Jobs ──────────────────────────────────────────────────────

/// Tunables for the dispatcher and the import/export pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    /// Records accumulated before a user/comment batch is flushed.
    pub batch_size: usize,
    /// Failures beyond this count are still counted but not written to the report.
    pub max_error_log: u64,
    /// Longest single record a decoder will buffer.
    pub max_record_bytes: usize,
    pub batch_retry_attempts: u32,
    /// Backoff step between batch retries; attempt `n` waits `n * step`.
    pub batch_retry_backoff_ms: u64,
    pub result_url_ttl_secs: u64,
    pub error_url_ttl_secs: u64,
    /// Rows between progress log lines.
    pub progress_interval: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 1000,
            max_error_log: 1000,
            max_record_bytes: 10 * 1024 * 1024,
            batch_retry_attempts: 3,
            batch_retry_backoff_ms: 100,
            result_url_ttl_secs: 3600,
            error_url_ttl_secs: 900,
            progress_interval: 5000,
        }
    }
}

impl JobsConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            poll_interval_ms: profiled_env_u64(p, "JOB_POLL_INTERVAL_MS", d.poll_interval_ms),
            batch_size: profiled_env_u64(p, "IMPORT_BATCH_SIZE", d.batch_size as u64).max(1) as usize,
            max_error_log: profiled_env_u64(p, "MAX_ERROR_LOG", d.max_error_log),
            max_record_bytes: profiled_env_u64(p, "MAX_RECORD_BYTES", d.max_record_bytes as u64) as usize,
            batch_retry_attempts: profiled_env_u32(p, "BATCH_RETRY_ATTEMPTS", d.batch_retry_attempts).max(1),
            batch_retry_backoff_ms: profiled_env_u64(p, "BATCH_RETRY_BACKOFF_MS", d.batch_retry_backoff_ms),
            result_url_ttl_secs: profiled_env_u64(p, "RESULT_URL_TTL_SECS", d.result_url_ttl_secs),
            error_url_ttl_secs: profiled_env_u64(p, "ERROR_URL_TTL_SECS", d.error_url_ttl_secs),
            progress_interval: profiled_env_u64(p, "PROGRESS_INTERVAL", d.progress_interval).max(1),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_url_ttl(&self) -> Duration {
        Duration::from_secs(self.result_url_ttl_secs)
    }

    pub fn error_url_ttl(&self) -> Duration {
        Duration::from_secs(self.error_url_ttl_secs)
    }
}
