//! Configuration for the Themis judge worker.

use std::env;
use std::path::PathBuf;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (development, staging, production)
    pub environment: String,

    /// PostgreSQL connection URL
    pub database_url: String,

    /// Prometheus metrics port
    pub metrics_port: u16,

    /// Worker pool sizing and intake cadence
    pub pool: PoolConfig,

    /// Workspace storage
    pub storage: StorageConfig,

    /// Execution limits
    pub execution: ExecutionConfig,
}

/// Worker pool and admission queue sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent judging runs ceiling
    pub workers: usize,

    /// Bounded admission queue capacity; intake backs off when full
    pub queue_capacity: usize,

    /// Pending-submission poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Max submissions fetched per poll
    pub intake_batch: i64,
}

/// Workspace storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for per-run workspaces
    pub workspaces_path: PathBuf,
}

/// Execution limit configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Default per-case time limit in milliseconds
    pub default_time_limit_ms: u64,

    /// Default per-case memory limit in MB
    pub default_memory_limit_mb: u64,

    /// Memory ceiling for compile containers in MB
    pub compile_memory_limit_mb: u64,

    /// Process-count ceiling inside a container
    pub max_pids: u32,

    /// Captured output cap in bytes
    pub output_limit_bytes: usize,

    /// Grace buffer past the wall limit before the host-side kill (ms)
    pub kill_grace_ms: u64,

    /// CPU quota per container
    pub cpus: f64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            metrics_port: env::var("METRICS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9091),
            pool: PoolConfig {
                workers: env::var("JUDGE_WORKERS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4),
                queue_capacity: env::var("JUDGE_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(64),
                poll_interval_ms: env::var("POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
                intake_batch: env::var("INTAKE_BATCH")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(16),
            },
            storage: StorageConfig {
                workspaces_path: PathBuf::from(
                    env::var("WORKSPACES_PATH").unwrap_or_else(|_| "/tmp/themis".to_string()),
                ),
            },
            execution: ExecutionConfig {
                default_time_limit_ms: env::var("DEFAULT_TIME_LIMIT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
                default_memory_limit_mb: env::var("DEFAULT_MEMORY_LIMIT_MB")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(256),
                compile_memory_limit_mb: env::var("COMPILE_MEMORY_LIMIT_MB")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(512),
                max_pids: env::var("MAX_PIDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(64),
                output_limit_bytes: env::var("OUTPUT_LIMIT_BYTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(64 * 1024),
                kill_grace_ms: env::var("KILL_GRACE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
                cpus: env::var("SANDBOX_CPUS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1.0),
            },
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_time_limit_ms: 1000,
            default_memory_limit_mb: 256,
            compile_memory_limit_mb: 512,
            max_pids: 64,
            output_limit_bytes: 64 * 1024,
            kill_grace_ms: 1000,
            cpus: 1.0,
        }
    }
}
