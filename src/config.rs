//! Environment-driven configuration for the CourseFlow server.

use std::time::Duration;

/// Database pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/courseflow".to_string()),
            max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
            min_connections: env_u32("DB_MIN_CONNECTIONS", 2),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Redis connection configuration for the intake queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_host: String,
    pub redis_port: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            redis_port: env_u32("REDIS_PORT", 6379) as u16,
        }
    }
}

impl QueueConfig {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}

/// Allocator worker tuning, all overridable via environment.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub empty_backoff: Duration,
    pub error_backoff: Duration,
    pub allocation_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_millis(env_u32("QUEUE_EMPTY_BACKOFF_MS", 500) as u64),
            error_backoff: Duration::from_millis(env_u32("QUEUE_ERROR_BACKOFF_MS", 1000) as u64),
            allocation_timeout: Duration::from_secs(env_u32("ALLOCATION_TIMEOUT_SECS", 5) as u64),
        }
    }
}

pub fn server_port() -> u16 {
    std::env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse()
        .unwrap_or(8000)
}

pub fn metrics_enabled() -> bool {
    matches!(
        std::env::var("ENABLE_METRICS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
