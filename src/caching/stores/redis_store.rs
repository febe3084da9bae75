//! # Redis Cache Store
//!
//! Redis backend built on the multiplexed `ConnectionManager`. Connecting
//! retries with a capped linear backoff, every command runs under a timeout and
//! a background ping keeps the readiness flag in step with the server.

use super::KeyValueBackend;
use crate::caching::{CacheError, CacheResult};
use crate::core::config::RedisConfig;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError, RedisResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Keys deleted per DEL command during pattern purges
const DELETE_BATCH_SIZE: usize = 500;

/// Redis cache backend
pub struct RedisBackend {
    /// Multiplexed connection, cheap to clone per command
    connection: ConnectionManager,

    /// Flipped by command failures and the health monitor
    ready: Arc<AtomicBool>,

    /// Per-command timeout
    operation_timeout: Duration,

    /// Failed or timed-out commands
    connection_errors: AtomicU64,

    /// Background ping task
    health_task: JoinHandle<()>,
}

impl RedisBackend {
    /// Connect to Redis, retrying up to `max_retries` times
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let url = config.connection_url().map_err(|e| CacheError::Configuration {
            message: e.to_string(),
        })?;
        let client = Client::open(url.as_str())?;

        let mut attempt: u32 = 0;
        let connection = loop {
            attempt += 1;

            match tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client.clone())).await {
                Ok(Ok(connection)) => break connection,
                Ok(Err(e)) => warn!("Redis connection attempt {} failed: {}", attempt, e),
                Err(_) => warn!(
                    "Redis connection attempt {} timed out after {:?}",
                    attempt, config.connect_timeout
                ),
            }

            if attempt > config.max_retries {
                error!(
                    "Giving up on Redis at {}:{} after {} attempts",
                    config.host, config.port, attempt
                );
                return Err(CacheError::Unavailable);
            }

            tokio::time::sleep(config.retry_delay(attempt)).await;
        };

        info!("Redis connected to {}:{} (db {})", config.host, config.port, config.db);

        let ready = Arc::new(AtomicBool::new(true));
        let health_task = spawn_health_monitor(
            connection.clone(),
            ready.clone(),
            config.health_check_interval,
            config.operation_timeout,
        );

        Ok(Self {
            connection,
            ready,
            operation_timeout: config.operation_timeout,
            connection_errors: AtomicU64::new(0),
            health_task,
        })
    }

    /// Number of failed or timed-out commands since connecting
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    /// Run one command under the operation timeout, tracking connection health
    async fn execute<T, F>(&self, operation: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                if is_connection_error(&e) && self.ready.swap(false, Ordering::Relaxed) {
                    warn!("Redis connection lost: {}", e);
                }
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Timeout)
            }
        }
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut all_keys = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .execute(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(1000)
                        .query_async(&mut conn),
                )
                .await?;

            all_keys.extend(keys);

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        // SCAN may return a key more than once
        all_keys.sort_unstable();
        all_keys.dedup();
        Ok(all_keys)
    }
}

impl Drop for RedisBackend {
    fn drop(&mut self) {
        self.health_task.abort();
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

fn spawn_health_monitor(
    connection: ConnectionManager,
    ready: Arc<AtomicBool>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let mut conn = connection.clone();
            let ping_cmd = redis::cmd("PING");
            let ping = ping_cmd.query_async::<_, String>(&mut conn);
            let healthy = matches!(tokio::time::timeout(timeout, ping).await, Ok(Ok(ref pong)) if pong == "PONG");

            let was_ready = ready.swap(healthy, Ordering::Relaxed);
            match (was_ready, healthy) {
                (false, true) => info!("Redis connection is ready again"),
                (true, false) => warn!("Redis health check failed, marking store unavailable"),
                _ => {}
            }
        }
    })
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value = self.execute(conn.get::<_, Option<Vec<u8>>>(key)).await?;

        debug!("Redis {} for key: {}", if value.is_some() { "hit" } else { "miss" }, key);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();

        match ttl {
            Some(ttl) => {
                self.execute(conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)))
                    .await?
            }
            None => self.execute(conn.set::<_, _, ()>(key, value)).await?,
        }

        debug!("Set Redis key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.scan_keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let mut deleted: u64 = 0;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            deleted += self.execute(conn.del::<_, u64>(batch)).await?;
        }

        debug!("Deleted {} Redis keys matching {}", deleted, pattern);
        Ok(deleted)
    }
}
