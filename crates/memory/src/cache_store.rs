use crate::types::ScoredId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Значение в удалённом кэше
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCacheValue {
    pub results: Vec<ScoredId>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Внешнее хранилище кэша (общее для процессов)
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<RemoteCacheValue>>;

    async fn set(&self, key: &str, value: &RemoteCacheValue, ttl: Duration) -> Result<()>;

    async fn healthcheck(&self) -> Result<()>;

    /// Удалить все ключи пространства имён; возвращает число удалённых
    async fn clear_namespace(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Например `redis://localhost:6379/0`; пусто = удалённый кэш не используется
    pub url: Option<String>,
    pub namespace: String,
    pub timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: "moonology".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Redis через multiplexed async соединение.
///
/// Соединение открывается лениво и переоткрывается после ошибки.
pub struct RedisCacheStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    namespace: String,
    timeout: Duration,
}

impl RedisCacheStore {
    pub fn new(url: &str, config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            namespace: config.namespace.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    /// `<namespace>:q:<sha256(key)>`
    pub fn full_key(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.timeout,
            self.client.get_multiplexed_tokio_connection(),
        )
        .await
        .context("Redis connect timed out")?
        .context("Redis connect failed")?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.connection.lock().await = None;
    }

    /// Выполнить команду с таймаутом; при ошибке соединение сбрасывается
    async fn query<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        let result = tokio::time::timeout(self.timeout, cmd.query_async::<_, T>(&mut conn)).await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.reset().await;
                Err(anyhow::Error::new(e).context("Redis command failed"))
            }
            Err(_) => {
                self.reset().await;
                anyhow::bail!("Redis command timed out after {:?}", self.timeout)
            }
        }
    }
}

pub fn namespaced_key(namespace: &str, key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{namespace}:q:{digest:x}")
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn name(&self) -> &str {
        "cache_store"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteCacheValue>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.full_key(key));
        let raw: Option<String> = self.query(cmd).await?;
        match raw {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    // Чужой или устаревший формат читается как промах
                    warn!(error = %e, "Undecodable cache store entry");
                    Ok(None)
                }
            },
        }
    }

    async fn set(&self, key: &str, value: &RemoteCacheValue, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key))
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1));
        let _: () = self.query(cmd).await?;
        debug!(key, ttl_secs = ttl.as_secs(), "Cache store SET");
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        let pong: String = self.query(redis::cmd("PING")).await?;
        if pong != "PONG" {
            anyhow::bail!("Unexpected PING reply: {pong}");
        }
        Ok(())
    }

    async fn clear_namespace(&self) -> Result<u64> {
        let pattern = format!("{}:q:*", self.namespace);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200);
            let (next, keys): (u64, Vec<String>) = self.query(scan).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let n: u64 = self.query(del).await?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(namespace = %self.namespace, removed, "Cache store namespace cleared");
        Ok(removed)
    }
}
