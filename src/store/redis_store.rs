use std::future::Future;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use tracing::info;
use uuid::Uuid;

use super::{
    AccountRecord, AccountStore, RateLimitStore, RevocationStore, StoreError, WindowState,
    window_ms,
};
use crate::metrics;

/// Prune, count, conditionally record, refresh expiry. Runs atomically.
///
/// Returns `{allowed, count, oldest_ms}` with `oldest_ms = -1` for an empty window.
const HIT_LUA: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  count = count + 1
  allowed = 1
end
if count > 0 then
  redis.call('PEXPIRE', key, window)
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
";

/// Read-only variant of [`HIT_LUA`].
const PEEK_LUA: &str = r"
local key = KEYS[1]
local cutoff = tonumber(ARGV[1]) - tonumber(ARGV[2])
local count = redis.call('ZCOUNT', key, '(' .. cutoff, '+inf')
local oldest = redis.call('ZRANGEBYSCORE', key, '(' .. cutoff, '+inf', 'WITHSCORES', 'LIMIT', 0, 1)
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {count, oldest_ms}
";

static HIT_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(HIT_LUA));
static PEEK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(PEEK_LUA));

/// Redis-backed store shared by every server instance.
///
/// Every round trip is bounded by `timeout`; the connection manager
/// reconnects transparently after a dropped connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisStore {
    /// Open a managed connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the URL is invalid or the server cannot be
    /// reached within `timeout`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout(format!("connect exceeded {timeout:?}")))??;

        let store = Self {
            conn,
            prefix: prefix.into(),
            timeout,
        };
        info!(prefix = %store.prefix, "Connected to Redis");
        Ok(store)
    }

    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Run a Redis future under the configured deadline.
    pub(crate) async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, fut).await;
        metrics::record_store_duration(op, started.elapsed().as_secs_f64());

        match result {
            Ok(inner) => Ok(inner?),
            Err(_) => Err(StoreError::Timeout(format!(
                "{op} exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

fn to_count(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("window count {raw}")))
}

fn to_oldest(raw: i64) -> Option<i64> {
    (raw >= 0).then_some(raw)
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u32,
    ) -> Result<WindowState, StoreError> {
        let mut conn = self.connection();
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());
        let (allowed, count, oldest): (i64, i64, i64) = self
            .bounded(
                "rate_limit_hit",
                HIT_SCRIPT
                    .key(self.key(key))
                    .arg(now_ms)
                    .arg(window_ms(window))
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(WindowState {
            allowed: allowed == 1,
            count: to_count(count)?,
            oldest_ms: to_oldest(oldest),
        })
    }

    async fn peek(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
    ) -> Result<WindowState, StoreError> {
        let mut conn = self.connection();
        let (count, oldest): (i64, i64) = self
            .bounded(
                "rate_limit_peek",
                PEEK_SCRIPT
                    .key(self.key(key))
                    .arg(now_ms)
                    .arg(window_ms(window))
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(WindowState {
            allowed: false,
            count: to_count(count)?,
            oldest_ms: to_oldest(oldest),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let reply: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!("unexpected PING reply {reply:?}")))
        }
    }
}

#[async_trait]
impl RevocationStore for RedisStore {
    async fn revoke(&self, token_id: &str, expires_at: i64) -> Result<(), StoreError> {
        let remaining = expires_at - Utc::now().timestamp();
        let Ok(ttl) = u64::try_from(remaining) else {
            return Ok(());
        };
        if ttl == 0 {
            return Ok(());
        }

        let mut conn = self.connection();
        let key = self.key(&format!("revoked:{token_id}"));
        self.bounded("revoke", conn.set_ex::<_, _, ()>(key, 1, ttl))
            .await
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let key = self.key(&format!("revoked:{token_id}"));
        self.bounded("is_revoked", conn.exists::<_, bool>(key)).await
    }
}

#[async_trait]
impl AccountStore for RedisStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        let mut conn = self.connection();
        let key = self.key(&format!("account:{email}"));
        let raw: Option<String> = self.bounded("account_get", conn.get(key)).await?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Corrupt(format!("account record: {e}")))
        })
        .transpose()
    }

    async fn create(&self, account: &AccountRecord) -> Result<bool, StoreError> {
        let json = serde_json::to_string(account)
            .map_err(|e| StoreError::Corrupt(format!("account record: {e}")))?;
        let mut conn = self.connection();
        let key = self.key(&format!("account:{}", account.email));
        self.bounded("account_create", conn.set_nx(key, json)).await
    }
}
