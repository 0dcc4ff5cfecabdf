//! Shared state stores.
//!
//! Rate-limit windows, the session blacklist and accounts live outside the
//! process so that every server instance sees the same state. Two backends
//! exist:
//!
//! - [`RedisStore`]: production backend. Sliding windows are sorted sets
//!   updated by a single Lua script, so concurrent servers race only inside
//!   Redis, which executes the script atomically.
//! - [`MemoryStore`]: process-local maps with identical semantics, used for
//!   development and tests.
//!
//! # Failure Semantics
//!
//! Store calls return [`StoreError`] rather than deciding policy. Callers
//! choose: the rate limiter fails open, the session guard fails closed.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Errors raised by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store returned unexpected data: {0}")]
    Corrupt(String),
}

/// Snapshot of a sliding window after (or instead of) recording a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether the request was recorded. Always `false` for [`RateLimitStore::peek`].
    pub allowed: bool,
    /// Accepted requests inside the trailing window, including this one if allowed.
    pub count: u32,
    /// Oldest accepted instant still inside the window (Unix ms).
    pub oldest_ms: Option<i64>,
}

/// Sliding-window request log keyed by an opaque string.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically drop entries older than `window`, and record `now_ms` if
    /// fewer than `limit` remain.
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u32,
    ) -> Result<WindowState, StoreError>;

    /// Count entries inside the window without recording anything.
    async fn peek(&self, key: &str, now_ms: i64, window: Duration)
    -> Result<WindowState, StoreError>;

    /// Connectivity check used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Revoked session token identifiers.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Revoke `token_id` until `expires_at` (Unix seconds). Already-expired
    /// tokens need no entry.
    async fn revoke(&self, token_id: &str, expires_at: i64) -> Result<(), StoreError>;

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError>;
}

/// A stored user account. `email` is already normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// User accounts keyed by normalized email.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Insert `account` unless the email is taken. Returns `false` on conflict.
    async fn create(&self, account: &AccountRecord) -> Result<bool, StoreError>;
}

fn window_ms(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}
