use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    AccountRecord, AccountStore, RateLimitStore, RevocationStore, StoreError, WindowState,
    window_ms,
};

/// How often, in store time, `hit` drops logs whose windows have drained.
const SWEEP_INTERVAL_MS: i64 = 60_000;

/// Process-local store.
///
/// Same semantics as the Redis backend, but state is not shared between
/// processes. Never use it behind a load balancer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: Mutex<Windows>,
    revoked: Mutex<HashMap<String, i64>>,
    accounts: Mutex<HashMap<String, AccountRecord>>,
}

#[derive(Debug, Default)]
struct Windows {
    logs: HashMap<String, WindowLog>,
    last_sweep_ms: Option<i64>,
}

/// Accepted instants for one key, with the window they were recorded under.
#[derive(Debug)]
struct WindowLog {
    entries: VecDeque<i64>,
    window: Duration,
}

impl Windows {
    /// Drop every log that is empty once pruned. Runs at most once per
    /// `SWEEP_INTERVAL_MS`, so a churn of one-off clients cannot grow the
    /// map without bound.
    fn sweep(&mut self, now_ms: i64) {
        let due = self
            .last_sweep_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= SWEEP_INTERVAL_MS);
        if !due {
            return;
        }

        self.logs.retain(|_, log| {
            prune(&mut log.entries, now_ms, log.window);
            !log.entries.is_empty()
        });
        self.last_sweep_ms = Some(now_ms);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a window log.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.logs.len()
    }
}

fn prune(log: &mut VecDeque<i64>, now_ms: i64, window: Duration) {
    let cutoff = now_ms.saturating_sub(window_ms(window));
    while log.front().is_some_and(|&t| t <= cutoff) {
        log.pop_front();
    }
}

fn count(log: &VecDeque<i64>) -> u32 {
    u32::try_from(log.len()).unwrap_or(u32::MAX)
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: u32,
    ) -> Result<WindowState, StoreError> {
        let mut windows = self.windows.lock().await;
        windows.sweep(now_ms);

        let log = windows
            .logs
            .entry(key.to_string())
            .or_insert_with(|| WindowLog {
                entries: VecDeque::new(),
                window,
            });
        log.window = window;
        prune(&mut log.entries, now_ms, window);

        let allowed = count(&log.entries) < limit;
        if allowed {
            log.entries.push_back(now_ms);
        }

        let state = WindowState {
            allowed,
            count: count(&log.entries),
            oldest_ms: log.entries.front().copied(),
        };
        if log.entries.is_empty() {
            windows.logs.remove(key);
        }
        Ok(state)
    }

    async fn peek(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
    ) -> Result<WindowState, StoreError> {
        let mut windows = self.windows.lock().await;
        let Some(log) = windows.logs.get_mut(key) else {
            return Ok(WindowState {
                allowed: false,
                count: 0,
                oldest_ms: None,
            });
        };
        prune(&mut log.entries, now_ms, window);

        let state = WindowState {
            allowed: false,
            count: count(&log.entries),
            oldest_ms: log.entries.front().copied(),
        };
        if log.entries.is_empty() {
            windows.logs.remove(key);
        }
        Ok(state)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn revoke(&self, token_id: &str, expires_at: i64) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.lock().await;
        revoked.retain(|_, exp| *exp > now);
        if expires_at > now {
            revoked.insert(token_id.to_string(), expires_at);
        }
        Ok(())
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp();
        let revoked = self.revoked.lock().await;
        Ok(revoked.get(token_id).is_some_and(|exp| *exp > now))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.accounts.lock().await.get(email).cloned())
    }

    async fn create(&self, account: &AccountRecord) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&account.email) {
            return Ok(false);
        }
        accounts.insert(account.email.clone(), account.clone());
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_hit_accepts_up_to_limit() {
        let store = MemoryStore::new();
        for i in 1..=3 {
            let state = store.hit("k", 1_000, WINDOW, 3).await.unwrap();
            assert!(state.allowed);
            assert_eq!(state.count, i);
        }

        let state = store.hit("k", 1_001, WINDOW, 3).await.unwrap();
        assert!(!state.allowed);
        assert_eq!(state.count, 3);
        assert_eq!(state.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_entries_expire_after_window() {
        let store = MemoryStore::new();
        store.hit("k", 0, WINDOW, 1).await.unwrap();
        assert!(!store.hit("k", 59_999, WINDOW, 1).await.unwrap().allowed);
        assert!(store.hit("k", 60_000, WINDOW, 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_peek_does_not_record() {
        let store = MemoryStore::new();
        assert_eq!(store.peek("k", 0, WINDOW).await.unwrap().count, 0);

        store.hit("k", 10, WINDOW, 5).await.unwrap();
        let state = store.peek("k", 20, WINDOW).await.unwrap();
        assert_eq!(state.count, 1);
        assert!(!state.allowed);
        assert_eq!(store.peek("k", 30, WINDOW).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.hit("a", 0, WINDOW, 1).await.unwrap();
        assert!(store.hit("b", 0, WINDOW, 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_drained_windows_are_swept() {
        let store = MemoryStore::new();
        let short = Duration::from_secs(1);
        for i in 0..1_000 {
            store.hit(&format!("client-{i}"), 0, short, 5).await.unwrap();
        }
        assert_eq!(store.tracked_keys().await, 1_000);

        store.hit("late", 10_000_000, short, 5).await.unwrap();
        assert_eq!(store.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_windows() {
        let store = MemoryStore::new();
        store.hit("long", 0, Duration::from_secs(3600), 5).await.unwrap();
        store.hit("short", 0, Duration::from_secs(1), 5).await.unwrap();

        store.hit("other", 120_000, WINDOW, 5).await.unwrap();
        assert_eq!(store.tracked_keys().await, 2);
        assert_eq!(store.peek("long", 120_000, Duration::from_secs(3600)).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_peek_drops_drained_key() {
        let store = MemoryStore::new();
        store.hit("k", 0, WINDOW, 5).await.unwrap();
        assert_eq!(store.peek("k", 60_000, WINDOW).await.unwrap().count, 0);
        assert_eq!(store.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_zero_limit_leaves_no_key() {
        let store = MemoryStore::new();
        assert!(!store.hit("k", 0, WINDOW, 0).await.unwrap().allowed);
        assert_eq!(store.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_revocation() {
        let store = MemoryStore::new();
        let future = Utc::now().timestamp() + 600;

        assert!(!store.is_revoked("t1").await.unwrap());
        store.revoke("t1", future).await.unwrap();
        assert!(store.is_revoked("t1").await.unwrap());
        assert!(!store.is_revoked("t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoking_expired_token_is_noop() {
        let store = MemoryStore::new();
        store.revoke("old", Utc::now().timestamp() - 1).await.unwrap();
        assert!(!store.is_revoked("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_account_create_is_unique_per_email() {
        let store = MemoryStore::new();
        let record = AccountRecord {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
            created_at: Utc::now(),
        };

        assert!(store.create(&record).await.unwrap());
        assert!(!store.create(&AccountRecord { id: "u2".to_string(), ..record.clone() }).await.unwrap());

        let found = store.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_none());
    }
}
