//! Shared application state for Axum handlers.
//!
//! Holds the token codecs, the request gate, the account service and handles
//! to the backing store. Everything is `Arc`-backed and cheap to clone per
//! request.
//!
//! # Structured Concurrency
//!
//! A background task pings the store periodically so outages show up in the
//! logs before user requests hit them. Audit deliveries run on their own
//! tracker. Both are managed with `tokio_util` primitives; call `shutdown()`
//! before exit to drain them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::accounts::Accounts;
use crate::audit::AuditSink;
use crate::config::{Config, StoreBackend};
use crate::csrf::CsrfCodec;
use crate::error::{AppError, AppResult};
use crate::gate::RequestGate;
use crate::middleware::{ClientIpResolver, ProtectedRoutes, SessionGuard};
use crate::rate_limit::RateLimiter;
use crate::session::SessionCodec;
use crate::store::{AccountStore, MemoryStore, RateLimitStore, RedisStore, RevocationStore};

/// How often the background task pings the store.
const STORE_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::connect(config).await?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub csrf: CsrfCodec,
    pub sessions: SessionCodec,
    /// Rate limiting and CSRF checks for sensitive actions
    pub gate: RequestGate,
    pub accounts: Accounts,
    pub client_ip: ClientIpResolver,
    pub revocations: Arc<dyn RevocationStore>,
    pub audit: AuditSink,
    /// Timestamp when the application started
    pub started_at: Instant,
    rate_store: Arc<dyn RateLimitStore>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Open the configured backend and build the state on top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis is unreachable or the configuration is
    /// rejected by a component.
    pub async fn connect(config: Config) -> AppResult<Self> {
        match config.store_backend {
            StoreBackend::Redis => {
                let store = RedisStore::connect(
                    &config.redis_url,
                    config.redis_key_prefix.clone(),
                    config.store_timeout,
                )
                .await?;
                Self::new(config, Arc::new(store))
            }
            StoreBackend::Memory => {
                warn!("Using in-memory store; state is not shared between processes");
                Self::new(config, Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Build the state over an already-open store.
    ///
    /// Must be called from within a Tokio runtime; the store health task is
    /// spawned here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for unusable secrets or TTLs.
    pub fn new<S>(config: Config, store: Arc<S>) -> AppResult<Self>
    where
        S: RateLimitStore + RevocationStore + AccountStore + 'static,
    {
        let csrf = CsrfCodec::new(
            config.csrf_secret.expose().as_bytes(),
            config.csrf_token_ttl,
            config.secure_cookies(),
        )?;
        let sessions = SessionCodec::new(config.session_secret.expose().as_bytes(), config.session_ttl)?;

        let audit = match &config.audit_sink_url {
            Some(url) => AuditSink::http(url.clone(), config.audit_sink_token.clone(), config.audit_timeout)?,
            None => AuditSink::disabled(),
        };

        let rate_store: Arc<dyn RateLimitStore> = store.clone();
        let limiter = if config.rate_limit_enabled {
            RateLimiter::new(rate_store.clone())
        } else {
            warn!("Rate limiting disabled");
            RateLimiter::disabled(rate_store.clone())
        };
        let gate = RequestGate::new(limiter, config.rate_limits.clone(), csrf.clone(), audit.clone());

        let account_store: Arc<dyn AccountStore> = store.clone();
        let accounts = Accounts::new(account_store, config.bcrypt_cost);
        let client_ip = ClientIpResolver::new(&config.client_ip_headers);

        let state = Self {
            config: Arc::new(config),
            csrf,
            sessions,
            gate,
            accounts,
            client_ip,
            revocations: store,
            audit,
            started_at: Instant::now(),
            rate_store,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_store_health_task();

        Ok(state)
    }

    /// Session guard layer for the configured protected routes.
    pub fn session_guard(&self) -> SessionGuard {
        SessionGuard::new(
            ProtectedRoutes::new(&self.config.protected_routes),
            self.sessions.clone(),
            self.revocations.clone(),
            self.config.sign_in_path.as_str(),
        )
    }

    /// Round-trip the backing store.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` when the store does not answer.
    pub async fn ping_store(&self) -> AppResult<()> {
        self.rate_store.ping().await.map_err(AppError::from)
    }

    fn spawn_store_health_task(&self) {
        let store = self.rate_store.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(STORE_HEALTH_INTERVAL);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Store health task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.ping().await {
                            Ok(()) => trace!("Health check: store OK"),
                            Err(e) => warn!(error = %e, "Health check: store unreachable"),
                        }
                    }
                }
            }

            debug!("Store health task shutting down");
        });
    }

    /// Stop background tasks and drain pending audit deliveries.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.audit.shutdown().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
