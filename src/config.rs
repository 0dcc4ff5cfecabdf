//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production (`APP_ENV=production`), configure via
//! environment variables or a `.env` file; both signing secrets become mandatory.
//!
//! # Security Configuration
//!
//! - `CSRF_SECRET`: HMAC key for anti-forgery tokens (>= 32 bytes in production)
//! - `SESSION_SECRET`: HS256 key for session tokens (>= 32 bytes in production)
//! - `PROTECTED_ROUTES`: Comma-separated route patterns gated by the session guard
//! - `CLIENT_IP_HEADERS`: Proxy headers consulted, in order, for the client identity
//!
//! # Rate Limiting
//!
//! Each named policy can be tuned independently:
//!
//! - `RATE_LIMIT_SIGN_IN_MAX` / `RATE_LIMIT_SIGN_IN_WINDOW_SECS` (default: 5 / 900)
//! - `RATE_LIMIT_SIGN_UP_MAX` / `RATE_LIMIT_SIGN_UP_WINDOW_SECS` (default: 3 / 3600)
//! - `RATE_LIMIT_GENERAL_AUTH_MAX` / `RATE_LIMIT_GENERAL_AUTH_WINDOW_SECS` (default: 10 / 900)
//! - `RATE_LIMIT_CSRF_MAX` / `RATE_LIMIT_CSRF_WINDOW_SECS` (default: 20 / 900)

use std::env;
use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::rate_limit::{RateLimitPolicies, RateLimitRule};

/// Minimum secret length accepted in production.
pub const MIN_SECRET_LEN: usize = 32;

/// A secret value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a random per-process secret (development only).
    pub fn random() -> Self {
        let bytes: [u8; 48] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Which backend holds rate-limit windows, the session blacklist and accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Shared Redis instance; required when running more than one process.
    Redis,
    /// Process-local maps. Development and tests only.
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}' (expected redis|memory)")),
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// `APP_ENV=production` turns on secure cookies and strict secret checks
    pub production: bool,

    // =========================================================================
    // Store Configuration
    // =========================================================================
    pub store_backend: StoreBackend,

    /// Redis connection URL (default: "redis://127.0.0.1:6379")
    pub redis_url: String,

    /// Prefix for every key written to Redis (default: "skygate")
    pub redis_key_prefix: String,

    /// Upper bound for a single store round trip (default: 2s)
    pub store_timeout: Duration,

    // =========================================================================
    // Token Configuration
    // =========================================================================
    pub csrf_secret: Secret,

    /// CSRF token lifetime, also used as the cookie max-age (default: 1h)
    pub csrf_token_ttl: Duration,

    pub session_secret: Secret,

    /// Session token lifetime (default: 24h)
    pub session_ttl: Duration,

    // =========================================================================
    // Route Protection
    // =========================================================================
    /// Route patterns that require a valid session.
    /// Supports exact paths, `:param` segments and a trailing `*`.
    pub protected_routes: Vec<String>,

    /// Where unauthenticated visitors are sent (default: "/sign-in")
    pub sign_in_path: String,

    /// Where a successful sign-in lands (default: "/")
    pub after_sign_in_path: String,

    /// Headers consulted, in priority order, to resolve the client identity
    pub client_ip_headers: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Set to false to disable rate limiting entirely (default: true)
    pub rate_limit_enabled: bool,

    pub rate_limits: RateLimitPolicies,

    // =========================================================================
    // Accounts
    // =========================================================================
    /// bcrypt work factor (default: 12)
    pub bcrypt_cost: u32,

    // =========================================================================
    // HTTP Limits
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Maximum request body size in bytes (default: 64KB, forms are small)
    pub max_request_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// External log sink for security events (optional)
    pub audit_sink_url: Option<String>,

    pub audit_sink_token: Option<Secret>,

    /// Delivery deadline for a single audit event (default: 10s)
    pub audit_timeout: Duration,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let production = env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            production,

            store_backend: Self::parse_env("STORE_BACKEND", StoreBackend::Redis)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| "skygate".to_string()),
            store_timeout: Duration::from_millis(Self::parse_env("STORE_TIMEOUT_MS", 2000)?),

            csrf_secret: Self::load_secret("CSRF_SECRET", production)?,
            csrf_token_ttl: Duration::from_secs(Self::parse_env("CSRF_TOKEN_TTL_SECS", 3600)?),
            session_secret: Self::load_secret("SESSION_SECRET", production)?,
            session_ttl: Duration::from_secs(Self::parse_env("SESSION_TTL_SECS", 86_400)?),

            protected_routes: Self::parse_list(
                "PROTECTED_ROUTES",
                "/api/session,/dashboard/*,/bookings/*,/flights/new,/flights/:id/edit,/chat/*",
            ),
            sign_in_path: env::var("SIGN_IN_PATH").unwrap_or_else(|_| "/sign-in".to_string()),
            after_sign_in_path: env::var("AFTER_SIGN_IN_PATH")
                .unwrap_or_else(|_| "/".to_string()),
            client_ip_headers: Self::parse_list(
                "CLIENT_IP_HEADERS",
                "x-forwarded-for,x-real-ip,cf-connecting-ip,x-client-ip",
            )
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect(),

            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", true)?,
            rate_limits: Self::load_rate_limits()?,

            bcrypt_cost: Self::parse_env("BCRYPT_COST", 12)?,

            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 64 * 1024)?,

            audit_sink_url: env::var("AUDIT_SINK_URL").ok().filter(|u| !u.is_empty()),
            audit_sink_token: env::var("AUDIT_SINK_TOKEN")
                .ok()
                .filter(|t| !t.is_empty())
                .map(Secret::new),
            audit_timeout: Duration::from_secs(Self::parse_env("AUDIT_TIMEOUT_SECS", 10)?),
            log_format: Self::log_format_from_env(),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.csrf_token_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "CSRF_TOKEN_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.session_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "SESSION_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.csrf_secret.is_empty() || self.session_secret.is_empty() {
            return Err(AppError::ConfigError(
                "CSRF_SECRET and SESSION_SECRET must not be empty".to_string(),
            ));
        }

        if self.production
            && (self.csrf_secret.len() < MIN_SECRET_LEN
                || self.session_secret.len() < MIN_SECRET_LEN)
        {
            return Err(AppError::ConfigError(format!(
                "CSRF_SECRET and SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes in production"
            )));
        }

        if self.production && self.store_backend == StoreBackend::Memory {
            return Err(AppError::ConfigError(
                "STORE_BACKEND=memory is not allowed in production".to_string(),
            ));
        }

        if !self.sign_in_path.starts_with('/') || !self.after_sign_in_path.starts_with('/') {
            return Err(AppError::ConfigError(
                "SIGN_IN_PATH and AFTER_SIGN_IN_PATH must start with '/'".to_string(),
            ));
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(AppError::ConfigError(format!(
                "BCRYPT_COST must be between 4 and 31, got {}",
                self.bcrypt_cost
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        for rule in self.rate_limits.iter() {
            if rule.max_requests == 0 || rule.window.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "rate limit policy '{}' needs a positive max and window",
                    rule.name
                )));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Cookies carry the `Secure` attribute only in production.
    pub fn secure_cookies(&self) -> bool {
        self.production
    }

    /// Check if audit events are shipped to an external sink.
    pub fn audit_enabled(&self) -> bool {
        self.audit_sink_url.is_some()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Read a signing secret. Production refuses to start without one;
    /// development falls back to a random per-process secret.
    fn load_secret(name: &str, production: bool) -> AppResult<Secret> {
        match env::var(name).ok().filter(|s| !s.is_empty()) {
            Some(value) => Ok(Secret::new(value)),
            None if production => Err(AppError::ConfigError(format!(
                "{name} must be set in production"
            ))),
            None => {
                warn!(
                    variable = name,
                    "Secret not set, using a random per-process value (tokens will not survive restarts)"
                );
                Ok(Secret::random())
            }
        }
    }

    fn load_rate_limits() -> AppResult<RateLimitPolicies> {
        let defaults = RateLimitPolicies::default();
        let load = |prefix: &str, rule: RateLimitRule| -> AppResult<RateLimitRule> {
            let max = Self::parse_env(&format!("RATE_LIMIT_{prefix}_MAX"), rule.max_requests)?;
            let window = Self::parse_env(
                &format!("RATE_LIMIT_{prefix}_WINDOW_SECS"),
                rule.window.as_secs(),
            )?;
            Ok(RateLimitRule {
                max_requests: max,
                window: Duration::from_secs(window),
                ..rule
            })
        };

        Ok(RateLimitPolicies {
            sign_in: load("SIGN_IN", defaults.sign_in)?,
            sign_up: load("SIGN_UP", defaults.sign_up)?,
            general_auth: load("GENERAL_AUTH", defaults.general_auth)?,
            csrf: load("CSRF", defaults.csrf)?,
        })
    }

    /// Read `LOG_FORMAT` alone, so logging can start before the full config loads.
    pub fn log_format_from_env() -> LogFormat {
        match env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Default configuration for testing and development.
///
/// Uses the in-memory store and fixed development secrets.
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            production: false,
            store_backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_key_prefix: "skygate".to_string(),
            store_timeout: Duration::from_secs(2),
            csrf_secret: Secret::new("development-csrf-secret-change-me-0123456789"),
            csrf_token_ttl: Duration::from_secs(3600),
            session_secret: Secret::new("development-session-secret-change-me-012345"),
            session_ttl: Duration::from_secs(86_400),
            protected_routes: vec![
                "/api/session".to_string(),
                "/dashboard/*".to_string(),
                "/bookings/*".to_string(),
                "/flights/new".to_string(),
                "/flights/:id/edit".to_string(),
                "/chat/*".to_string(),
            ],
            sign_in_path: "/sign-in".to_string(),
            after_sign_in_path: "/".to_string(),
            client_ip_headers: vec![
                "x-forwarded-for".to_string(),
                "x-real-ip".to_string(),
                "cf-connecting-ip".to_string(),
                "x-client-ip".to_string(),
            ],
            rate_limit_enabled: true,
            rate_limits: RateLimitPolicies::default(),
            bcrypt_cost: 12,
            cors_allowed_origins: vec!["*".to_string()],
            max_request_body_size: 64 * 1024,
            audit_sink_url: None,
            audit_sink_token: None,
            audit_timeout: Duration::from_secs(10),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.csrf_token_ttl, Duration::from_secs(3600));
        assert_eq!(config.rate_limits.sign_in.max_requests, 5);
        assert_eq!(config.audit_timeout, Duration::from_secs(10));
        assert!(!config.secure_cookies());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("super-secret-value");
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("super-secret-value"));

        let config = Config::default();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("development-csrf-secret"));
    }

    #[test]
    fn test_random_secret_is_long_enough() {
        let a = Secret::random();
        let b = Secret::random();
        assert!(a.len() >= MIN_SECRET_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_short_secret_in_production() {
        let config = Config {
            production: true,
            store_backend: StoreBackend::Redis,
            csrf_secret: Secret::new("short"),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_validate_rejects_memory_store_in_production() {
        let config = Config {
            production: true,
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("STORE_BACKEND"));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = Config {
            csrf_token_ttl: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("CSRF_TOKEN_TTL_SECS"));
    }

    #[test]
    fn test_validate_rejects_empty_rate_limit_rule() {
        let mut config = Config::default();
        config.rate_limits.sign_up.max_requests = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sign-up"));
    }

    #[test]
    fn test_validate_bcrypt_cost_bounds() {
        let config = Config {
            bcrypt_cost: 3,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!(" Memory ".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }
}
