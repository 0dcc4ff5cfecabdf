//! Security audit event delivery.
//!
//! Rejections and authentication failures are forwarded to an external
//! collector when `AUDIT_SINK_URL` is configured. Delivery is best effort:
//!
//! - Each event is POSTed as JSON on its own background task, tracked by a
//!   `TaskTracker` so shutdown can drain in-flight deliveries.
//! - Requests are bounded by `AUDIT_TIMEOUT_SECS` (default 10 s).
//! - Failures are logged at `debug` and counted; they never block or fail
//!   the user-facing request.
//!
//! With no URL configured, events are only logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::Secret;
use crate::error::{AppError, AppResult};
use crate::metrics;

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    RateLimited,
    CsrfRejected,
    AuthFailed,
    SignedOut,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub kind: AuditKind,
    /// Operation label, e.g. `sign-in`
    pub action: &'static str,
    pub client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, action: &'static str, client_ip: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            client_ip: client_ip.into(),
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

struct Delivery {
    client: Client,
    url: String,
    token: Option<Secret>,
}

/// Fire-and-forget audit sink.
#[derive(Clone)]
pub struct AuditSink {
    delivery: Option<Arc<Delivery>>,
    tracker: TaskTracker,
}

impl AuditSink {
    /// Sink that only logs.
    pub fn disabled() -> Self {
        Self {
            delivery: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Sink that POSTs events to `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the HTTP client cannot be built.
    pub fn http(url: impl Into<String>, token: Option<Secret>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("skygate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to create audit HTTP client: {e}")))?;

        Ok(Self {
            delivery: Some(Arc::new(Delivery {
                client,
                url: url.into(),
                token,
            })),
            tracker: TaskTracker::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.delivery.is_some()
    }

    /// Number of deliveries still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Record an event. Returns immediately.
    pub fn emit(&self, event: AuditEvent) {
        debug!(kind = ?event.kind, action = event.action, client_ip = %event.client_ip, "Audit event");

        let Some(delivery) = self.delivery.clone() else {
            return;
        };

        self.tracker.spawn(async move {
            let mut request = delivery.client.post(&delivery.url).json(&event);
            if let Some(token) = &delivery.token {
                request = request.bearer_auth(token.expose());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    metrics::record_audit_delivery_failure();
                    debug!(status = %response.status(), "Audit sink rejected event");
                }
                Err(e) => {
                    metrics::record_audit_delivery_failure();
                    debug!(error = %e, "Audit event delivery failed");
                }
            }
        });
    }

    /// Stop accepting tracked work and wait for pending deliveries.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(pending = self.tracker.len(), "Waiting for audit deliveries");
        }
        self.tracker.wait().await;
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("enabled", &self.is_enabled())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(AuditKind::RateLimited, "sign-in", "1.2.3.4").with_detail("limit 5");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["action"], "sign-in");
        assert_eq!(json["clientIp"], "1.2.3.4");
        assert_eq!(json["detail"], "limit 5");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_disabled_sink_spawns_nothing() {
        let sink = AuditSink::disabled();
        sink.emit(AuditEvent::new(AuditKind::AuthFailed, "sign-in", "1.2.3.4"));
        assert_eq!(sink.pending(), 0);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_http_sink_delivers_with_bearer_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/events",
            post(move |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    tx.send((auth, body)).unwrap();
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let sink = AuditSink::http(
            format!("http://{addr}/events"),
            Some(Secret::new("audit-token")),
            Duration::from_secs(5),
        )
        .unwrap();
        sink.emit(AuditEvent::new(AuditKind::CsrfRejected, "sign-up", "10.0.0.1"));
        sink.shutdown().await;

        let (auth, body) = rx.recv().await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer audit-token"));
        assert_eq!(body["kind"], "csrf_rejected");
    }

    #[tokio::test]
    async fn test_unreachable_sink_does_not_error() {
        let sink = AuditSink::http("http://127.0.0.1:1/events", None, Duration::from_millis(200)).unwrap();
        sink.emit(AuditEvent::new(AuditKind::AuthFailed, "sign-in", "1.2.3.4"));
        sink.shutdown().await;
        assert_eq!(sink.pending(), 0);
    }
}
