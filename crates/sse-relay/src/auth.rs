//! Channel authorization for the HTTP surface
//!
//! Which channels a caller may stream is decided by the embedding
//! application, not by the engine: supply a callback that inspects the
//! request and either allows it or denies it with a custom response.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Request context passed to the authorization callback
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// HTTP headers from the request
    pub headers: HeaderMap,
    /// Channels the client asked to stream
    pub channels: Vec<String>,
    /// Client IP address (from X-Forwarded-For), when known
    pub client_ip: Option<String>,
}

impl AuthRequest {
    /// Get a header value as string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the Bearer token from the Authorization header
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
    }
}

/// Callback result - `None` means allowed, `Some(Response)` means denied
pub type AuthResponse = Option<Response>;

/// Type alias for the async authorization callback
pub type AuthFn =
    Arc<dyn Fn(AuthRequest) -> Pin<Box<dyn Future<Output = AuthResponse> + Send>> + Send + Sync>;

/// Helper to create an authorization callback from a closure
pub fn auth_fn<F, Fut>(f: F) -> AuthFn
where
    F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AuthResponse> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Helper to create a simple error response
pub fn deny(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}
