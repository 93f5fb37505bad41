/// Security headers middleware
///
/// In production every response gets the following headers. Outside
/// production the layer passes responses through untouched so local tools
/// and the browser dev server are not affected.
///
/// - `Strict-Transport-Security: max-age=31536000; includeSubDomains`
/// - `X-Content-Type-Options: nosniff`
/// - `X-Frame-Options: DENY`
/// - `X-XSS-Protection: 1; mode=block`
/// - `Content-Security-Policy: default-src 'self'`
///
/// # Example
///
/// ```no_run
/// use axum::Router;
/// use stockwatch_api::middleware::security::SecurityHeadersLayer;
///
/// let app: Router = Router::new()
///     .layer(SecurityHeadersLayer::new(true)); // true = production mode
/// ```

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    response::Response,
};
use std::task::{Context, Poll};
use tower::{Layer, Service};

const PRODUCTION_HEADERS: [(HeaderName, &str); 5] = [
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
];

/// Security headers middleware layer
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    enabled: bool,
}

impl SecurityHeadersLayer {
    /// Creates the layer; headers are only added when `enabled`
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersMiddleware {
            inner,
            enabled: self.enabled,
        }
    }
}

/// Security headers middleware service
#[derive(Clone)]
pub struct SecurityHeadersMiddleware<S> {
    inner: S,
    enabled: bool,
}

impl<S> Service<Request> for SecurityHeadersMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let future = self.inner.call(request);
        let enabled = self.enabled;

        Box::pin(async move {
            let mut response = future.await?;

            if enabled {
                let headers = response.headers_mut();
                for (name, value) in PRODUCTION_HEADERS {
                    headers.insert(name, HeaderValue::from_static(value));
                }
            }

            Ok(response)
        })
    }
}
