//! Outbound HTTP plumbing shared by the GitHub and owners clients.

use axum::http;
use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID for one inbound webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Stamps every outbound request with a correlation ID and logs its status.
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = match req.headers().get(CORRELATION_ID_HEADER) {
            Some(value) => value
                .to_str()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| CorrelationId::generate().0),
            None => extensions
                .get::<CorrelationId>()
                .map(|id| id.0.clone())
                .unwrap_or_else(|| CorrelationId::generate().0),
        };

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let method = req.method().clone();
        let url = req.url().clone();
        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => debug!(
                "[{}] {} {} -> {}",
                correlation_id,
                method,
                url.path(),
                resp.status()
            ),
            Err(err) => warn!("[{}] {} {} failed: {}", correlation_id, method, url.path(), err),
        }

        response
    }
}

pub fn create_http_client() -> ClientWithMiddleware {
    let client = Client::builder()
        .user_agent(concat!("mergegate/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());

    ClientBuilder::new(client).with(CorrelationMiddleware).build()
}
