//! Backend transport.
//!
//! The forwarding filter talks to backends through [`BackendTransport`] so
//! tests can swap the network for a scripted responder. The default
//! [`HyperTransport`] uses the hyper-util connection-pooling client and
//! streams both directions.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::GatewayError;

/// Sends one request to a backend.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, GatewayError>;
}

/// HTTP/1.1 client with an overall per-call deadline.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration, upstream_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            timeout: upstream_timeout,
        }
    }
}

#[async_trait]
impl BackendTransport for HyperTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let url = request.uri().to_string();
        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(response.map(|body: Incoming| Body::new(body))),
            Ok(Err(e)) => Err(GatewayError::Upstream {
                url,
                source: Box::new(e),
            }),
            Err(_) => Err(GatewayError::UpstreamTimeout {
                url,
                timeout: self.timeout,
            }),
        }
    }
}
