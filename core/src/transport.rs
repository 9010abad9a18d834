//! The transport capability and its default blocking implementation.
//!
//! # Design
//! `RequestBuilder` never touches the network itself. It hands a fully
//! resolved `HttpRequest` to a `Transport` and classifies whatever comes
//! back. Anything that can perform one round-trip can be plugged in: a
//! configured `ureq` agent, a proxying client, or a test double.
//!
//! `UreqTransport` is the default. It never turns HTTP status codes into
//! errors, so 4xx/5xx responses reach the builder as data and get classified
//! there.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use ureq::http;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Performs a single HTTP round-trip.
///
/// Implementations should honor `request.context`: refuse to start when it
/// is already done and give up once its deadline passes.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request)
    }
}

static DEFAULT_TRANSPORT: LazyLock<Arc<UreqTransport>> =
    LazyLock::new(|| Arc::new(UreqTransport::new()));

/// Process-wide transport used by builders that were not given one.
pub fn default_transport() -> Arc<dyn Transport> {
    DEFAULT_TRANSPORT.clone()
}

/// Blocking transport backed by a `ureq` agent.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::from_agent(
            ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build()
                .new_agent(),
        )
    }

    /// Transport whose requests each give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Wraps an existing agent. The agent must be built with
    /// `http_status_as_error(false)`, otherwise non-2xx responses surface as
    /// transport errors instead of status errors.
    pub fn from_agent(agent: ureq::Agent) -> Self {
        Self {
            agent,
            timeout: None,
        }
    }

    /// Tighter of the configured timeout and the context's remaining time.
    fn limit_for(&self, request: &HttpRequest) -> Option<Duration> {
        match (self.timeout, request.context.remaining()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Runs one request on the wrapped agent, capping just this call at
    /// `limit` so the agent's own settings and connection pool still apply.
    fn run<S: ureq::AsSendBody>(
        &self,
        request: http::Request<S>,
        limit: Option<Duration>,
    ) -> Result<http::Response<ureq::Body>, ureq::Error> {
        let request = match limit {
            None => request,
            Some(limit) => self
                .agent
                .configure_request(request)
                .timeout_global(Some(limit))
                .build(),
        };
        self.agent.run(request)
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        request.context.err()?;
        let limit = self.limit_for(&request);

        let mut builder = http::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = match request.body {
            Some(body) => self.run(builder.body(body)?, limit),
            None => self.run(builder.body(())?, limit),
        };
        let response = response.map_err(|err| match (err, request.context.err()) {
            // A timeout caused by the context deadline is reported as such.
            (ureq::Error::Timeout(_), Err(ctx_err)) => TransportError::from(ctx_err),
            (err, _) => TransportError::from(err),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.into_body().into_reader();

        Ok(HttpResponse::new(status, headers, Box::new(body)))
    }
}
