//! Fluent request builder.
//!
//! # Design
//! `RequestBuilder` accumulates a base URL, query pairs, header pairs and an
//! optional JSON body through chainable `&mut self` mutators, then issues one
//! request per `get`/`post`/... call through its `Transport`. Configuration
//! outlives a call: query and headers stay until `reset`, and the pending
//! body is dropped only after a 2xx round-trip so a failed call can simply
//! be repeated.
//!
//! URL resolution has two modes. Without a base URL the path must be an
//! absolute URL and the accumulated query is appended to whatever query it
//! already carries. With a base URL the path is joined onto the base path
//! and the query is exactly the accumulated pairs; a query string inside the
//! path is dropped.
//!
//! A builder is meant for one thread at a time. Use one per thread, or a
//! fresh one per request.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::context::Context;
use crate::error::{Error, HttpError};
use crate::http::{find_header, HttpMethod, HttpRequest, HttpResponse};
use crate::response::Response;
use crate::transport::{default_transport, Transport};

const CONTENT_TYPE: &str = "Content-Type";
const APPLICATION_JSON: &str = "application/json";

type EncodeFn = dyn Fn() -> serde_json::Result<Vec<u8>> + Send;

/// Chainable builder that issues requests through a `Transport`.
pub struct RequestBuilder {
    base_url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
    pending_body: Option<Box<EncodeFn>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("base_url", &self.base_url)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("has_body", &self.pending_body.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestBuilder {
    /// Builder with no base URL, using the shared default transport.
    pub fn new() -> Self {
        Self {
            base_url: String::new(),
            query: Vec::new(),
            headers: Vec::new(),
            transport: default_transport(),
            pending_body: None,
        }
    }

    /// Sets the address relative paths are joined onto. When left empty,
    /// every path must be an absolute URL.
    pub fn base_url(&mut self, base_url: &str) -> &mut Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Appends a query parameter. Repeated keys keep every value, in order.
    pub fn query(&mut self, key: &str, value: &str) -> &mut Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Appends a header. Repeated names are sent as separate header lines.
    pub fn header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Replaces the transport, e.g. with one carrying a timeout or proxy.
    pub fn transport<T: Transport + 'static>(&mut self, transport: T) -> &mut Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Sets the value sent as a JSON body with the next request. Encoding
    /// happens at send time; an encoding failure is reported by that request.
    pub fn body<T: Serialize + Send + 'static>(&mut self, value: T) -> &mut Self {
        self.pending_body = Some(Box::new(move || serde_json::to_vec(&value)));
        self
    }

    /// Clears query parameters, headers and the pending body. The base URL
    /// and transport are kept.
    pub fn reset(&mut self) -> &mut Self {
        self.query.clear();
        self.headers.clear();
        self.pending_body = None;
        self
    }

    /// Sends a GET request for `path`. Failures are captured in the
    /// returned `Response` rather than returned directly.
    pub fn get(&mut self, ctx: &Context, path: &str) -> Response {
        self.execute(ctx, HttpMethod::Get, path)
    }

    /// Sends a POST request for `path`.
    pub fn post(&mut self, ctx: &Context, path: &str) -> Response {
        self.execute(ctx, HttpMethod::Post, path)
    }

    /// Sends a PUT request for `path`.
    pub fn put(&mut self, ctx: &Context, path: &str) -> Response {
        self.execute(ctx, HttpMethod::Put, path)
    }

    /// Sends a PATCH request for `path`.
    pub fn patch(&mut self, ctx: &Context, path: &str) -> Response {
        self.execute(ctx, HttpMethod::Patch, path)
    }

    /// Sends a DELETE request for `path`.
    pub fn delete(&mut self, ctx: &Context, path: &str) -> Response {
        self.execute(ctx, HttpMethod::Delete, path)
    }

    /// The absolute URL a request for `path` would be sent to, query string
    /// included.
    pub fn resolve_url(&self, path: &str) -> Result<String, Error> {
        if self.base_url.is_empty() {
            let mut url = parse_url(path)?;
            if !self.query.is_empty() {
                url.query_pairs_mut().extend_pairs(self.query_pairs());
            }
            return Ok(url.into());
        }

        let mut url = parse_url(&self.base_url)?;
        // The path's own query and fragment are not carried over.
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let base_path = url.path();
        let joined = format!(
            "{}/{}",
            base_path.strip_suffix('/').unwrap_or(base_path),
            path.strip_prefix('/').unwrap_or(path)
        );
        url.set_path(&joined);
        url.set_query(None);
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query_pairs());
        }
        Ok(url.into())
    }

    fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.query.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    fn execute(&mut self, ctx: &Context, method: HttpMethod, path: &str) -> Response {
        match self.round_trip(ctx, method, path) {
            Ok(response) => {
                self.pending_body = None;
                Response::from(response)
            }
            Err(err) => Response::from(err),
        }
    }

    fn round_trip(
        &self,
        ctx: &Context,
        method: HttpMethod,
        path: &str,
    ) -> Result<HttpResponse, Error> {
        let url = self.resolve_url(path)?;
        let body = self
            .pending_body
            .as_ref()
            .map(|encode| encode())
            .transpose()
            .map_err(Error::Serialization)?;

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if body.is_some() && find_header(&self.headers, CONTENT_TYPE).is_none() {
            headers.push((CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string()));
        }
        headers.extend(self.headers.iter().cloned());

        ctx.err()?;

        tracing::debug!(%method, %url, has_body = body.is_some(), "sending request");
        let request = HttpRequest {
            method,
            url: url.clone(),
            headers,
            body,
            context: ctx.clone(),
        };
        let response = self.transport.send(request).map_err(|err| {
            tracing::debug!(%method, %url, "transport error: {}", err);
            Error::Transport(err)
        })?;

        if response.is_success() {
            tracing::debug!(%method, %url, status = response.status, "request succeeded");
            return Ok(response);
        }

        let err = capture_status_error(method, url, response)?;
        tracing::warn!("Http Response error: {}", err);
        Err(err.into())
    }
}

fn parse_url(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|source| Error::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Buffers the body of a non-2xx response and closes its stream.
fn capture_status_error(
    method: HttpMethod,
    url: String,
    mut response: HttpResponse,
) -> Result<HttpError, Error> {
    let mut body = Vec::new();
    response.body.read_to_end(&mut body)?;
    Ok(HttpError {
        status_code: response.status,
        status: response.status_text,
        method,
        url,
        body,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{self, Cursor, Read};
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::context::ContextError;
    use crate::error::TransportError;

    /// Records every request and answers with queued replies. An exhausted
    /// queue echoes the request body back with status 200.
    #[derive(Default)]
    struct StubTransport {
        requests: Mutex<Vec<HttpRequest>>,
        replies: Mutex<Vec<Result<(u16, Vec<u8>), String>>>,
    }

    impl StubTransport {
        fn reply(self: Arc<Self>, status: u16, body: &str) -> Arc<Self> {
            self.replies
                .lock()
                .unwrap()
                .push(Ok((status, body.as_bytes().to_vec())));
            self
        }

        fn fail(self: Arc<Self>, message: &str) -> Arc<Self> {
            self.replies.lock().unwrap().push(Err(message.to_string()));
            self
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for StubTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let echo = request.body.clone().unwrap_or_default();
            self.requests.lock().unwrap().push(request);
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.is_empty() {
                Ok((200, echo))
            } else {
                replies.remove(0)
            };
            match reply {
                Ok((status, body)) => Ok(HttpResponse::new(
                    status,
                    Vec::new(),
                    Box::new(Cursor::new(body)),
                )),
                Err(message) => Err(message.into()),
            }
        }
    }

    fn stub() -> Arc<StubTransport> {
        Arc::new(StubTransport::default())
    }

    fn builder(transport: &Arc<StubTransport>) -> RequestBuilder {
        let mut builder = RequestBuilder::new();
        builder.transport(Arc::clone(transport));
        builder
    }

    fn ctx() -> Context {
        Context::background()
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        #[serde(rename = "userId")]
        user_id: u32,
        id: u32,
        title: String,
    }

    /// Fails to serialize: JSON object keys must be strings.
    fn unencodable() -> HashMap<(u8, u8), u8> {
        HashMap::from([((1, 2), 3)])
    }

    // --- URL resolution ---

    #[test]
    fn base_url_path_and_query_are_combined() {
        let mut b = RequestBuilder::new();
        b.base_url("https://api.example.com").query("userId", "1");
        assert_eq!(
            b.resolve_url("/posts").unwrap(),
            "https://api.example.com/posts?userId=1"
        );
    }

    #[test]
    fn absolute_path_query_is_extended() {
        let mut b = RequestBuilder::new();
        b.query("y", "2");
        assert_eq!(
            b.resolve_url("https://x.test/a?x=1").unwrap(),
            "https://x.test/a?x=1&y=2"
        );
    }

    #[test]
    fn exactly_one_slash_joins_base_and_path() {
        let mut b = RequestBuilder::new();
        b.base_url("https://api.example.com/v1/");
        assert_eq!(b.resolve_url("/posts").unwrap(), "https://api.example.com/v1/posts");
        assert_eq!(b.resolve_url("posts").unwrap(), "https://api.example.com/v1/posts");

        b.base_url("https://api.example.com/v1");
        assert_eq!(b.resolve_url("posts/1").unwrap(), "https://api.example.com/v1/posts/1");
    }

    #[test]
    fn path_query_is_dropped_when_base_is_set() {
        let mut b = RequestBuilder::new();
        b.base_url("https://api.example.com?token=abc").query("page", "2");
        assert_eq!(
            b.resolve_url("/posts?userId=1").unwrap(),
            "https://api.example.com/posts?page=2"
        );
    }

    #[test]
    fn repeated_query_keys_keep_every_value_in_order() {
        let mut b = RequestBuilder::new();
        b.base_url("https://api.example.com")
            .query("tag", "b")
            .query("id", "7")
            .query("tag", "a");
        assert_eq!(
            b.resolve_url("/search").unwrap(),
            "https://api.example.com/search?tag=b&id=7&tag=a"
        );
    }

    #[test]
    fn query_values_are_form_encoded() {
        let mut b = RequestBuilder::new();
        b.base_url("https://api.example.com").query("q", "a b&c");
        assert_eq!(
            b.resolve_url("/search").unwrap(),
            "https://api.example.com/search?q=a+b%26c"
        );
    }

    #[test]
    fn relative_path_without_base_is_invalid() {
        let b = RequestBuilder::new();
        let err = b.resolve_url("/posts").unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { ref url, .. } if url == "/posts"));
    }

    #[test]
    fn malformed_base_is_invalid() {
        let mut b = RequestBuilder::new();
        b.base_url("http://[::1");
        assert!(matches!(b.resolve_url("/posts"), Err(Error::InvalidUrl { .. })));
    }

    // --- execution ---

    #[test]
    fn malformed_path_is_captured_without_sending() {
        let transport = stub();
        let response = builder(&transport).get(&ctx(), "not a url");
        assert!(matches!(response.error(), Some(Error::InvalidUrl { .. })));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn get_sends_method_url_and_headers() {
        let transport = stub().reply(200, "[]");
        let mut b = builder(&transport);
        b.base_url("https://api.example.com")
            .query("userId", "1")
            .header("Accept", "application/json")
            .header("X-Trace", "a")
            .header("X-Trace", "b");

        let response = b.get(&ctx(), "/posts");
        assert!(response.is_ok());

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Get);
        assert_eq!(sent.url, "https://api.example.com/posts?userId=1");
        assert!(sent.body.is_none());
        assert_eq!(
            sent.headers,
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-Trace".to_string(), "a".to_string()),
                ("X-Trace".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn body_is_sent_as_json_with_default_content_type() {
        let transport = stub().reply(201, r#"{"userId":1,"id":101,"title":"foo"}"#);
        let mut b = builder(&transport);
        b.base_url("https://api.example.com").body(Post {
            user_id: 1,
            id: 0,
            title: "foo".to_string(),
        });

        let created: Post = b.post(&ctx(), "/posts").decode_into().unwrap();
        assert_eq!(created.id, 101);

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["title"], "foo");
        assert_eq!(body["userId"], 1);
    }

    #[test]
    fn explicit_content_type_is_not_overridden() {
        let transport = stub();
        let mut b = builder(&transport);
        b.header("content-type", "application/merge-patch+json")
            .body(serde_json::json!({"title": "bar"}));

        assert!(b.patch(&ctx(), "https://api.example.com/posts/1").is_ok());

        let sent = &transport.requests()[0];
        let content_types: Vec<_> = sent
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(sent.header("Content-Type"), Some("application/merge-patch+json"));
    }

    #[test]
    fn no_content_type_without_body() {
        let transport = stub();
        builder(&transport).delete(&ctx(), "https://api.example.com/posts/1");
        assert!(transport.requests()[0].header("Content-Type").is_none());
    }

    #[test]
    fn echoed_body_round_trips() {
        let transport = stub();
        let post = Post {
            user_id: 3,
            id: 9,
            title: "round trip".to_string(),
        };
        let mut b = builder(&transport);
        b.body(post.clone());
        let echoed: Post = b.put(&ctx(), "https://api.example.com/posts/9").decode_into().unwrap();
        assert_eq!(echoed, post);
    }

    #[test]
    fn not_found_is_captured_with_body() {
        let transport = stub().reply(404, r#"{"error":"not found"}"#);
        let mut b = builder(&transport);
        b.base_url("https://api.example.com");

        let response = b.get(&ctx(), "/posts/0");
        let err = response.error().unwrap();
        assert!(err.is_not_ok());

        let http = err.http_error().unwrap();
        assert_eq!(http.status_code, 404);
        assert_eq!(http.status, "404 Not Found");
        assert_eq!(http.method, HttpMethod::Get);
        assert_eq!(http.url, "https://api.example.com/posts/0");
        assert_eq!(http.body, br#"{"error":"not found"}"#);
    }

    #[test]
    fn non_2xx_codes_are_all_failures() {
        for status in [101, 199, 301, 304, 400, 500, 503] {
            let transport = stub().reply(status, "");
            let response = builder(&transport).get(&ctx(), "https://x.test/");
            let err = response.error().unwrap_or_else(|| panic!("{status} accepted"));
            assert_eq!(err.http_error().unwrap().status_code, status);
            assert!(err.http_error().unwrap().body.is_empty());
        }
        for status in [200, 201, 204, 299] {
            let transport = stub().reply(status, "");
            assert!(builder(&transport).get(&ctx(), "https://x.test/").is_ok(), "{status}");
        }
    }

    #[test]
    fn unreadable_error_body_is_an_io_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cut"))
            }
        }
        struct BrokenTransport;
        impl Transport for BrokenTransport {
            fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
                Ok(HttpResponse::new(502, Vec::new(), Box::new(Broken)))
            }
        }

        let mut b = RequestBuilder::new();
        b.transport(BrokenTransport);
        let response = b.get(&ctx(), "https://x.test/");
        assert!(matches!(response.error(), Some(Error::Io(_))));
    }

    #[test]
    fn transport_failure_keeps_pending_body_for_retry() {
        let transport = stub().fail("connection refused");
        let mut b = builder(&transport);
        b.base_url("https://api.example.com")
            .body(serde_json::json!({"title": "retry me"}));

        let first = b.post(&ctx(), "/posts");
        assert!(matches!(first.error(), Some(Error::Transport(_))));

        let second = b.post(&ctx(), "/posts");
        assert!(second.is_ok());

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, sent[1].body);
        assert!(sent[1].body.is_some());
    }

    #[test]
    fn status_failure_keeps_pending_body() {
        let transport = stub().reply(503, "busy");
        let mut b = builder(&transport);
        b.body(serde_json::json!({"n": 1}));

        assert!(b.post(&ctx(), "https://x.test/jobs").error().unwrap().is_not_ok());
        assert!(b.post(&ctx(), "https://x.test/jobs").is_ok());
        assert!(transport.requests()[1].body.is_some());
    }

    #[test]
    fn success_clears_pending_body() {
        let transport = stub();
        let mut b = builder(&transport);
        b.body(serde_json::json!({"n": 1}));

        assert!(b.post(&ctx(), "https://x.test/jobs").is_ok());
        assert!(b.post(&ctx(), "https://x.test/jobs").is_ok());

        let sent = transport.requests();
        assert!(sent[0].body.is_some());
        assert!(sent[1].body.is_none());
        assert!(sent[1].header("Content-Type").is_none());
    }

    #[test]
    fn unencodable_body_is_captured_without_sending() {
        let transport = stub();
        let mut b = builder(&transport);
        b.body(unencodable());

        let response = b.post(&ctx(), "https://x.test/");
        assert!(matches!(response.error(), Some(Error::Serialization(_))));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn reset_clears_query_headers_and_body() {
        let transport = stub();
        let mut b = builder(&transport);
        b.base_url("https://api.example.com")
            .query("userId", "1")
            .header("X-Token", "secret")
            .body(serde_json::json!({"a": 1}))
            .reset();

        assert!(b.post(&ctx(), "/posts").is_ok());

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.example.com/posts");
        assert!(sent.headers.is_empty());
        assert!(sent.body.is_none());
    }

    #[test]
    fn execution_does_not_consume_query_or_headers() {
        let transport = stub();
        let mut b = builder(&transport);
        b.base_url("https://api.example.com")
            .query("page", "1")
            .header("X-Token", "secret");

        b.get(&ctx(), "/a");
        b.get(&ctx(), "/b");

        let sent = transport.requests();
        assert_eq!(sent[1].url, "https://api.example.com/b?page=1");
        assert_eq!(sent[1].header("x-token"), Some("secret"));
    }

    #[test]
    fn canceled_context_is_a_transport_error() {
        let transport = stub();
        let ctx = Context::background();
        ctx.cancel_handle().cancel();

        let response = builder(&transport).get(&ctx, "https://x.test/");
        let err = response.error().unwrap();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.is_canceled());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn context_travels_with_the_request() {
        let transport = stub();
        let ctx = Context::with_timeout(std::time::Duration::from_secs(30));
        builder(&transport).get(&ctx, "https://x.test/");
        assert_eq!(transport.requests()[0].context.deadline(), ctx.deadline());
    }

    #[test]
    fn transport_context_errors_are_classified() {
        struct Expiring;
        impl Transport for Expiring {
            fn send(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
                Err(Box::new(ContextError::DeadlineExceeded))
            }
        }
        let mut b = RequestBuilder::new();
        b.transport(Expiring);
        assert!(b.get(&ctx(), "https://x.test/").error().unwrap().is_timeout());
    }
}
