//! Fluent builder for outbound JSON-over-HTTP requests.
//!
//! # Overview
//! [`RequestBuilder`] accumulates a base URL, query parameters, headers and
//! a JSON body, sends one request per call through an injected
//! [`Transport`], and returns a [`Response`] holding either the live
//! response or the captured [`Error`].
//!
//! ```no_run
//! use fluent_http::{Context, RequestBuilder};
//!
//! #[derive(serde::Deserialize)]
//! struct Post {
//!     id: u32,
//!     title: String,
//! }
//!
//! let mut client = RequestBuilder::new();
//! let posts: Vec<Post> = client
//!     .base_url("https://jsonplaceholder.typicode.com")
//!     .query("userId", "1")
//!     .get(&Context::background(), "/posts")
//!     .decode_into()?;
//! # Ok::<(), fluent_http::Error>(())
//! ```
//!
//! # Design
//! - Transport, pooling, TLS and retries belong to the `Transport`; the
//!   default is a shared blocking `ureq` agent.
//! - Non-2xx responses are errors. Their body is buffered into
//!   [`HttpError`], which chains to the [`NotOk`] sentinel.
//! - Terminal accessors on `Response` take `self`, so the body stream is
//!   read at most once and always closed.

pub mod client;
pub mod context;
pub mod error;
pub mod http;
pub mod response;
pub mod transport;

pub use client::RequestBuilder;
pub use context::{CancelHandle, Context, ContextError};
pub use error::{Error, HttpError, NotOk, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use response::Response;
pub use transport::{default_transport, Transport, UreqTransport};
