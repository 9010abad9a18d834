//! Error types for the fluent request builder.
//!
//! # Design
//! Every failure a request can hit is captured as an [`Error`] inside the
//! returned [`Response`](crate::Response); nothing is raised across the
//! builder/response boundary. Non-2xx responses become [`HttpError`], whose
//! error source is the [`NotOk`] sentinel. Callers that only care about the
//! category check [`Error::is_not_ok`]; callers that need the status code or
//! body reach for [`Error::http_error`].

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::context::ContextError;
use crate::http::HttpMethod;

/// Native error of a transport implementation.
pub type TransportError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors captured by `RequestBuilder` and surfaced by `Response`.
#[derive(Debug, Error)]
pub enum Error {
    /// The base URL or the request path could not be parsed.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The configured body could not be encoded as JSON.
    #[error("failed to encode request body: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The transport failed before a response arrived, including
    /// cancellation and deadlines.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// The server answered outside the 2xx range.
    #[error("{0}")]
    Status(#[from] HttpError),

    /// The response body does not match the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error chain contains [`NotOk`], i.e. the server replied
    /// with a non-2xx status.
    pub fn is_not_ok(&self) -> bool {
        self.find_source::<NotOk>().is_some()
    }

    /// The status error, if this is one.
    pub fn http_error(&self) -> Option<&HttpError> {
        self.find_source::<HttpError>()
    }

    /// True when the request was abandoned because its context was canceled.
    pub fn is_canceled(&self) -> bool {
        self.find_source::<ContextError>() == Some(&ContextError::Canceled)
    }

    /// True when the request ran past its context deadline, either before
    /// dispatch or inside the transport.
    pub fn is_timeout(&self) -> bool {
        self.find_source::<ContextError>() == Some(&ContextError::DeadlineExceeded)
    }

    fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Error::Transport(Box::new(err))
    }
}

/// Category shared by every non-2xx response, independent of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status code")]
pub struct NotOk;

/// A response outside the 2xx range, with its body buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status_code: u16,
    /// Status line text, e.g. `"404 Not Found"`.
    pub status: String,
    pub method: HttpMethod,
    /// The resolved absolute URL the request was sent to.
    pub url: String,
    /// Full response body; may be empty.
    pub body: Vec<u8>,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{} {}: {}", self.method, self.url, self.status)
        } else {
            write!(
                f,
                "{} {}: {}: {}",
                self.method,
                self.url,
                self.status,
                String::from_utf8_lossy(&self.body)
            )
        }
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&NotOk)
    }
}
