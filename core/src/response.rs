//! The value returned by every request: a live response or a captured error.
//!
//! # Design
//! `Response` wraps a `Result<HttpResponse, Error>`, so it holds exactly one
//! of the two. The terminal accessors (`raw_bytes`, `body_stream`,
//! `decode_into`) take `self`: the body stream can be consumed once, and the
//! compiler rejects a second read. The stream is closed when the
//! `HttpResponse` holding it is dropped, which covers every exit path.

use std::io::{BufReader, Read};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::Error;
use crate::http::HttpResponse;

#[derive(Debug)]
pub struct Response {
    inner: Result<HttpResponse, Error>,
}

impl Response {
    /// The captured error, if the request failed.
    pub fn error(&self) -> Option<&Error> {
        self.inner.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.inner.is_ok()
    }

    /// Status code of the live response.
    pub fn status(&self) -> Option<u16> {
        self.inner.as_ref().ok().map(|response| response.status)
    }

    /// Headers of the live response; empty when the request failed.
    pub fn headers(&self) -> &[(String, String)] {
        match &self.inner {
            Ok(response) => &response.headers,
            Err(_) => &[],
        }
    }

    /// Reads the whole body and closes the stream.
    pub fn raw_bytes(self) -> Result<Vec<u8>, Error> {
        let mut response = self.inner?;
        let mut buf = Vec::new();
        response.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Hands the body stream to the caller, who closes it by dropping it.
    pub fn body_stream(self) -> Result<Box<dyn Read + Send>, Error> {
        self.inner.map(|response| response.body)
    }

    /// Decodes the first JSON value of the body into `T`; anything after it
    /// is left unread. The stream is closed whether or not decoding succeeds.
    pub fn decode_into<T: DeserializeOwned>(self) -> Result<T, Error> {
        let response = self.inner?;
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(response.body));
        T::deserialize(&mut de).map_err(|err| {
            if err.is_io() {
                Error::Io(err.into())
            } else {
                Error::Decode(err)
            }
        })
    }

    pub fn into_result(self) -> Result<HttpResponse, Error> {
        self.inner
    }
}

impl From<HttpResponse> for Response {
    fn from(response: HttpResponse) -> Self {
        Self { inner: Ok(response) }
    }
}

impl From<Error> for Response {
    fn from(err: Error) -> Self {
        Self { inner: Err(err) }
    }
}
