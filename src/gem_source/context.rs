use anyhow::{Context, Result};
use bytes::Bytes;
use rama::http::{
    HeaderMap, HeaderValue, Method, StatusCode,
    header::{self, HeaderName},
};

use super::env::{QueryParams, RequestEnv};

/// A complete response produced by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Result of a step that may end the request early.
#[derive(Debug)]
pub enum Flow<T> {
    Continue(T),
    Halt(Reply),
}

/// The slice of request/response handling a source is allowed to touch.
///
/// Borrows the request for one request's lifetime and accumulates response
/// headers until the source produces its [`Reply`].
pub struct SourceContext<'a> {
    env: &'a RequestEnv,
    headers: HeaderMap,
}

impl<'a> SourceContext<'a> {
    pub fn new(env: &'a RequestEnv) -> Self {
        Self {
            env,
            headers: HeaderMap::new(),
        }
    }

    pub fn params(&self) -> &QueryParams {
        &self.env.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.env.params.get(key).map(String::as_str)
    }

    pub fn method(&self) -> &Method {
        &self.env.method
    }

    /// Decoded path after any mount prefix was stripped.
    pub fn path(&self) -> &str {
        self.env.path()
    }

    /// Raw request target after any mount prefix was stripped.
    pub fn request_uri(&self) -> &str {
        &self.env.request_uri
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.env.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn set_content_type(&mut self, content_type: &'static str) {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    /// Sets `Cache-Control` from directives such as `["public", "max-age=60"]`.
    pub fn cache_control(&mut self, directives: &[&str]) -> Result<()> {
        self.set_header(header::CACHE_CONTROL, &directives.join(", "))
    }

    /// Ends the request with `status` and `body`. Headers set so far are kept.
    pub fn halt(&self, status: StatusCode, body: impl Into<Bytes>) -> Reply {
        Reply {
            status,
            headers: self.headers.clone(),
            body: body.into(),
        }
    }

    /// Normal completion; same shape as [`SourceContext::halt`].
    pub fn finish(self, status: StatusCode, body: impl Into<Bytes>) -> Reply {
        Reply {
            status,
            headers: self.headers,
            body: body.into(),
        }
    }
}
