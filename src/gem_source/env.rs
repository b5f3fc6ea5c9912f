use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use rama::http::{Body, HeaderMap, Method, Request};
use url::form_urlencoded;

use super::rewrite::{PathMatch, PathMatcher, rewrite};

pub type QueryParams = HashMap<String, String>;

/// Per-request view of the inbound request that sources route on.
///
/// `request_uri` is the raw request target (path and query, still
/// percent-encoded). `path_info` is the decoded path; encoded slashes (`%2F`)
/// stay encoded so a segment such as an upstream URL cannot split the path.
#[derive(Debug, Clone)]
pub struct RequestEnv {
    pub method: Method,
    pub request_uri: String,
    pub path_info: String,
    pub params: QueryParams,
    pub headers: HeaderMap,
}

impl RequestEnv {
    pub fn new(method: Method, request_uri: &str, headers: HeaderMap) -> Self {
        let (path, query) = match request_uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (request_uri, ""),
        };

        let params = form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        Self {
            method,
            request_uri: request_uri.to_string(),
            path_info: decode_path(path),
            params,
            headers,
        }
    }

    pub fn from_request(req: &Request<Body>) -> Self {
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Self::new(req.method().clone(), target, req.headers().clone())
    }

    /// Strips `matcher` from both the raw URI and the decoded path, or leaves
    /// the request untouched when either does not match.
    pub fn chomp_path(&mut self, matcher: &PathMatcher) -> Option<PathMatch> {
        rewrite(&mut self.request_uri, &mut self.path_info, matcher)
    }

    /// Decoded path for routing; an empty path after rewriting is the root.
    pub fn path(&self) -> &str {
        if self.path_info.is_empty() {
            "/"
        } else {
            &self.path_info
        }
    }
}

/// Percent-decodes a request path, keeping `%2F` sequences encoded.
pub fn decode_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = find_encoded_slash(rest) {
        out.push_str(&percent_decode_str(&rest[..idx]).decode_utf8_lossy());
        out.push_str(&rest[idx..idx + 3]);
        rest = &rest[idx + 3..];
    }
    out.push_str(&percent_decode_str(rest).decode_utf8_lossy());
    out
}

fn find_encoded_slash(s: &str) -> Option<usize> {
    s.as_bytes()
        .windows(3)
        .position(|w| w[0] == b'%' && w[1] == b'2' && (w[2] == b'F' || w[2] == b'f'))
}
