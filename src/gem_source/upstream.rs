use anyhow::Result;
use percent_encoding::percent_decode_str;
use rama::http::{StatusCode, header};
use tracing::{debug, warn};
use url::Url;

use super::context::{Reply, SourceContext};
use super::dependency_caching::{TEXT_CONTENT_TYPE, serve_dependencies, serve_dependencies_json};
use super::rewrite::PathMatch;
use super::Endpoint;
use crate::dependencies::UpstreamResolver;

/// Request header Bundler clients may use to name the upstream instead of a
/// `/upstream/<url>` prefix.
pub const GEMFILE_SOURCE_HEADER: &str = "x-gemfile-source";

const UPSTREAM_CAPTURE: &str = "upstream_url";
const INVALID_UPSTREAM: &str = "invalid upstream url";

/// Upstream registry a request was routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTarget {
    Valid(Url),
    /// Carries the rejected input for logging.
    Invalid(String),
}

impl UpstreamTarget {
    /// Accepts absolute `http`/`https` URLs only. Percent-encoded input (as
    /// captured from a path segment) is decoded first.
    pub fn parse(raw: &str) -> Self {
        let decoded = percent_decode_str(raw).decode_utf8_lossy();
        match Url::parse(&decoded) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
                Self::Valid(url)
            }
            _ => Self::Invalid(raw.to_string()),
        }
    }

    pub(crate) fn from_capture(found: &PathMatch) -> Self {
        match found.capture(UPSTREAM_CAPTURE) {
            Some(raw) => Self::parse(raw),
            None => Self::missing(),
        }
    }

    pub(crate) fn missing() -> Self {
        Self::Invalid(String::new())
    }

    fn into_url(self, ctx: &mut SourceContext<'_>) -> Result<Url, Reply> {
        match self {
            Self::Valid(url) => Ok(url),
            Self::Invalid(raw) => {
                warn!(upstream = %raw, path = %ctx.path(), "rejecting invalid upstream");
                ctx.set_content_type(TEXT_CONTENT_TYPE);
                Err(ctx.halt(StatusCode::BAD_REQUEST, INVALID_UPSTREAM))
            }
        }
    }
}

/// Location on `upstream` for the (already rewritten) request target.
fn redirect_location(upstream: &Url, request_uri: &str) -> String {
    let base = upstream.as_str().trim_end_matches('/');
    if request_uri.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}{request_uri}")
    }
}

fn redirect(mut ctx: SourceContext<'_>, upstream: &Url) -> Result<Reply> {
    let location = redirect_location(upstream, ctx.request_uri());
    debug!(%location, "redirecting to upstream");
    ctx.set_header(header::LOCATION, &location)?;
    Ok(ctx.finish(StatusCode::FOUND, ""))
}

/// Sends every request to the upstream named in the path.
pub struct RedirectSource<'a> {
    ctx: SourceContext<'a>,
    upstream: UpstreamTarget,
}

impl<'a> RedirectSource<'a> {
    pub fn new(ctx: SourceContext<'a>, upstream: UpstreamTarget) -> Self {
        Self { ctx, upstream }
    }

    pub fn serve(mut self) -> Result<Reply> {
        match self.upstream.into_url(&mut self.ctx) {
            Ok(upstream) => redirect(self.ctx, &upstream),
            Err(reply) => Ok(reply),
        }
    }
}

/// Serves dependency queries from an upstream registry and redirects
/// everything else there.
pub struct UpstreamSource<'a> {
    ctx: SourceContext<'a>,
    upstream: UpstreamTarget,
}

impl<'a> UpstreamSource<'a> {
    pub fn new(ctx: SourceContext<'a>, upstream: UpstreamTarget) -> Self {
        Self { ctx, upstream }
    }

    pub async fn serve(mut self, upstreams: &dyn UpstreamResolver) -> Result<Reply> {
        let upstream = match self.upstream.into_url(&mut self.ctx) {
            Ok(upstream) => upstream,
            Err(reply) => return Ok(reply),
        };

        match Endpoint::of(&self.ctx) {
            Endpoint::Dependencies => {
                let provider = upstreams.resolve(&upstream);
                serve_dependencies(&mut self.ctx, provider.as_ref()).await
            }
            Endpoint::DependenciesJson => {
                let provider = upstreams.resolve(&upstream);
                serve_dependencies_json(&mut self.ctx, provider.as_ref()).await
            }
            Endpoint::Other => redirect(self.ctx, &upstream),
        }
    }
}
