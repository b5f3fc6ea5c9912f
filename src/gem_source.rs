//! Gem sources: the handlers that share the gateway's single HTTP entry point.
//!
//! Each request is offered to the sources in registry order. The first source
//! that claims it strips its mount prefix from the request and serves what is
//! left.

mod context;
mod dependency_caching;
mod env;
mod private;
mod registry;
mod rewrite;
mod upstream;

use std::{fmt, sync::Arc};

use anyhow::Result;
use rama::http::Method;
use url::Url;

pub use context::{Flow, Reply, SourceContext};
pub use dependency_caching::{
    API_REQUEST_LIMIT, JSON_CONTENT_TYPE, MARSHAL_CONTENT_TYPE, TEXT_CONTENT_TYPE, TOO_MANY_GEMS,
    extract_batch, serve_dependencies, serve_dependencies_json,
};
pub use env::{QueryParams, RequestEnv, decode_path};
pub use private::PrivateSource;
pub use registry::{SourceRegistry, reset_sources, sources};
pub use rewrite::{PathMatch, PathMatcher, PatternError, rewrite};
pub use upstream::{GEMFILE_SOURCE_HEADER, RedirectSource, UpstreamSource, UpstreamTarget};

use crate::dependencies::{DependencyProvider, UpstreamResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Private,
    Redirect,
    Upstream,
    Rubygems,
}

impl SourceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Redirect => "redirect",
            Self::Upstream => "upstream",
            Self::Rubygems => "rubygems",
        }
    }

    /// Human readable mount point, as printed by `gemgate sources`.
    pub fn mount(self) -> &'static str {
        match self {
            Self::Private => "/private",
            Self::Redirect => "/redirect/<upstream_url>",
            Self::Upstream => "/upstream/<upstream_url> or X-Gemfile-Source",
            Self::Rubygems => "/",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source's decision to handle a request, made after its prefix (if any)
/// was stripped from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub kind: SourceKind,
    pub upstream: Option<UpstreamTarget>,
}

impl Claim {
    /// Builds the per-request source. It borrows `env` until the reply exists.
    pub fn into_source(self, env: &RequestEnv) -> Source<'_> {
        let ctx = SourceContext::new(env);
        match (self.kind, self.upstream) {
            (SourceKind::Private, _) => Source::Private(PrivateSource::new(ctx)),
            (SourceKind::Redirect, upstream) => Source::Redirect(RedirectSource::new(
                ctx,
                upstream.unwrap_or_else(UpstreamTarget::missing),
            )),
            (SourceKind::Upstream, upstream) => Source::Upstream(UpstreamSource::new(
                ctx,
                upstream.unwrap_or_else(UpstreamTarget::missing),
            )),
            (SourceKind::Rubygems, upstream) => Source::Rubygems(UpstreamSource::new(
                ctx,
                upstream.unwrap_or_else(UpstreamTarget::missing),
            )),
        }
    }
}

/// Collaborators the sources fetch dependency records from.
#[derive(Clone)]
pub struct SourceBackends {
    pub private: Arc<dyn DependencyProvider>,
    pub upstreams: Arc<dyn UpstreamResolver>,
}

pub enum Source<'a> {
    Private(PrivateSource<'a>),
    Redirect(RedirectSource<'a>),
    Upstream(UpstreamSource<'a>),
    Rubygems(UpstreamSource<'a>),
}

impl Source<'_> {
    pub async fn serve(self, backends: &SourceBackends) -> Result<Reply> {
        match self {
            Self::Private(source) => source.serve(backends.private.as_ref()).await,
            Self::Redirect(source) => source.serve(),
            Self::Upstream(source) | Self::Rubygems(source) => {
                source.serve(backends.upstreams.as_ref()).await
            }
        }
    }
}

/// Endpoints a source may serve once its prefix is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Dependencies,
    DependenciesJson,
    Other,
}

impl Endpoint {
    pub(crate) fn of(ctx: &SourceContext<'_>) -> Self {
        if !matches!(*ctx.method(), Method::GET | Method::HEAD) {
            return Self::Other;
        }
        match ctx.path() {
            "/api/v1/dependencies" => Self::Dependencies,
            "/api/v1/dependencies.json" => Self::DependenciesJson,
            _ => Self::Other,
        }
    }
}

/// Claims `env` for `kind`, stripping the mount prefix when one applies.
pub(crate) fn claim(
    kind: SourceKind,
    matcher: Option<&PathMatcher>,
    env: &mut RequestEnv,
    default_upstream: &Url,
) -> Option<Claim> {
    match kind {
        SourceKind::Private => {
            env.chomp_path(matcher?)?;
            Some(Claim {
                kind,
                upstream: None,
            })
        }
        SourceKind::Redirect => {
            let found = env.chomp_path(matcher?)?;
            Some(Claim {
                kind,
                upstream: Some(UpstreamTarget::from_capture(&found)),
            })
        }
        SourceKind::Upstream => {
            let upstream = match matcher.and_then(|m| env.chomp_path(m)) {
                Some(found) => UpstreamTarget::from_capture(&found),
                None => UpstreamTarget::parse(env.headers.get(GEMFILE_SOURCE_HEADER)?.to_str().ok()?),
            };
            Some(Claim {
                kind,
                upstream: Some(upstream),
            })
        }
        SourceKind::Rubygems => Some(Claim {
            kind,
            upstream: Some(UpstreamTarget::Valid(default_upstream.clone())),
        }),
    }
}
