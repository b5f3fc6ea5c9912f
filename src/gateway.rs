//! The HTTP entry point shared by every gem source.

mod response;

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response, StatusCode},
};
use serde_json::json;
use tracing::{error, info};
use url::Url;

use crate::gem_source::{Reply, RequestEnv, SourceBackends, SourceKind, SourceRegistry};

pub use response::{into_response, respond_json, respond_text};

/// Per-request bookkeeping for the access log.
struct RequestLog {
    start: Instant,
    method: Method,
    path: String,
    source: Option<SourceKind>,
}

impl RequestLog {
    fn from_request(req: &Request<Body>) -> Self {
        Self {
            start: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            source: None,
        }
    }

    fn summary(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }

    fn source_name(&self) -> &'static str {
        self.source.map_or("-", SourceKind::name)
    }
}

#[derive(Clone)]
pub struct GemGateway {
    registry: Arc<SourceRegistry>,
    backends: SourceBackends,
    default_upstream: Url,
}

impl GemGateway {
    pub fn new(
        registry: Arc<SourceRegistry>,
        backends: SourceBackends,
        default_upstream: Url,
    ) -> Self {
        Self {
            registry,
            backends,
            default_upstream,
        }
    }

    /// Routes one request to the first source that claims it. Returns the
    /// source that answered, if any, alongside its reply.
    pub async fn dispatch(&self, mut env: RequestEnv) -> Result<(Option<SourceKind>, Reply)> {
        if env.method == Method::GET && env.path() == "/up" {
            return Ok((None, self.health()?));
        }

        let Some(claim) = self.registry.claim(&mut env, &self.default_upstream) else {
            return Ok((None, respond_text(StatusCode::NOT_FOUND, "not found")));
        };

        let kind = claim.kind;
        let reply = claim.into_source(&env).serve(&self.backends).await?;
        Ok((Some(kind), reply))
    }

    fn health(&self) -> Result<Reply> {
        let sources: Vec<_> = self.registry.kinds().map(SourceKind::name).collect();
        let body = serde_json::to_string(&json!({
            "status": "ok",
            "sources": sources,
        }))
        .context("serializing health response")?;
        Ok(respond_json(StatusCode::OK, body))
    }

    async fn handle(&self, req: Request<Body>, log: &mut RequestLog) -> Result<Response<Body>> {
        let env = RequestEnv::from_request(&req);
        let (source, reply) = self.dispatch(env).await?;
        log.source = source;
        into_response(reply)
    }
}

impl Service<Request<Body>> for GemGateway {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut log = RequestLog::from_request(&req);

        let result = self.handle(req, &mut log).await;

        match &result {
            Ok(resp) => {
                let response_code = resp.status().as_u16();
                let duration_ms = log.start.elapsed().as_millis();
                info!(
                    summary = %log.summary(),
                    response_code,
                    duration_ms,
                    source = log.source_name(),
                    "request handled"
                );
            }
            Err(err) => {
                let duration_ms = log.start.elapsed().as_millis();
                error!(
                    summary = %log.summary(),
                    duration_ms,
                    source = log.source_name(),
                    error = %err,
                    "request failed"
                );
            }
        }

        result.map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rama::http::{HeaderMap, HeaderValue, body::util::BodyExt};

    use super::*;
    use crate::dependencies::{
        DependencyProvider, DependencySpec, GemNameBatch, PrivateIndex, UpstreamResolver,
    };
    use crate::gem_source::API_REQUEST_LIMIT;

    struct Echo {
        version: &'static str,
    }

    #[async_trait]
    impl DependencyProvider for Echo {
        async fn fetch(&self, gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
            Ok(gems
                .iter()
                .map(|name| DependencySpec {
                    name: name.to_string(),
                    number: self.version.into(),
                    platform: "ruby".into(),
                    dependencies: vec![],
                })
                .collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl DependencyProvider for Broken {
        async fn fetch(&self, _gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
            Err(anyhow!("upstream unreachable"))
        }
    }

    #[derive(Default)]
    struct Upstreams {
        broken: bool,
        resolved: Mutex<Vec<String>>,
    }

    impl UpstreamResolver for Upstreams {
        fn resolve(&self, upstream: &Url) -> Arc<dyn DependencyProvider> {
            self.resolved.lock().push(upstream.to_string());
            if self.broken {
                Arc::new(Broken)
            } else {
                Arc::new(Echo { version: "9.9.9" })
            }
        }
    }

    fn gateway_with(upstreams: Arc<Upstreams>) -> GemGateway {
        let private = PrivateIndex::new([DependencySpec {
            name: "internal-auth".into(),
            number: "0.3.1".into(),
            platform: "ruby".into(),
            dependencies: vec![],
        }]);
        GemGateway::new(
            Arc::new(SourceRegistry::standard().unwrap()),
            SourceBackends {
                private: Arc::new(private),
                upstreams,
            },
            Url::parse("https://rubygems.org/").unwrap(),
        )
    }

    fn gateway() -> (GemGateway, Arc<Upstreams>) {
        let upstreams = Arc::new(Upstreams::default());
        (gateway_with(Arc::clone(&upstreams)), upstreams)
    }

    fn get(target: &str) -> RequestEnv {
        RequestEnv::new(Method::GET, target, HeaderMap::new())
    }

    fn json_body(reply: &Reply) -> serde_json::Value {
        serde_json::from_slice(&reply.body).unwrap()
    }

    #[tokio::test]
    async fn health_lists_sources_in_order() {
        let (gateway, _) = gateway();
        let (source, reply) = gateway.dispatch(get("/up")).await.unwrap();
        assert_eq!(source, None);
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            json_body(&reply),
            json!({"status": "ok", "sources": ["private", "redirect", "upstream", "rubygems"]})
        );
    }

    #[tokio::test]
    async fn private_requests_use_private_index() {
        let (gateway, upstreams) = gateway();
        let (source, reply) = gateway
            .dispatch(get("/private/api/v1/dependencies.json?gems=internal-auth"))
            .await
            .unwrap();
        assert_eq!(source, Some(SourceKind::Private));
        assert_eq!(json_body(&reply)[0]["number"], "0.3.1");
        assert!(upstreams.resolved.lock().is_empty());
    }

    #[tokio::test]
    async fn unprefixed_requests_go_to_rubygems() {
        let (gateway, upstreams) = gateway();
        let (source, reply) = gateway
            .dispatch(get("/api/v1/dependencies.json?gems=rails"))
            .await
            .unwrap();
        assert_eq!(source, Some(SourceKind::Rubygems));
        assert_eq!(json_body(&reply)[0]["number"], "9.9.9");
        assert_eq!(
            upstreams.resolved.lock().as_slice(),
            &["https://rubygems.org/".to_string()]
        );
    }

    #[tokio::test]
    async fn upstream_prefix_selects_upstream() {
        let (gateway, upstreams) = gateway();
        let (source, reply) = gateway
            .dispatch(get(
                "/upstream/https%3A%2F%2Fgems.example.com/api/v1/dependencies?gems=rack",
            ))
            .await
            .unwrap();
        assert_eq!(source, Some(SourceKind::Upstream));
        assert_eq!(reply.content_type(), Some("application/octet-stream"));
        assert_eq!(
            upstreams.resolved.lock().as_slice(),
            &["https://gems.example.com/".to_string()]
        );
    }

    #[tokio::test]
    async fn gemfile_source_header_selects_upstream() {
        let (gateway, upstreams) = gateway();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-gemfile-source",
            HeaderValue::from_static("https://gems.example.com"),
        );
        let env = RequestEnv::new(Method::GET, "/api/v1/dependencies?gems=rack", headers);
        let (source, _) = gateway.dispatch(env).await.unwrap();
        assert_eq!(source, Some(SourceKind::Upstream));
        assert_eq!(
            upstreams.resolved.lock().as_slice(),
            &["https://gems.example.com/".to_string()]
        );
    }

    #[tokio::test]
    async fn redirect_prefix_answers_302() {
        let (gateway, _) = gateway();
        let (source, reply) = gateway
            .dispatch(get("/redirect/https%3A%2F%2Fgems.example.com/gems/rack-3.0.0.gem"))
            .await
            .unwrap();
        assert_eq!(source, Some(SourceKind::Redirect));
        assert_eq!(reply.status, StatusCode::FOUND);
        assert_eq!(
            reply.header("location"),
            Some("https://gems.example.com/gems/rack-3.0.0.gem")
        );
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_before_upstream() {
        let (gateway, upstreams) = gateway();
        let names: Vec<_> = (0..=API_REQUEST_LIMIT).map(|i| format!("gem{i}")).collect();
        let (_, reply) = gateway
            .dispatch(get(&format!("/api/v1/dependencies?gems={}", names.join(","))))
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            reply.body.as_ref(),
            b"Too many gems (use --full-index instead)"
        );
        // resolved, never fetched
        assert_eq!(upstreams.resolved.lock().len(), 1);
    }

    #[tokio::test]
    async fn provider_errors_surface_as_errors() {
        let upstreams = Arc::new(Upstreams {
            broken: true,
            ..Default::default()
        });
        let gateway = gateway_with(upstreams);
        let err = gateway
            .dispatch(get("/api/v1/dependencies?gems=rails"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream unreachable");
    }

    #[tokio::test]
    async fn service_returns_wire_response() {
        let (gateway, _) = gateway();
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://localhost:9292/private/api/v1/dependencies?gems=")
            .body(Body::empty())
            .unwrap();
        let resp = gateway.serve(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
