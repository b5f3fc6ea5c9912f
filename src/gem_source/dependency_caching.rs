//! Bundler's dependency API: `GET /api/v1/dependencies?gems=a,b,c`.

use anyhow::{Context, Result};
use rama::http::StatusCode;
use serde::Serialize;
use tracing::debug;

use super::context::{Flow, Reply, SourceContext};
use super::env::QueryParams;
use crate::dependencies::{DependencyProvider, GemNameBatch};
use crate::marshal;

/// Most gem names one dependency request may ask for. Larger resolutions go
/// through the full index instead.
pub const API_REQUEST_LIMIT: usize = 200;

pub const TOO_MANY_GEMS: &str = "Too many gems (use --full-index instead)";

pub const MARSHAL_CONTENT_TYPE: &str = "application/octet-stream";
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

#[derive(Serialize)]
struct ApiError<'a> {
    error: &'a str,
    code: u16,
}

/// Reads the `gems` parameter. A missing or empty parameter ends the request
/// with an empty 200, which is what Bundler expects for "nothing to resolve".
pub fn extract_batch(params: &QueryParams) -> Flow<GemNameBatch> {
    match params.get("gems").map(String::as_str) {
        None | Some("") => Flow::Halt(Reply::empty(StatusCode::OK)),
        Some(raw) => Flow::Continue(GemNameBatch::parse(raw)),
    }
}

/// Marshal-encoded dependency list.
pub async fn serve_dependencies(
    ctx: &mut SourceContext<'_>,
    provider: &dyn DependencyProvider,
) -> Result<Reply> {
    let gems = match extract_batch(ctx.params()) {
        Flow::Continue(gems) => gems,
        Flow::Halt(reply) => return Ok(reply),
    };

    if gems.len() > API_REQUEST_LIMIT {
        ctx.set_content_type(TEXT_CONTENT_TYPE);
        return Ok(ctx.halt(StatusCode::UNPROCESSABLE_ENTITY, TOO_MANY_GEMS));
    }

    debug!(gems = gems.len(), "serving marshal dependencies");
    ctx.set_content_type(MARSHAL_CONTENT_TYPE);
    let specs = provider.fetch(&gems).await?;
    Ok(ctx.halt(StatusCode::OK, marshal::dump_dependencies(&specs)))
}

/// JSON-encoded dependency list.
pub async fn serve_dependencies_json(
    ctx: &mut SourceContext<'_>,
    provider: &dyn DependencyProvider,
) -> Result<Reply> {
    let gems = match extract_batch(ctx.params()) {
        Flow::Continue(gems) => gems,
        Flow::Halt(reply) => return Ok(reply),
    };

    ctx.set_content_type(JSON_CONTENT_TYPE);

    if gems.len() > API_REQUEST_LIMIT {
        let body = serde_json::to_vec(&ApiError {
            error: TOO_MANY_GEMS,
            code: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
        })
        .context("serializing dependency error")?;
        return Ok(ctx.halt(StatusCode::UNPROCESSABLE_ENTITY, body));
    }

    debug!(gems = gems.len(), "serving json dependencies");
    let specs = provider.fetch(&gems).await?;
    let body = serde_json::to_vec(&specs).context("serializing dependency list")?;
    Ok(ctx.halt(StatusCode::OK, body))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use rama::http::{HeaderMap, Method};
    use serde_json::json;

    use super::*;
    use crate::dependencies::DependencySpec;
    use crate::gem_source::env::RequestEnv;

    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
        last: parking_lot::Mutex<Option<GemNameBatch>>,
    }

    #[async_trait]
    impl DependencyProvider for Recording {
        async fn fetch(&self, gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(gems.clone());
            Ok(gems
                .iter()
                .map(|name| DependencySpec {
                    name: name.to_string(),
                    number: "1.0.0".into(),
                    platform: "ruby".into(),
                    dependencies: vec![],
                })
                .collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl DependencyProvider for Failing {
        async fn fetch(&self, _gems: &GemNameBatch) -> Result<Vec<DependencySpec>> {
            Err(anyhow!("index unavailable"))
        }
    }

    fn env(query: &str) -> RequestEnv {
        RequestEnv::new(
            Method::GET,
            &format!("/api/v1/dependencies{query}"),
            HeaderMap::new(),
        )
    }

    fn names(count: usize) -> String {
        (0..count)
            .map(|i| format!("gem{i}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn extract_batch_dedups_in_order() {
        let env = env("?gems=rails,rspec,rails");
        match extract_batch(&env.params) {
            Flow::Continue(batch) => {
                assert_eq!(batch.iter().collect::<Vec<_>>(), vec!["rails", "rspec"])
            }
            Flow::Halt(_) => panic!("expected a batch"),
        }
    }

    #[test]
    fn extract_batch_halts_on_missing_or_empty() {
        for query in ["", "?gems=", "?other=1"] {
            let env = env(query);
            match extract_batch(&env.params) {
                Flow::Halt(reply) => {
                    assert_eq!(reply.status, StatusCode::OK);
                    assert!(reply.body.is_empty());
                }
                Flow::Continue(_) => panic!("expected a halt for {query:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_query_never_reaches_provider() {
        let provider = Recording::default();
        let env = env("?gems=");
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.body.is_empty());

        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies_json(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.body.is_empty());

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn binary_success_is_marshal() {
        let provider = Recording::default();
        let env = env("?gems=rails,rspec");
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type(), Some(MARSHAL_CONTENT_TYPE));
        let expected = provider
            .fetch(&GemNameBatch::parse("rails,rspec"))
            .await
            .unwrap();
        assert_eq!(reply.body.as_ref(), marshal::dump_dependencies(&expected));
    }

    #[tokio::test]
    async fn json_success_is_dependency_list() {
        let provider = Recording::default();
        let env = env("?gems=rails,rspec");
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies_json(&mut ctx, &provider).await.unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type(), Some(JSON_CONTENT_TYPE));
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body[0]["name"], "rails");
        assert_eq!(body[1]["name"], "rspec");
        assert_eq!(
            provider.last.lock().as_ref().map(GemNameBatch::len),
            Some(2)
        );
    }

    #[tokio::test]
    async fn limit_is_inclusive() {
        let provider = Recording::default();
        let env = env(&format!("?gems={}", names(API_REQUEST_LIMIT)));

        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);

        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies_json(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicates_do_not_count_toward_limit() {
        let provider = Recording::default();
        let env = env(&format!(
            "?gems={},{}",
            names(API_REQUEST_LIMIT),
            names(API_REQUEST_LIMIT)
        ));
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn interior_empty_name_counts_toward_limit() {
        let provider = Recording::default();
        let (head, tail) = (names(1), names(API_REQUEST_LIMIT));
        // "gem0,,gem0,gem1,..." is 200 distinct names plus ""
        let env = env(&format!("?gems={head},,{tail}"));

        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply.body.as_ref(), TOO_MANY_GEMS.as_bytes());

        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies_json(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trailing_comma_does_not_count_toward_limit() {
        let provider = Recording::default();
        let env = env(&format!("?gems={},", names(API_REQUEST_LIMIT)));
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(
            provider.last.lock().as_ref().map(GemNameBatch::len),
            Some(API_REQUEST_LIMIT)
        );
    }

    #[tokio::test]
    async fn binary_over_limit_is_plain_text_422() {
        let provider = Recording::default();
        let env = env(&format!("?gems={}", names(API_REQUEST_LIMIT + 1)));
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies(&mut ctx, &provider).await.unwrap();

        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply.content_type(), Some(TEXT_CONTENT_TYPE));
        assert_eq!(reply.body.as_ref(), TOO_MANY_GEMS.as_bytes());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn json_over_limit_is_json_422() {
        let provider = Recording::default();
        let env = env(&format!("?gems={}", names(API_REQUEST_LIMIT + 1)));
        let mut ctx = SourceContext::new(&env);
        let reply = serve_dependencies_json(&mut ctx, &provider).await.unwrap();

        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply.content_type(), Some(JSON_CONTENT_TYPE));
        assert_eq!(
            reply.body.as_ref(),
            br#"{"error":"Too many gems (use --full-index instead)","code":422}"#
        );
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(
            body,
            json!({"error": "Too many gems (use --full-index instead)", "code": 422})
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let env = env("?gems=rails");
        let mut ctx = SourceContext::new(&env);
        let err = serve_dependencies(&mut ctx, &Failing).await.unwrap_err();
        assert_eq!(err.to_string(), "index unavailable");

        let mut ctx = SourceContext::new(&env);
        let err = serve_dependencies_json(&mut ctx, &Failing)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "index unavailable");
    }
}
