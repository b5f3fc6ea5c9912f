use anyhow::Result;
use rama::http::StatusCode;

use super::context::{Reply, SourceContext};
use super::dependency_caching::{TEXT_CONTENT_TYPE, serve_dependencies, serve_dependencies_json};
use super::Endpoint;
use crate::dependencies::DependencyProvider;

/// Serves gems pushed to this gateway, mounted under `/private`.
pub struct PrivateSource<'a> {
    ctx: SourceContext<'a>,
}

impl<'a> PrivateSource<'a> {
    pub fn new(ctx: SourceContext<'a>) -> Self {
        Self { ctx }
    }

    pub async fn serve(mut self, index: &dyn DependencyProvider) -> Result<Reply> {
        match Endpoint::of(&self.ctx) {
            Endpoint::Dependencies => serve_dependencies(&mut self.ctx, index).await,
            Endpoint::DependenciesJson => serve_dependencies_json(&mut self.ctx, index).await,
            Endpoint::Other => {
                self.ctx.set_content_type(TEXT_CONTENT_TYPE);
                Ok(self.ctx.finish(StatusCode::NOT_FOUND, "not found"))
            }
        }
    }
}
