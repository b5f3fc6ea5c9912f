use anyhow::{Result, anyhow};
use rama::http::{Body, HeaderValue, Response, StatusCode, header};

use crate::gem_source::{Reply, TEXT_CONTENT_TYPE};

const HEALTH_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Converts a source's reply into the response sent on the wire.
pub fn into_response(reply: Reply) -> Result<Response<Body>> {
    let mut builder = Response::builder().status(reply.status);
    {
        let headers = builder
            .headers_mut()
            .ok_or_else(|| anyhow!("failed to get headers for response build"))?;
        headers.extend(reply.headers);
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&reply.body.len().to_string())?,
        );
    }
    builder.body(Body::from(reply.body)).map_err(Into::into)
}

/// Plain text reply for requests no source handles.
pub fn respond_text(status: StatusCode, body: &'static str) -> Reply {
    let mut reply = Reply::empty(status);
    reply
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
    reply.body = body.into();
    reply
}

/// Uncached JSON reply for the gateway's own endpoints.
pub fn respond_json(status: StatusCode, body: String) -> Reply {
    let mut reply = Reply::empty(status);
    reply.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(HEALTH_CONTENT_TYPE),
    );
    reply
        .headers
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    reply.body = body.into();
    reply
}
