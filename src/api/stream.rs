use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use futures::TryStreamExt;

use crate::backend::CONVERSATION_ID_HEADER;

/// Header telling stream consumers the body is plain text, not a framed protocol.
pub const STREAM_FORMAT_HEADER: &str = "x-acme-stream-format";

/// Header the Vercel AI SDK reads to pick its text stream parser.
pub const VERCEL_STREAM_HEADER: &str = "x-vercel-ai-stream-data";

/// Relay a backend body chunk by chunk as `text/plain`.
///
/// Nothing is buffered: each upstream chunk is written as soon as it arrives,
/// so interrupt markers reach the client while the agent is still paused.
pub fn text_stream_response(upstream: reqwest::Response, conversation_id: &str) -> Response {
    let stream = upstream
        .bytes_stream()
        .inspect_err(|e| tracing::warn!(error = %e, "Backend stream broke mid-response"));

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static(STREAM_FORMAT_HEADER),
        HeaderValue::from_static("text"),
    );
    headers.insert(
        HeaderName::from_static(VERCEL_STREAM_HEADER),
        HeaderValue::from_static("text"),
    );

    with_conversation_id(response, conversation_id)
}

/// Attach `x-conversation-id` to a response when the id is a valid header value.
pub fn with_conversation_id(mut response: Response, conversation_id: &str) -> Response {
    match HeaderValue::from_str(conversation_id) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(CONVERSATION_ID_HEADER), value);
        }
        Err(_) => tracing::warn!("Conversation id is not a valid header value, omitting it"),
    }
    response
}
