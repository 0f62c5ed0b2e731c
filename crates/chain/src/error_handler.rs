//! Turns the error of a failed chain into a response.

use crate::error::ChainError;
use crate::RequestContext;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use tracing::{debug, error};

/// Receives the first error returned by a request's chain, at most once per request.
///
/// Closures taking the context and the error are error handlers:
///
/// ```
/// use micro_chain::{App, ChainError, RequestContext};
/// use micro_chain::router::Router;
///
/// let app = App::builder()
///     .router(Router::builder().build().unwrap())
///     .error_handler(|ctx: &mut RequestContext, e: ChainError| {
///         let _ = ctx.string(format!("oops: {e}"), Some(e.status()));
///     })
///     .build()
///     .unwrap();
/// ```
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext, e: ChainError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut RequestContext, ChainError) + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext, e: ChainError) {
        (self)(ctx, e);
    }
}

/// Logs the error and, unless a handler already committed a status, responds with the error status.
///
/// Client errors answer with their message, server errors only with the canonical reason so
/// internal details stay in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, ctx: &mut RequestContext, e: ChainError) {
        let status = e.status();
        if status.is_server_error() {
            error!(method = %ctx.method(), path = ctx.uri().path(), %status, cause = %e, "request failed");
        } else {
            debug!(method = %ctx.method(), path = ctx.uri().path(), %status, cause = %e, "request rejected");
        }

        let response = ctx.response_mut();
        if response.committed() {
            return;
        }

        let message = if status.is_client_error() {
            e.to_string()
        } else {
            status.canonical_reason().unwrap_or("error").to_string()
        };
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response.write_header(status);
        response.write(message.as_bytes());
        ctx.abort();
    }
}
