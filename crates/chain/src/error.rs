//! Error types of the request chain.
//!
//! Errors are split by the moment they can happen:
//!
//! - [`ConfigError`]: raised while building middleware, the application must refuse to start
//! - [`ChainError`]: returned by handlers and propagated by [`RequestContext::next`](crate::RequestContext::next)
//!   up to the central error handler
//! - [`BodyError`]: raised while reading a request body, converts into [`ChainError`]

use http::StatusCode;
use std::error::Error;
use thiserror::Error;

/// A boxed error that can cross task boundaries.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Error returned by a handler, propagated unchanged to the central error handler.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request entity too large, the limit is {limit} bytes")]
    RequestEntityTooLarge { limit: u64 },

    #[error("renderer not configured")]
    RendererNotConfigured,

    #[error("{message}")]
    Http { status: StatusCode, message: String },

    #[error("request body error: {source}")]
    Body { source: BodyError },

    #[error("render error: {source}")]
    Render { source: BoxError },

    #[error("unsupported payload: {kind}")]
    UnsupportedPayload { kind: &'static str },

    #[error(transparent)]
    Handler(#[from] BoxError),
}

impl ChainError {
    /// Creates an error carrying the status the central error handler should respond with.
    pub fn http<S: ToString>(status: StatusCode, message: S) -> Self {
        Self::Http { status, message: message.to_string() }
    }

    pub fn bad_request<S: ToString>(message: S) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    pub fn render<E: Into<BoxError>>(e: E) -> Self {
        Self::Render { source: e.into() }
    }

    pub fn handler<E: Into<BoxError>>(e: E) -> Self {
        Self::Handler(e.into())
    }

    /// The status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ChainError::RequestEntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ChainError::Http { status, .. } => *status,
            ChainError::Body { .. } => StatusCode::BAD_REQUEST,
            ChainError::RendererNotConfigured
            | ChainError::Render { .. }
            | ChainError::UnsupportedPayload { .. }
            | ChainError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[inline]
    pub fn is_entity_too_large(&self) -> bool {
        matches!(self, ChainError::RequestEntityTooLarge { .. })
    }

    #[inline]
    pub fn is_renderer_not_configured(&self) -> bool {
        matches!(self, ChainError::RendererNotConfigured)
    }
}

impl From<BodyError> for ChainError {
    fn from(e: BodyError) -> Self {
        match e {
            BodyError::TooLarge { limit } => ChainError::RequestEntityTooLarge { limit },
            other => ChainError::Body { source: other },
        }
    }
}

/// Error produced while reading a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("body has been consumed")]
    Consumed,

    #[error("read body error: {source}")]
    Source { source: BoxError },
}

impl BodyError {
    pub fn too_large(limit: u64) -> Self {
        Self::TooLarge { limit }
    }

    /// Wraps a foreign body error, a [`BodyError`] hidden in the box is unwrapped instead.
    pub fn source<E: Into<BoxError>>(e: E) -> Self {
        match e.into().downcast::<BodyError>() {
            Ok(body_error) => *body_error,
            Err(source) => Self::Source { source },
        }
    }
}

/// Misconfiguration detected while building middleware.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid body-limit={input}: {reason}")]
    InvalidSize { input: String, reason: String },
}

impl ConfigError {
    pub fn invalid_size<I: ToString, R: ToString>(input: I, reason: R) -> Self {
        Self::InvalidSize { input: input.to_string(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn too_large_body_error_becomes_entity_too_large() {
        let e: ChainError = BodyError::too_large(10).into();
        assert!(e.is_entity_too_large());
        assert_eq!(e.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn other_body_errors_are_bad_requests() {
        let e: ChainError = BodyError::Consumed.into();
        assert!(matches!(e, ChainError::Body { source: BodyError::Consumed }));
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn boxed_body_error_is_unwrapped() {
        let boxed: BoxError = Box::new(BodyError::too_large(3));
        assert!(matches!(BodyError::source(boxed), BodyError::TooLarge { limit: 3 }));

        let io_error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(BodyError::source(io_error), BodyError::Source { .. }));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ChainError::http(StatusCode::NOT_FOUND, "missing").status(), StatusCode::NOT_FOUND);
        assert_eq!(ChainError::RendererNotConfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ChainError::handler("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ChainError::handler("boom").to_string(), "boom");
    }
}
