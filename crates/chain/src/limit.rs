//! Request body size limiting.
//!
//! [`BodyLimit`] rejects a request whose declared `Content-Length` is above the limit before reading
//! anything, and otherwise wraps the body in a [`LimitedBody`] that fails as soon as more bytes than
//! allowed have been read, whatever the request declared.
//!
//! ```
//! use micro_chain::limit::{BodyLimit, BodyLimitConfig};
//! use micro_chain::filter::get_method;
//! use std::sync::Arc;
//!
//! let limit = BodyLimit::new("4M").unwrap();
//! assert_eq!(limit.limit(), 4 * 1024 * 1024);
//!
//! let config = BodyLimitConfig { limit: "512K".to_string(), skipper: Some(Arc::new(get_method())) };
//! let uploads = BodyLimit::with_config(config).unwrap();
//! ```

use crate::body::RequestBody;
use crate::error::{BodyError, ChainError, ConfigError};
use crate::filter::Filter;
use crate::handler::Handler;
use crate::pool::{Pool, Pooled, Recycle};
use crate::size::parse_size;
use crate::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde::Deserialize;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tracing::debug;

const MAX_IDLE_READERS: usize = 256;

/// Configuration of [`BodyLimit`].
///
/// Only `limit` is read by serde, the skipper is code.
#[derive(Clone, Default, Deserialize)]
pub struct BodyLimitConfig {
    /// Maximum body size, like `4M`, `512KB` or `1.5 G`. Units are powers of 1024.
    pub limit: String,

    /// Requests matching this filter are not limited.
    #[serde(skip)]
    pub skipper: Option<Arc<dyn Filter>>,
}

impl fmt::Debug for BodyLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyLimitConfig")
            .field("limit", &self.limit)
            .field("skipper", &self.skipper.is_some())
            .finish()
    }
}

/// Middleware limiting the size of request bodies.
///
/// An oversized body ends the request with [`ChainError::RequestEntityTooLarge`], either right away
/// from the declared length or from the handler reading the body.
pub struct BodyLimit {
    limit: u64,
    skipper: Option<Arc<dyn Filter>>,
    readers: Pool<LimitedBody>,
}

impl BodyLimit {
    pub fn new(limit: &str) -> Result<Self, ConfigError> {
        Self::with_config(BodyLimitConfig { limit: limit.to_string(), skipper: None })
    }

    pub fn with_config(config: BodyLimitConfig) -> Result<Self, ConfigError> {
        let limit = parse_size(&config.limit)?;
        let readers = Pool::new(MAX_IDLE_READERS, move || LimitedBody::new(limit));
        Ok(Self { limit, skipper: config.skipper, readers })
    }

    /// The limit in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn declared_length(ctx: &RequestContext) -> Option<u64> {
        ctx.headers().get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
    }
}

impl fmt::Debug for BodyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyLimit")
            .field("limit", &self.limit)
            .field("skipper", &self.skipper.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for BodyLimit {
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), ChainError> {
        if self.skipper.as_ref().is_some_and(|skipper| skipper.matches(ctx)) {
            return ctx.next().await;
        }

        if let Some(declared) = Self::declared_length(ctx)
            && declared > self.limit
        {
            debug!(declared, limit = self.limit, "declared content length over the limit");
            return Err(ChainError::RequestEntityTooLarge { limit: self.limit });
        }

        let Some(body) = ctx.take_body() else {
            // nothing left to read
            return ctx.next().await;
        };
        let mut reader = self.readers.checkout();
        reader.reset(body);
        ctx.set_body(RequestBody::limited(reader));

        let result = ctx.next().await;

        // hand the reader back to the pool now rather than when the context is recycled
        drop(ctx.take_body());
        result
    }
}

/// A request body that fails once more than `limit` bytes of data have been read.
///
/// Once the limit is crossed every further poll fails with the same [`BodyError::TooLarge`].
/// Readers are pooled, [`reset`](Self::reset) prepares one for the next body.
pub struct LimitedBody {
    inner: Option<RequestBody>,
    read: u64,
    limit: u64,
    exceeded: bool,
}

impl LimitedBody {
    pub fn new(limit: u64) -> Self {
        Self { inner: None, read: 0, limit, exceeded: false }
    }

    /// Wraps `body`, restarting the count from zero.
    pub fn reset(&mut self, body: RequestBody) {
        self.inner = Some(body);
        self.read = 0;
        self.exceeded = false;
    }

    /// Data bytes read so far from the current body.
    #[inline]
    pub fn read(&self) -> u64 {
        self.read
    }

    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn poll_limited(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, BodyError>>> {
        if self.exceeded {
            return Poll::Ready(Some(Err(BodyError::too_large(self.limit))));
        }
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(Pin::new(inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    self.read = self.read.saturating_add(data.len() as u64);
                    if self.read > self.limit {
                        self.exceeded = true;
                        return Poll::Ready(Some(Err(BodyError::too_large(self.limit))));
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            other => Poll::Ready(other),
        }
    }

    fn limited_size_hint(&self) -> SizeHint {
        let Some(inner) = &self.inner else {
            return SizeHint::with_exact(0);
        };
        let hint = inner.size_hint();
        let remaining = self.limit.saturating_sub(self.read);
        // never promise more than the limit allows
        let mut limited = SizeHint::new();
        limited.set_lower(hint.lower().min(remaining));
        if let Some(upper) = hint.upper() {
            limited.set_upper(upper.min(remaining.saturating_add(1)));
        }
        limited
    }
}

impl Recycle for LimitedBody {
    fn recycle(&mut self) {
        self.inner = None;
        self.read = 0;
        self.exceeded = false;
    }
}

impl fmt::Debug for LimitedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitedBody")
            .field("read", &self.read)
            .field("limit", &self.limit)
            .field("exceeded", &self.exceeded)
            .finish_non_exhaustive()
    }
}

impl HttpBody for LimitedBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().poll_limited(cx)
    }

    fn is_end_stream(&self) -> bool {
        !self.exceeded && self.inner.as_ref().is_none_or(HttpBody::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        self.limited_size_hint()
    }
}

impl HttpBody for Pooled<LimitedBody> {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().poll_limited(cx)
    }

    fn is_end_stream(&self) -> bool {
        HttpBody::is_end_stream(&**self)
    }

    fn size_hint(&self) -> SizeHint {
        self.limited_size_hint()
    }
}
