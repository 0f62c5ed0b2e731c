//! The per-request context and the handler chain engine.
//!
//! A [`RequestContext`] carries one request through its handler chain: the request head and body,
//! the response being written, route parameters, a key/value store for handlers to talk to each
//! other, a cancellation token and the position of the chain.
//!
//! Contexts are pooled by [`App`](crate::App): every request resets a recycled context instead of
//! allocating a new one, so nothing written by one request is visible to the next.
//!
//! # Chain control
//!
//! [`next`](RequestContext::next) runs the remaining handlers in order and stops at the first error.
//! A handler calling `next` itself runs the rest of the chain inside its own invocation, which lets
//! it do work before and after downstream handlers:
//!
//! ```
//! use micro_chain::{handler_fn, RequestContext};
//!
//! let timing = handler_fn(|ctx: &mut RequestContext| {
//!     Box::pin(async move {
//!         let start = std::time::Instant::now();
//!         let result = ctx.next().await;
//!         println!("took {:?}", start.elapsed());
//!         result
//!     })
//! });
//! ```
//!
//! [`abort`](RequestContext::abort) marks the chain exhausted without failing the request.

use crate::body::RequestBody;
use crate::error::{BodyError, BoxError, ChainError};
use crate::handler::BoxHandler;
use crate::pool::Recycle;
use crate::response::ResponseWriter;
use crate::router::build_url;
use crate::value::Value;
use crate::writer::{DataWriter, DefaultDataWriter, Renderer};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";

/// Largest urlencoded body [`RequestContext::post_form`] reads into memory.
pub const MAX_FORM_SIZE: usize = 10 << 20;

/// Application wide state every context of an [`App`](crate::App) can read.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) renderer: Option<Arc<dyn Renderer>>,
    pub(crate) routes: HashMap<String, String>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("renderer", &self.renderer.is_some())
            .field("routes", &self.routes)
            .finish()
    }
}

/// The state of one in-flight request.
pub struct RequestContext {
    request: Request<()>,
    peer_addr: Option<SocketAddr>,
    body: Option<RequestBody>,
    response: ResponseWriter,
    param_names: Vec<String>,
    param_values: Vec<String>,
    store: Option<HashMap<String, Value>>,
    handlers: Arc<[BoxHandler]>,
    // `None` until the chain starts, never greater than `handlers.len()`
    cursor: Option<usize>,
    cancellation: CancellationToken,
    writer: Option<Arc<dyn DataWriter>>,
    shared: Arc<Shared>,
    post_form: Option<Vec<(String, String)>>,
}

impl RequestContext {
    /// Creates a standalone context running `handlers`, mostly useful to test handlers.
    pub fn new<B: Into<RequestBody>>(request: Request<B>, handlers: Vec<BoxHandler>) -> Self {
        let mut ctx = Self::blank(Arc::new(Shared::default()));
        ctx.reset(request, None);
        ctx.set_handlers(handlers.into());
        ctx
    }

    pub(crate) fn blank(shared: Arc<Shared>) -> Self {
        Self {
            request: Request::default(),
            peer_addr: None,
            body: None,
            response: ResponseWriter::new(),
            param_names: Vec::new(),
            param_values: Vec::new(),
            store: None,
            handlers: Arc::from(Vec::new()),
            cursor: None,
            cancellation: CancellationToken::new(),
            writer: None,
            shared,
            post_form: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_shared(mut self, shared: Arc<Shared>) -> Self {
        self.shared = shared;
        self
    }

    /// Prepares the context for a new request, dropping everything left by the previous one.
    pub fn reset<B: Into<RequestBody>>(&mut self, request: Request<B>, peer_addr: Option<SocketAddr>) {
        let (parts, body) = request.into_parts();
        self.request = Request::from_parts(parts, ());
        self.body = Some(body.into());
        self.peer_addr = peer_addr;
        self.response.reset();
        self.param_names.clear();
        self.param_values.clear();
        self.store = None;
        self.cursor = None;
        self.cancellation = CancellationToken::new();
        self.writer = None;
        self.post_form = None;
    }

    /// Sets the chain to run and rewinds the cursor.
    pub fn set_handlers(&mut self, handlers: Arc<[BoxHandler]>) {
        self.handlers = handlers;
        self.cursor = None;
    }

    // ---------------------------------------------------------------------
    // chain control
    // ---------------------------------------------------------------------

    /// Runs the handlers after the current one.
    ///
    /// Each handler runs at most once. The first error stops the chain and is returned as is.
    pub async fn next(&mut self) -> Result<(), ChainError> {
        self.advance();
        while let Some(handler) = self.current_handler() {
            handler.call(self).await?;
            self.advance();
        }
        Ok(())
    }

    /// Skips every handler that has not started yet.
    #[inline]
    pub fn abort(&mut self) {
        self.cursor = Some(self.handlers.len());
    }

    /// Index of the running handler, `None` before the chain starts.
    #[inline]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Whether no handler is left to run.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.cursor == Some(self.handlers.len())
    }

    #[inline]
    pub fn handlers_len(&self) -> usize {
        self.handlers.len()
    }

    fn advance(&mut self) {
        let next = self.cursor.map_or(0, |cursor| cursor + 1);
        self.cursor = Some(next.min(self.handlers.len()));
    }

    fn current_handler(&self) -> Option<BoxHandler> {
        self.cursor.and_then(|cursor| self.handlers.get(cursor)).map(Arc::clone)
    }

    // ---------------------------------------------------------------------
    // request
    // ---------------------------------------------------------------------

    /// The request head; its body lives in [`take_body`](Self::take_body).
    #[inline]
    pub fn request(&self) -> &Request<()> {
        &self.request
    }

    #[inline]
    pub fn request_mut(&mut self) -> &mut Request<()> {
        &mut self.request
    }

    #[inline]
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.request.version()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// The address of the connected peer, when the transport provided it.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Takes the request body, `None` if a handler already took it.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    pub fn body_mut(&mut self) -> Option<&mut RequestBody> {
        self.body.as_mut()
    }

    /// Replaces the request body seen by the following handlers.
    pub fn set_body(&mut self, body: RequestBody) {
        self.body = Some(body);
    }

    /// Reads the whole remaining request body.
    pub async fn body_bytes(&mut self) -> Result<Bytes, ChainError> {
        let body = self.body.take().ok_or(BodyError::Consumed)?;
        Ok(body.bytes().await?)
    }

    // ---------------------------------------------------------------------
    // route parameters
    // ---------------------------------------------------------------------

    /// The value of the named route parameter, empty if the route has no such parameter.
    pub fn param(&self, name: &str) -> &str {
        self.param_names
            .iter()
            .position(|n| n == name)
            .and_then(|index| self.param_values.get(index))
            .map_or("", String::as_str)
    }

    /// Replaces the route parameters.
    pub fn set_params<I, K, V>(&mut self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.param_names.clear();
        self.param_values.clear();
        for (name, value) in params {
            self.param_names.push(name.into());
            self.param_values.push(value.into());
        }
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn param_values(&self) -> &[String] {
        &self.param_values
    }

    /// Iterates over `(name, value)` route parameters in route order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.param_names.iter().map(String::as_str).zip(self.param_values.iter().map(String::as_str))
    }

    // ---------------------------------------------------------------------
    // store
    // ---------------------------------------------------------------------

    /// The item stored under `name` by an earlier [`set`](Self::set) of this request.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.store.as_ref()?.get(name)
    }

    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        self.store.get_or_insert_with(HashMap::new).insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.as_ref().is_some_and(|store| store.contains_key(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.store.as_mut()?.remove(name)
    }

    /// Merges `data` into the store.
    pub fn set_store<I, K, V>(&mut self, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let store = self.store.get_or_insert_with(HashMap::new);
        store.extend(data.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// The whole store, `None` if nothing was stored during this request.
    pub fn store(&self) -> Option<&HashMap<String, Value>> {
        self.store.as_ref()
    }

    // ---------------------------------------------------------------------
    // query and form values
    // ---------------------------------------------------------------------

    /// The first value of the named URL query parameter, else `default`, else an empty string.
    pub fn query(&self, name: &str, default: Option<&str>) -> String {
        self.uri()
            .query()
            .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
            .and_then(|pairs| first_value(&pairs, name).map(str::to_string))
            .unwrap_or_else(|| default.unwrap_or_default().to_string())
    }

    /// The first value of the named field of an urlencoded POST, PUT or PATCH body.
    ///
    /// The body is read on first use, reading can fail with the error of a body limit. Bodies over
    /// [`MAX_FORM_SIZE`] fail with [`ChainError::RequestEntityTooLarge`].
    pub async fn post_form(&mut self, name: &str, default: Option<&str>) -> Result<String, ChainError> {
        let values = self.parse_post_form().await?;
        Ok(first_value(values, name).unwrap_or(default.unwrap_or_default()).to_string())
    }

    /// Like [`post_form`](Self::post_form), falling back to the URL query.
    pub async fn form(&mut self, name: &str, default: Option<&str>) -> Result<String, ChainError> {
        let values = self.parse_post_form().await?;
        if let Some(value) = first_value(values, name) {
            return Ok(value.to_string());
        }
        Ok(self.query(name, default))
    }

    async fn parse_post_form(&mut self) -> Result<&[(String, String)], ChainError> {
        if self.post_form.is_none() {
            let values = if self.has_form_body() {
                let body = self.body.take().ok_or(BodyError::Consumed)?;
                let bytes = Limited::new(body, MAX_FORM_SIZE).collect().await.map_err(form_body_error)?.to_bytes();
                serde_urlencoded::from_bytes::<Vec<(String, String)>>(&bytes).map_err(ChainError::bad_request)?
            } else {
                Vec::new()
            };
            self.post_form = Some(values);
        }
        Ok(self.post_form.as_deref().unwrap_or_default())
    }

    fn has_form_body(&self) -> bool {
        matches!(self.method(), &Method::POST | &Method::PUT | &Method::PATCH)
            && self
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<mime::Mime>().ok())
                .is_some_and(|mime| mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
    }

    // ---------------------------------------------------------------------
    // reverse routing
    // ---------------------------------------------------------------------

    /// Builds the path of a named route, filling its parameters from `pairs`.
    ///
    /// Values are query-escaped, parameters without a value keep their `{name}` token, an unknown
    /// route name yields an empty string.
    pub fn url(&self, route: &str, pairs: &[(&str, &str)]) -> String {
        self.shared.routes.get(route).map(|template| build_url(template, pairs)).unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // response
    // ---------------------------------------------------------------------

    #[inline]
    pub fn response(&self) -> &ResponseWriter {
        &self.response
    }

    #[inline]
    pub fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    /// Replaces the writer used by [`write`](Self::write) for the rest of this request.
    pub fn set_data_writer(&mut self, writer: Arc<dyn DataWriter>) {
        self.writer = Some(writer);
    }

    /// Writes `data` to the response body through the current data writer.
    pub fn write<V: Into<Value>>(&mut self, data: V) -> Result<(), ChainError> {
        match &self.writer {
            Some(writer) => writer.write(&mut self.response, data.into()),
            None => DefaultDataWriter.write(&mut self.response, data.into()),
        }
    }

    /// Responds with a plain text body and ends the chain.
    pub fn string<S: Into<String>>(&mut self, body: S, status: Option<StatusCode>) -> Result<(), ChainError> {
        self.response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF_8));
        self.response.write_header(status.unwrap_or(StatusCode::OK));
        let result = self.write(Value::Str(body.into()));
        self.abort();
        result
    }

    /// Responds with the named template rendered by the app's [`Renderer`] and ends the chain.
    pub fn render(&mut self, name: &str, status: Option<StatusCode>) -> Result<(), ChainError> {
        let renderer = self.shared.renderer.as_ref().map(Arc::clone).ok_or(ChainError::RendererNotConfigured)?;
        let content = renderer.render(name, self).map_err(ChainError::render)?;

        self.response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML_UTF_8));
        self.response.write_header(status.unwrap_or(StatusCode::OK));
        let result = self.write(Value::Bytes(content));
        self.abort();
        result
    }

    /// Responds without a body and ends the chain.
    pub fn no_content(&mut self, status: Option<StatusCode>) -> Result<(), ChainError> {
        self.response.write_header(status.unwrap_or(StatusCode::OK));
        self.abort();
        Ok(())
    }

    pub(crate) fn take_response(&mut self) -> http::Response<crate::ResponseBody> {
        self.response.take(self.request.version())
    }

    // ---------------------------------------------------------------------
    // cancellation
    // ---------------------------------------------------------------------

    /// Token cancelled once the request is finished, handlers can hand it to spawned work.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }
}

// a body limit in the chain reports its own limit, the cap here reports the form limit
fn form_body_error(e: BoxError) -> ChainError {
    if e.is::<LengthLimitError>() {
        return ChainError::RequestEntityTooLarge { limit: MAX_FORM_SIZE as u64 };
    }
    BodyError::source(e).into()
}

fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
}

impl Recycle for RequestContext {
    fn recycle(&mut self) {
        self.cancellation.cancel();
        self.request = Request::default();
        self.peer_addr = None;
        self.body = None;
        self.response.reset();
        self.param_names.clear();
        self.param_values.clear();
        self.store = None;
        self.cursor = None;
        self.writer = None;
        self.post_form = None;
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("peer_addr", &self.peer_addr)
            .field("params", &self.params().collect::<Vec<_>>())
            .field("cursor", &self.cursor)
            .field("handlers", &self.handlers.len())
            .field("status", &self.response.status())
            .finish_non_exhaustive()
    }
}
