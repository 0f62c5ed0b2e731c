//! The dispatch entry point handed to a transport.
//!
//! [`App::handle`] runs one request: it checks a [`RequestContext`] out of the pool, resolves the
//! route chain, runs it, hands a failure to the [`ErrorHandler`] and returns the response. The
//! context goes back to the pool when `handle` returns or its future is dropped.

use crate::body::{RequestBody, ResponseBody};
use crate::context::{RequestContext, Shared};
use crate::error::{BoxError, ChainError, ConfigError};
use crate::error_handler::{DefaultErrorHandler, ErrorHandler};
use crate::handler::{BoxHandler, Handler, handler_fn};
use crate::pool::Pool;
use crate::router::{Router, RouterError};
use crate::writer::Renderer;
use bytes::Bytes;
use http::header::ALLOW;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, info_span};

const DEFAULT_POOL_SIZE: usize = 256;

/// A built application, share it behind an [`Arc`] between connection tasks.
pub struct App {
    router: Router,
    not_found: Arc<[BoxHandler]>,
    method_not_allowed: Arc<[BoxHandler]>,
    error_handler: Arc<dyn ErrorHandler>,
    contexts: Pool<RequestContext>,
}

#[derive(Error, Debug)]
pub enum AppBuildError {
    #[error("router must be set")]
    MissingRouter,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Runs `request` through its chain and returns the response.
    pub async fn handle<B>(&self, request: Request<B>, peer_addr: Option<SocketAddr>) -> Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let span = info_span!("request", method = %request.method(), path = request.uri().path());

        let mut ctx = self.contexts.checkout();
        ctx.reset(request.map(RequestBody::new), peer_addr);
        self.route(&mut ctx);

        if let Err(e) = ctx.next().instrument(span.clone()).await {
            span.in_scope(|| self.error_handler.handle(&mut ctx, e));
        }

        ctx.take_response()
    }

    fn route(&self, ctx: &mut RequestContext) {
        let uri = ctx.uri().clone();
        let result = self.router.at(uri.path());

        let handlers = match result.items().iter().find(|item| item.matches(ctx)) {
            Some(item) => {
                ctx.set_params(result.params());
                Arc::clone(item.handlers())
            }
            None if result.is_empty() => Arc::clone(&self.not_found),
            None => {
                if let Some(allow) = result.allow() {
                    ctx.response_mut().headers_mut().insert(ALLOW, allow.clone());
                }
                Arc::clone(&self.method_not_allowed)
            }
        };
        ctx.set_handlers(handlers);
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The number of contexts waiting in the pool.
    pub fn idle_contexts(&self) -> usize {
        self.contexts.idle_len()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("router", &self.router).field("contexts", &self.contexts).finish_non_exhaustive()
    }
}

pub struct AppBuilder {
    router: Option<Router>,
    middleware: Vec<BoxHandler>,
    renderer: Option<Arc<dyn Renderer>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    pool_size: usize,
    error: Option<AppBuildError>,
}

impl AppBuilder {
    fn new() -> Self {
        Self {
            router: None,
            middleware: Vec::new(),
            renderer: None,
            error_handler: None,
            pool_size: DEFAULT_POOL_SIZE,
            error: None,
        }
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Appends a handler that runs in front of every route chain, in registration order.
    pub fn middleware<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.middleware.push(Arc::new(handler));
        self
    }

    /// Like [`middleware`](Self::middleware) for middleware whose construction can fail, the first
    /// failure is returned by [`build`](Self::build).
    pub fn try_middleware<H, E>(mut self, handler: Result<H, E>) -> Self
    where
        H: Handler + 'static,
        E: Into<AppBuildError>,
    {
        match handler {
            Ok(handler) => self.middleware.push(Arc::new(handler)),
            Err(e) => {
                self.error.get_or_insert(e.into());
            }
        }
        self
    }

    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Replaces [`DefaultErrorHandler`].
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Arc::new(error_handler));
        self
    }

    /// Maximum number of idle contexts kept for reuse.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn build(self) -> Result<App, AppBuildError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut router = self.router.ok_or(AppBuildError::MissingRouter)?;
        router.prepend(&self.middleware);

        let not_found = fallback_chain(&self.middleware, not_found_handler());
        let method_not_allowed = fallback_chain(&self.middleware, method_not_allowed_handler());

        let shared = Arc::new(Shared { renderer: self.renderer, routes: router.names().clone() });
        let contexts = Pool::new(self.pool_size, move || RequestContext::blank(Arc::clone(&shared)));

        Ok(App {
            router,
            not_found,
            method_not_allowed,
            error_handler: self.error_handler.unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
            contexts,
        })
    }
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("router", &self.router)
            .field("middleware", &self.middleware.len())
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

fn fallback_chain(middleware: &[BoxHandler], last: BoxHandler) -> Arc<[BoxHandler]> {
    middleware.iter().map(Arc::clone).chain(std::iter::once(last)).collect()
}

fn not_found_handler() -> BoxHandler {
    Arc::new(handler_fn(|_ctx| Box::pin(async { Err(ChainError::http(StatusCode::NOT_FOUND, "not found")) })))
}

fn method_not_allowed_handler() -> BoxHandler {
    Arc::new(handler_fn(|_ctx| {
        Box::pin(async { Err(ChainError::http(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")) })
    }))
}

#[cfg(test)]
mod tests {
    use super::{App, AppBuildError};
    use crate::error::{ChainError, ConfigError};
    use crate::handler::handler_fn;
    use crate::limit::BodyLimit;
    use crate::router::{Router, get, post};
    use crate::RequestContext;
    use bytes::Bytes;
    use http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hello(ctx: &mut RequestContext) -> futures::future::BoxFuture<'_, Result<(), ChainError>> {
        Box::pin(async move {
            let name = ctx.param("name").to_string();
            ctx.string(format!("hello {name}"), None)
        })
    }

    fn router() -> Router {
        Router::builder()
            .route("/hello/{name}", get(handler_fn(hello)))
            .route("/hello/{name}", post(handler_fn(hello)))
            .build()
            .unwrap()
    }

    fn request(method: Method, uri: &str) -> Request<http_body_util::Empty<Bytes>> {
        Request::builder().method(method).uri(uri).body(http_body_util::Empty::new()).unwrap()
    }

    async fn body_string(response: http::Response<crate::ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn routes_and_responds() {
        let app = App::builder().router(router()).build().unwrap();

        let response = app.handle(request(Method::GET, "/hello/world"), None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[http::header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body_string(response).await, "hello world");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn not_found() {
        let app = App::builder().router(router()).build().unwrap();

        let response = app.handle(request(Method::GET, "/missing"), None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "not found");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn method_not_allowed() {
        let app = App::builder().router(router()).build().unwrap();

        let response = app.handle(request(Method::DELETE, "/hello/world"), None).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[http::header::ALLOW], "GET, POST");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn middleware_wraps_routes_and_fallbacks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let count = handler_fn(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { ctx.next().await })
        });
        let app = App::builder().router(router()).middleware(count).build().unwrap();

        app.handle(request(Method::GET, "/hello/a"), None).await;
        app.handle(request(Method::GET, "/missing"), None).await;
        app.handle(request(Method::PUT, "/hello/a"), None).await;

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn error_handler_called_once_with_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let failing = Router::builder()
            .route(
                "/fail",
                get(handler_fn(|_ctx| Box::pin(async { Err(ChainError::http(StatusCode::CONFLICT, "first")) })))
                    .and(handler_fn(|_ctx| Box::pin(async { Err(ChainError::http(StatusCode::GONE, "second")) }))),
            )
            .build()
            .unwrap();
        let app = App::builder()
            .router(failing)
            .error_handler(move |ctx: &mut RequestContext, e: ChainError| {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.response_mut().write_header(e.status());
            })
            .build()
            .unwrap();

        let response = app.handle(request(Method::GET, "/fail"), None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn contexts_are_reused_and_clean() {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let stash = handler_fn(|ctx| {
            Box::pin(async move {
                let fresh = ctx.get("visited").is_none() && !ctx.cancellation().is_cancelled();
                ctx.set("visited", true);
                ctx.string(if fresh { "fresh" } else { "dirty" }, None)
            })
        });
        let router = Router::builder().route("/", get(stash)).build().unwrap();
        let app = App::builder().router(router).pool_size(1).build().unwrap();

        for _ in 0..3 {
            let response = app.handle(request(Method::GET, "/"), Some(peer)).await;
            assert_eq!(body_string(response).await, "fresh");
        }
        assert_eq!(app.idle_contexts(), 1);
    }

    #[test]
    fn missing_router() {
        assert!(matches!(App::builder().build(), Err(AppBuildError::MissingRouter)));
    }

    #[test]
    fn failed_middleware_fails_build() {
        let result = App::builder().router(router()).try_middleware(BodyLimit::new("4X")).build();
        assert!(matches!(result, Err(AppBuildError::Config(ConfigError::InvalidSize { .. }))));
    }
}
