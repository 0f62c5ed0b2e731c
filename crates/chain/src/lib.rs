//! The request context and middleware chain of the micro web framework.
//!
//! Every request runs through an ordered chain of [`Handler`]s sharing one [`RequestContext`]. A
//! handler can call [`RequestContext::next`] to wrap the rest of the chain, end it early with
//! [`RequestContext::abort`], or fail it by returning a [`ChainError`], which the [`App`] hands to
//! its [`ErrorHandler`].
//!
//! ```no_run
//! use micro_chain::access::AccessLog;
//! use micro_chain::limit::BodyLimit;
//! use micro_chain::router::{get, Router};
//! use micro_chain::{handler_fn, App, RequestContext};
//!
//! # async fn serve(request: http::Request<http_body_util::Full<bytes::Bytes>>) {
//! let router = Router::builder()
//!     .route("/hello/{name}", get(handler_fn(|ctx: &mut RequestContext| {
//!         Box::pin(async move {
//!             let name = ctx.param("name").to_string();
//!             ctx.string(format!("hello {name}"), None)
//!         })
//!     })))
//!     .build()
//!     .unwrap();
//!
//! let app = App::builder()
//!     .router(router)
//!     .middleware(AccessLog::tracing())
//!     .try_middleware(BodyLimit::new("4M"))
//!     .build()
//!     .unwrap();
//!
//! let response = app.handle(request, None).await;
//! # }
//! ```

mod app;
mod body;
mod context;
mod error;
mod error_handler;
mod handler;
mod response;
mod value;
mod writer;

pub mod access;
pub mod filter;
pub mod limit;
pub mod pool;
pub mod router;
pub mod size;

pub use app::App;
pub use app::AppBuildError;
pub use app::AppBuilder;
pub use body::RequestBody;
pub use body::ResponseBody;
pub use context::MAX_FORM_SIZE;
pub use context::RequestContext;
pub use error::BodyError;
pub use error::BoxError;
pub use error::ChainError;
pub use error::ConfigError;
pub use error_handler::DefaultErrorHandler;
pub use error_handler::ErrorHandler;
pub use handler::handler_fn;
pub use handler::BoxHandler;
pub use handler::FnHandler;
pub use handler::Handler;
pub use response::ResponseWriter;
pub use router::Router;
pub use value::Value;
pub use writer::DataWriter;
pub use writer::DefaultDataWriter;
pub use writer::Renderer;
