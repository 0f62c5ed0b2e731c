//! Runs a few requests through an app in process and prints the responses.
//!
//! ```bash
//! cargo run --example chain_server
//! ```

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use micro_chain::access::AccessLog;
use micro_chain::filter::get_method;
use micro_chain::limit::{BodyLimit, BodyLimitConfig};
use micro_chain::router::{Router, get, post};
use micro_chain::{App, BoxError, ChainError, Renderer, RequestContext, handler_fn};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Replaces `{{name}}` with the `name` route parameter.
struct PageRenderer;

impl Renderer for PageRenderer {
    fn render(&self, name: &str, ctx: &RequestContext) -> Result<Bytes, BoxError> {
        let template = match name {
            "greeting" => "<h1>Hello, {{name}}!</h1>",
            _ => return Err(format!("template '{name}' not found").into()),
        };
        Ok(Bytes::from(template.replace("{{name}}", ctx.param("name"))))
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let router = Router::builder()
        .route(
            "/greet/{name}",
            get(handler_fn(|ctx: &mut RequestContext| Box::pin(async move { ctx.render("greeting", None) })))
                .name("greet"),
        )
        .route(
            "/notes",
            post(handler_fn(|ctx: &mut RequestContext| {
                Box::pin(async move {
                    let note = ctx.post_form("note", None).await?;
                    if note.is_empty() {
                        return Err(ChainError::bad_request("note is required"));
                    }
                    let location = ctx.url("greet", &[("name", "notes")]);
                    ctx.string(format!("saved '{note}', see {location}"), Some(StatusCode::CREATED))
                })
            })),
        )
        .build()?;

    let body_limit =
        BodyLimit::with_config(BodyLimitConfig { limit: "64B".to_string(), skipper: Some(Arc::new(get_method())) });
    let app = App::builder()
        .router(router)
        .middleware(AccessLog::tracing())
        .try_middleware(body_limit)
        .renderer(PageRenderer)
        .build()?;

    let requests = vec![
        request(Method::GET, "/greet/world", ""),
        request(Method::POST, "/notes", "note=buy+milk"),
        request(Method::POST, "/notes", "other=1"),
        request(Method::POST, "/notes", "note=this+note+is+definitely+longer+than+the+sixty+four+byte+limit"),
        request(Method::DELETE, "/notes", ""),
        request(Method::GET, "/missing", ""),
    ];

    let peer: SocketAddr = "127.0.0.1:40000".parse()?;
    for request in requests {
        let line = format!("{} {}", request.method(), request.uri());
        let response = app.handle(request, Some(peer)).await;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        info!(request = %line, %status, body = %String::from_utf8_lossy(&body), "response");
    }

    Ok(())
}

fn request(method: Method, uri: &str, form: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(form.as_bytes())))
        .unwrap_or_default()
}
