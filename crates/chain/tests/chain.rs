use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use micro_chain::access::{AccessEntry, AccessLog};
use micro_chain::limit::BodyLimit;
use micro_chain::router::{Router, get, post};
use micro_chain::{App, ChainError, RequestContext, ResponseBody, handler_fn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct Fixture {
    app: App,
    entries: Arc<Mutex<Vec<AccessEntry>>>,
    errors: Arc<AtomicUsize>,
    tokens: Arc<Mutex<Vec<CancellationToken>>>,
}

fn fixture() -> Fixture {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let tokens = Arc::new(Mutex::new(Vec::new()));

    let tokens_in_handler = Arc::clone(&tokens);
    let router = Router::builder()
        .route(
            "/comments",
            post(handler_fn(|ctx| {
                Box::pin(async move {
                    let author = ctx.form("author", Some("anonymous")).await?;
                    let text = ctx.post_form("text", None).await?;
                    ctx.string(format!("{author}: {text}"), Some(StatusCode::CREATED))
                })
            })),
        )
        .route(
            "/session",
            get(handler_fn(move |ctx| {
                tokens_in_handler.lock().unwrap().push(ctx.cancellation().clone());
                Box::pin(async move {
                    let seen = ctx.contains("user");
                    ctx.set("user", "alice");
                    ctx.string(if seen { "stale" } else { "clean" }, None)
                })
            }))
            .name("session"),
        )
        .route(
            "/links/{id}",
            get(handler_fn(|ctx| {
                Box::pin(async move {
                    let link = ctx.url("session", &[]);
                    let id = ctx.param("id").to_string();
                    ctx.string(format!("{id} -> {link}"), None)
                })
            })),
        )
        .build()
        .unwrap();

    let sink = Arc::clone(&entries);
    let counter = Arc::clone(&errors);
    let app = App::builder()
        .router(router)
        .middleware(AccessLog::new(move |entry| sink.lock().unwrap().push(entry.clone())))
        .try_middleware(BodyLimit::new("16B"))
        .error_handler(move |ctx: &mut RequestContext, e: ChainError| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = ctx.string(e.to_string(), Some(e.status()));
        })
        .pool_size(4)
        .build()
        .unwrap();

    Fixture { app, entries, errors, tokens }
}

fn form_post(body: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::POST)
        .uri("/comments?author=query")
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Full<Bytes>> {
    Request::builder().method(Method::GET).uri(uri).body(Full::default()).unwrap()
}

async fn body_string(response: http::Response<ResponseBody>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn form_within_limit() {
    let fixture = fixture();
    let peer: SocketAddr = "192.168.1.9:51000".parse().unwrap();

    let response = fixture.app.handle(form_post("author=bob&text=hi"), Some(peer)).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "bob: hi");
    assert_eq!(fixture.errors.load(Ordering::SeqCst), 0);

    let entries = fixture.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].client_ip, "192.168.1.9");
    assert_eq!(entries[0].status, StatusCode::CREATED);
    assert_eq!(entries[0].bytes_written, 7);
    assert_eq!(entries[0].request_line(), "POST /comments?author=query HTTP/1.1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn form_falls_back_to_query_and_default() {
    let fixture = fixture();

    let response = fixture.app.handle(form_post("text=hi"), None).await;
    assert_eq!(body_string(response).await, "query: hi");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn oversized_form_is_rejected_once() {
    let fixture = fixture();

    let response = fixture.app.handle(form_post("author=bob&text=this+is+far+too+long"), None).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(fixture.errors.load(Ordering::SeqCst), 1);

    let entries = fixture.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn unknown_path_goes_through_middleware() {
    let fixture = fixture();

    let response = fixture.app.handle(get_request("/nope"), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(fixture.errors.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.entries.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn reused_context_starts_clean() {
    let fixture = fixture();

    for _ in 0..3 {
        let response = fixture.app.handle(get_request("/session"), None).await;
        assert_eq!(body_string(response).await, "clean");
    }

    let tokens = fixture.tokens.lock().unwrap();
    assert_eq!(tokens.len(), 3);
    assert!(tokens.iter().all(CancellationToken::is_cancelled));
    assert_eq!(fixture.app.idle_contexts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn named_route_url() {
    let fixture = fixture();

    let response = fixture.app.handle(get_request("/links/42"), None).await;
    assert_eq!(body_string(response).await, "42 -> /session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests() {
    let fixture = Arc::new(fixture());

    let mut tasks = Vec::new();
    for i in 0..32 {
        let fixture = Arc::clone(&fixture);
        tasks.push(tokio::spawn(async move {
            let uri = format!("/links/{i}");
            let response = fixture.app.handle(get_request(&uri), None).await;
            assert_eq!(body_string(response).await, format!("{i} -> /session"));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(fixture.entries.lock().unwrap().len(), 32);
    assert!(fixture.app.idle_contexts() <= 4);
}
