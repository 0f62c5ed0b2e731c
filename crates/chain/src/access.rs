//! Access logging middleware.
//!
//! [`AccessLog`] times the rest of the chain and reports one [`AccessEntry`] per request, its
//! [`Display`](fmt::Display) form is the classic access log line:
//!
//! ```text
//! [10.0.0.7] [0.412ms] GET /users/7?full=1 HTTP/1.1 200 42
//! ```

use crate::error::ChainError;
use crate::handler::Handler;
use crate::RequestContext;
use async_trait::async_trait;
use http::{Method, StatusCode, Uri, Version};
use std::fmt;
use std::time::Instant;
use tracing::info;

const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// What [`AccessLog`] knows about a finished request.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEntry {
    pub client_ip: String,
    pub elapsed_ms: f64,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub status: StatusCode,
    pub bytes_written: u64,
}

impl AccessEntry {
    /// `"{method} {uri} {version}"`, e.g. `GET /a?b=1 HTTP/1.1`.
    pub fn request_line(&self) -> String {
        format!("{} {} {:?}", self.method, self.uri, self.version)
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{:.3}ms] {} {} {}",
            self.client_ip,
            self.elapsed_ms,
            self.request_line(),
            self.status.as_u16(),
            self.bytes_written
        )
    }
}

type Callback = dyn Fn(&AccessEntry) + Send + Sync;

/// Middleware reporting every request to a callback.
///
/// The entry is produced when the downstream chain returns, so it sees the status and size written by
/// handlers. When the chain failed before anything was written the entry carries the status of the
/// error. The chain result is passed through unchanged.
pub struct AccessLog {
    callback: Box<Callback>,
}

impl AccessLog {
    /// Calls `callback` with the entry of each request, the callback must not block.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&AccessEntry) + Send + Sync + 'static,
    {
        Self { callback: Box::new(callback) }
    }

    /// Emits every entry as an `info` event with target `micro_chain::access`.
    pub fn tracing() -> Self {
        Self::new(|entry| {
            info!(
                target: "micro_chain::access",
                client_ip = %entry.client_ip,
                elapsed_ms = entry.elapsed_ms,
                method = %entry.method,
                uri = %entry.uri,
                status = entry.status.as_u16(),
                bytes_written = entry.bytes_written,
                "{entry}"
            );
        })
    }
}

impl fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for AccessLog {
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), ChainError> {
        let start = Instant::now();

        let result = ctx.next().await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let response = ctx.response();
        let status = match &result {
            Err(e) if !response.committed() => e.status(),
            _ => response.status(),
        };
        let entry = AccessEntry {
            client_ip: client_ip(ctx),
            elapsed_ms,
            method: ctx.method().clone(),
            uri: ctx.uri().clone(),
            version: ctx.version(),
            status,
            bytes_written: response.bytes_written(),
        };
        (self.callback)(&entry);

        result
    }
}

/// The address of the client, as told by `X-Real-IP`, then `X-Forwarded-For`, then the peer address.
///
/// A port is removed: `1.2.3.4:5678` gives `1.2.3.4`, `[::1]:80` gives `::1`, a bare IPv6 address
/// is kept as is. Empty when nothing is known.
pub fn client_ip(ctx: &RequestContext) -> String {
    if let Some(ip) = header_value(ctx, X_REAL_IP) {
        return strip_port(ip).to_string();
    }
    if let Some(ip) = header_value(ctx, X_FORWARDED_FOR).and_then(|value| value.split(',').next()).map(str::trim) {
        return strip_port(ip).to_string();
    }
    ctx.peer_addr().map(|addr| addr.ip().to_string()).unwrap_or_default()
}

fn header_value<'a>(ctx: &'a RequestContext, name: &str) -> Option<&'a str> {
    ctx.headers().get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty())
}

fn strip_port(addr: &str) -> &str {
    if let Some(bracketed) = addr.strip_prefix('[') {
        return bracketed.split_once(']').map_or(addr, |(ip, _)| ip);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessEntry, AccessLog, client_ip, strip_port};
    use crate::error::ChainError;
    use crate::handler::{BoxHandler, handler_fn};
    use crate::RequestContext;
    use http::{Method, Request, StatusCode, Version};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn ctx_with(headers: &[(&str, &str)], peer: Option<&str>) -> RequestContext {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut ctx = RequestContext::new(Request::new(()), vec![]);
        ctx.reset(builder.body(()).unwrap(), peer.map(|p| p.parse::<SocketAddr>().unwrap()));
        ctx
    }

    #[test]
    fn client_ip_prefers_real_ip() {
        let ctx = ctx_with(&[("x-real-ip", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")], Some("3.3.3.3:80"));
        assert_eq!(client_ip(&ctx), "1.1.1.1");
    }

    #[test]
    fn client_ip_takes_first_forwarded_for() {
        let ctx = ctx_with(&[("x-forwarded-for", "2.2.2.2:1234, 10.0.0.1")], Some("3.3.3.3:80"));
        assert_eq!(client_ip(&ctx), "2.2.2.2");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&ctx_with(&[], Some("3.3.3.3:80"))), "3.3.3.3");
        assert_eq!(client_ip(&ctx_with(&[], Some("[::1]:8080"))), "::1");
        assert_eq!(client_ip(&ctx_with(&[("x-real-ip", "")], None)), "");
    }

    #[test]
    fn strips_ports() {
        assert_eq!(strip_port("1.2.3.4:5678"), "1.2.3.4");
        assert_eq!(strip_port("1.2.3.4"), "1.2.3.4");
        assert_eq!(strip_port("[::1]:80"), "::1");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("fe80::1:2"), "fe80::1:2");
    }

    #[test]
    fn display_format() {
        let entry = AccessEntry {
            client_ip: "127.0.0.1".to_string(),
            elapsed_ms: 1.23456,
            method: Method::GET,
            uri: "/users?id=1".parse().unwrap(),
            version: Version::HTTP_11,
            status: StatusCode::OK,
            bytes_written: 12,
        };
        assert_eq!(entry.request_line(), "GET /users?id=1 HTTP/1.1");
        assert_eq!(entry.to_string(), "[127.0.0.1] [1.235ms] GET /users?id=1 HTTP/1.1 200 12");
    }

    fn recording() -> (BoxHandler, Arc<Mutex<Vec<AccessEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&entries);
        (Arc::new(AccessLog::new(move |entry| sink.lock().unwrap().push(entry.clone()))), entries)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn logs_status_size_and_elapsed() {
        let (access, entries) = recording();
        let slow: BoxHandler = Arc::new(handler_fn(|ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.string("created!", Some(StatusCode::CREATED))
            })
        }));
        let request = Request::builder()
            .method(Method::POST)
            .uri("/items?x=1")
            .header("x-real-ip", "9.9.9.9")
            .body(())
            .unwrap();
        let mut ctx = RequestContext::new(request, vec![access, slow]);

        ctx.next().await.unwrap();

        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.client_ip, "9.9.9.9");
        assert_eq!(entry.status, StatusCode::CREATED);
        assert_eq!(entry.bytes_written, 8);
        assert_eq!(entry.request_line(), "POST /items?x=1 HTTP/1.1");
        assert!(entry.elapsed_ms >= 20.0, "elapsed {}", entry.elapsed_ms);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn error_passes_through_once() {
        let (access, entries) = recording();
        let failing: BoxHandler =
            Arc::new(handler_fn(|_ctx| Box::pin(async { Err(ChainError::http(StatusCode::FORBIDDEN, "denied")) })));
        let mut ctx = RequestContext::new(Request::builder().uri("/").body(()).unwrap(), vec![access, failing]);

        let error = ctx.next().await.unwrap_err();

        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, StatusCode::FORBIDDEN);
        assert_eq!(entries[0].bytes_written, 0);
    }
}
