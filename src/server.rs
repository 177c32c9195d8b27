//! HTTP/1.1 listener.
//!
//! Translates hyper requests into [`RequestContext`]s, runs them through the
//! [`Matcher`] and writes the resulting [`ResponseContext`] back.

use crate::matcher::{Matcher, RequestContext, ResponseContext};
use crate::stanza::{normalize_header_key, StanzaTable};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Mock HTTP server
///
/// Serves the canned responses of a stanza table.
pub struct MockServer {
    matcher: Matcher,
    /// Requests handled since startup.
    requests_total: AtomicU64,
}

impl MockServer {
    pub fn new(table: StanzaTable) -> Self {
        info!(
            verbs = table.verbs().count(),
            routes = table.route_count(),
            rules = table.rule_count(),
            "Mock server initialized"
        );

        Self {
            matcher: Matcher::new(table),
            requests_total: AtomicU64::new(0),
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Get total requests handled.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    ///
    /// Each connection is served on its own task, so a delayed response only
    /// holds up its own connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(address = %listener.local_addr()?, "Listening");

        loop {
            let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %err, "Connection closed with error");
                }
            });
        }
    }

    /// Handle one request.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let ctx = match request_context(req).await {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(error = %err, "Failed to read request body");
                return into_http(ResponseContext::fallback());
            }
        };

        let response = self.matcher.respond(&ctx).await;
        info!(
            method = %ctx.method,
            path = %ctx.path,
            status = response.status.code(),
            "Request served"
        );
        into_http(response)
    }
}

/// Build the matcher's view of a request.
///
/// Header keys are normalized; for a repeated header the first value wins.
async fn request_context<B>(req: Request<B>) -> Result<RequestContext, B::Error>
where
    B: Body,
{
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let mut ctx = RequestContext::new(parts.method.as_str(), parts.uri.path())
        .with_query(parts.uri.query().unwrap_or(""))
        .with_body(body);

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            ctx.headers
                .entry(normalize_header_key(name.as_str()))
                .or_insert_with(|| value.to_string());
        }
    }

    Ok(ctx)
}

fn into_http(response: ResponseContext) -> Response<Full<Bytes>> {
    if response.status.is_informational() {
        warn!(status = %response.status, "Informational status cannot be a final response, sending fallback");
        return plain_fallback();
    }

    let mut builder = Response::builder()
        .status(response.status.code())
        .extension(ReasonPhrase::from_static(response.status.reason().as_bytes()));
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    match builder.body(Full::new(response.body)) {
        Ok(http) => http,
        Err(err) => {
            warn!(error = %err, "Stanza response cannot be encoded, sending fallback");
            plain_fallback()
        }
    }
}

/// The fallback, built without any fallible step.
fn plain_fallback() -> Response<Full<Bytes>> {
    let fallback = ResponseContext::fallback();
    let mut http = Response::new(Full::new(fallback.body));
    *http.status_mut() = StatusCode::BAD_REQUEST;
    http.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const STANZAS: &str = "\
> GET
> /hello
< status 418
< body world
.
> POST
> /login
> header Content-Type: application/json
> param name is alice
< status 201
< header X-Session: abc123
< body welcome
.
> PUT
> /echo
< echo
.
> GET
> /bad-header
< header Bad Header: x
< body never sent
.
> GET
> /processing
< status 102
< body never sent
.
";

    fn server() -> MockServer {
        MockServer::new(parse(STANZAS).unwrap())
    }

    async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn request(method: &str, uri: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn test_handle_status_and_reason() {
        let server = server();
        let response = server.handle(request("GET", "/hello", "")).await;

        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(
            response.extensions().get::<ReasonPhrase>().map(|r| r.as_bytes()),
            Some(&b"I'm a teapot"[..])
        );
        assert_eq!(body_of(response).await, "world");
        assert_eq!(server.total_requests(), 1);
    }

    #[tokio::test]
    async fn test_handle_normalizes_headers() {
        let server = server();
        let req = Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(br#"{"name": "alice"}"#)))
            .unwrap();

        let response = server.handle(req).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["X-Session"], "abc123");
        assert_eq!(body_of(response).await, "welcome");
    }

    #[tokio::test]
    async fn test_handle_echo_and_fallback() {
        let server = server();

        let response = server.handle(request("PUT", "/echo?x=1", "payload")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "payload");

        let response = server.handle(request("DELETE", "/hello", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(response).await, "Sorry I couldn't help.");
    }

    #[tokio::test]
    async fn test_unencodable_response_degrades_to_fallback() {
        let server = server();
        let response = server.handle(request("GET", "/bad-header", "")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await, "Sorry I couldn't help.");
    }

    #[tokio::test]
    async fn test_informational_status_degrades_to_fallback() {
        let server = server();
        let response = server.handle(request("GET", "/processing", "")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(response).await, "Sorry I couldn't help.");
    }

    #[tokio::test]
    async fn test_request_context_keeps_first_header_value() {
        let req = Request::builder()
            .method("GET")
            .uri("/q?a=1&b=2")
            .header("X-Dup", "first")
            .header("X-Dup", "second")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let ctx = request_context(req).await.unwrap();
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.path, "/q");
        assert_eq!(ctx.query_string, "a=1&b=2");
        assert_eq!(ctx.headers["HTTP_X_DUP"], "first");
        assert!(ctx.body.is_empty());
    }

    async fn exchange(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let head = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(head.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        String::from_utf8_lossy(&raw).into_owned()
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server());
        tokio::spawn(Arc::clone(&server).serve(listener));

        let text = exchange(addr, "/hello").await;
        assert!(text.starts_with("HTTP/1.1 418 I'm a teapot\r\n"), "{text}");
        assert!(text.ends_with("world"), "{text}");

        let text = exchange(addr, "/processing").await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
        assert!(text.ends_with("Sorry I couldn't help."), "{text}");

        assert_eq!(server.total_requests(), 2);
    }
}
