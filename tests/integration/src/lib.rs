//! End-to-end tests for the Rustack async HTTP transport.
//!
//! Every test starts its own in-process servers on loopback ports, so no
//! external service is needed. Run them with:
//! ```text
//! cargo test -p rustack-nio-integration
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::request::Parts;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use rustack_nio_client::{NioAsyncHttpClient, RequestBody};
use rustack_nio_core::{NioConfig, ProxyConfig};
use rustls::pki_types::PrivatePkcs8KeyDer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Create a client with `config`.
#[must_use]
pub fn client(config: NioConfig) -> NioAsyncHttpClient {
    init_tracing();
    NioAsyncHttpClient::builder()
        .config(config)
        .build()
        .expect("failed to build client")
}

/// A `GET` request with an empty body.
#[must_use]
pub fn get(uri: &str) -> Request<RequestBody> {
    Request::get(uri)
        .body(RequestBody::empty())
        .expect("invalid request")
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// passes. Returns whether it held.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// HTTP test server
// ---------------------------------------------------------------------------

/// Request handler of a [`TestServer`]: request head and collected body in,
/// response out.
pub type Handler = Arc<dyn Fn(Parts, Bytes) -> BoxFuture<'static, Response<Full<Bytes>>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Parts, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    Arc::new(move |parts, body| f(parts, body).boxed())
}

/// Answers with the request body, or `METHOD /path` when the body is empty.
#[must_use]
pub fn echo() -> Handler {
    handler(|parts, body| async move {
        let body = if body.is_empty() {
            Bytes::from(format!("{} {}", parts.method, parts.uri.path()))
        } else {
            body
        };
        Response::new(Full::new(body))
    })
}

/// Like [`echo`], after sleeping for `delay`.
#[must_use]
pub fn delayed_echo(delay: Duration) -> Handler {
    let echo = echo();
    handler(move |parts, body| {
        let echo = Arc::clone(&echo);
        async move {
            tokio::time::sleep(delay).await;
            echo(parts, body).await
        }
    })
}

/// Connection counters of a server.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Connections accepted.
    pub accepted: AtomicUsize,
    /// Connections that have ended.
    pub closed: AtomicUsize,
    /// Requests received.
    pub requests: AtomicUsize,
}

impl ServerStats {
    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections ended so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
enum Mode {
    Http1,
    Http2,
    Tls(TlsAcceptor),
}

/// An in-process hyper server on a loopback port.
pub struct TestServer {
    addr: SocketAddr,
    secure: bool,
    stats: Arc<ServerStats>,
    go_away: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl fmt::Debug for TestServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestServer")
            .field("addr", &self.addr)
            .field("secure", &self.secure)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TestServer {
    /// Plain HTTP/1.1 server.
    pub async fn http1(handler: Handler) -> Self {
        Self::start(Mode::Http1, handler).await
    }

    /// Plain HTTP/2 server (prior knowledge).
    pub async fn http2(handler: Handler) -> Self {
        Self::start(Mode::Http2, handler).await
    }

    /// TLS server with a self-signed certificate for `localhost`, offering
    /// `alpn` in preference order. Without ALPN it speaks HTTP/1.1.
    pub async fn tls(handler: Handler, alpn: &[&[u8]]) -> Self {
        Self::start(Mode::Tls(tls_acceptor(alpn)), handler).await
    }

    async fn start(mode: Mode, handler: Handler) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test server");
        let addr = listener.local_addr().expect("no local address");
        let stats = Arc::new(ServerStats::default());
        let (go_away, go_away_rx) = watch::channel(0u64);
        let secure = matches!(mode, Mode::Tls(_));

        let accept_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_stats.accepted.fetch_add(1, Ordering::SeqCst);
                let stats = Arc::clone(&accept_stats);
                let handler = Arc::clone(&handler);
                let go_away = go_away_rx.clone();
                let mode = mode.clone();
                tokio::spawn(async move {
                    match mode {
                        Mode::Http1 => serve(stream, false, handler, &stats, go_away).await,
                        Mode::Http2 => serve(stream, true, handler, &stats, go_away).await,
                        Mode::Tls(acceptor) => {
                            if let Ok(tls) = acceptor.accept(stream).await {
                                let h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
                                serve(tls, h2, handler, &stats, go_away).await;
                            }
                        }
                    }
                    stats.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            secure,
            stats,
            go_away,
            task,
        }
    }

    /// Absolute URI of `path` on this server.
    #[must_use]
    pub fn uri(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://127.0.0.1:{}{path}", self.addr.port())
    }

    /// Connection counters.
    #[must_use]
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Send GOAWAY on every open HTTP/2 connection.
    pub fn go_away(&self) {
        self.go_away.send_modify(|generation| *generation += 1);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<I>(
    io: I,
    http2: bool,
    handler: Handler,
    stats: &Arc<ServerStats>,
    mut go_away: watch::Receiver<u64>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let stats = Arc::clone(stats);
    let service = service_fn(move |request: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let stats = Arc::clone(&stats);
        async move {
            stats.requests.fetch_add(1, Ordering::SeqCst);
            let (parts, body) = request.into_parts();
            let body = body
                .collect()
                .await
                .map(http_body_util::Collected::to_bytes)
                .unwrap_or_default();
            Ok::<_, Infallible>(handler(parts, body).await)
        }
    });

    let io = TokioIo::new(io);
    if http2 {
        let conn = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(io, service);
        tokio::pin!(conn);
        loop {
            tokio::select! {
                _ = conn.as_mut() => break,
                Ok(()) = go_away.changed() => conn.as_mut().graceful_shutdown(),
            }
        }
    } else {
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(io, service)
            .await;
    }
}

fn tls_acceptor(alpn: &[&[u8]]) -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
        .expect("failed to generate certificate");
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("no TLS versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key.into())
        .expect("invalid certificate");
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    TlsAcceptor::from(Arc::new(config))
}

// ---------------------------------------------------------------------------
// Raw socket server
// ---------------------------------------------------------------------------

/// A loopback server handing every accepted socket to a script.
pub struct RawServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl fmt::Debug for RawServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl RawServer {
    /// Run `script` for every accepted connection.
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind raw server");
        let addr = listener.local_addr().expect("no local address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(script(stream));
            }
        });
        Self {
            addr,
            accepted,
            task,
        }
    }

    /// Absolute `http` URI of `path` on this server.
    #[must_use]
    pub fn uri(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.addr.port())
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read one request head, up to and including the blank line. Reads byte by
/// byte so nothing past the head is consumed.
pub async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

// ---------------------------------------------------------------------------
// CONNECT proxy
// ---------------------------------------------------------------------------

/// What a [`TestProxy`] has seen.
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// CONNECT targets, in arrival order.
    pub targets: Mutex<Vec<String>>,
    /// `Proxy-Authorization` values, in arrival order.
    pub authorizations: Mutex<Vec<Option<String>>>,
    /// Tunnels established.
    pub tunnels: AtomicUsize,
}

/// A minimal HTTP CONNECT proxy on a loopback port.
pub struct TestProxy {
    addr: SocketAddr,
    stats: Arc<ProxyStats>,
    task: JoinHandle<()>,
}

impl fmt::Debug for TestProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestProxy")
            .field("addr", &self.addr)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TestProxy {
    /// Start a proxy. With `credentials`, CONNECTs without a matching
    /// `Proxy-Authorization: Basic` header are answered with 407.
    pub async fn start(credentials: Option<(&str, &str)>) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind proxy");
        let addr = listener.local_addr().expect("no local address");
        let stats = Arc::new(ProxyStats::default());
        let expected = credentials.map(|(user, password)| {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
            format!("Basic {encoded}")
        });

        let proxy_stats = Arc::clone(&stats);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let stats = Arc::clone(&proxy_stats);
                let expected = expected.clone();
                tokio::spawn(async move {
                    let _ = tunnel(stream, &stats, expected.as_deref()).await;
                });
            }
        });
        Self { addr, stats, task }
    }

    /// Proxy settings pointing at this proxy.
    #[must_use]
    pub fn config(&self) -> ProxyConfig {
        ProxyConfig::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .build()
    }

    /// What the proxy has seen.
    #[must_use]
    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tunnel(mut stream: TcpStream, stats: &ProxyStats, expected: Option<&str>) -> std::io::Result<()> {
    let head = read_request_head(&mut stream).await?;
    let mut lines = head.lines();
    let target = lines
        .next()
        .and_then(|line| line.strip_prefix("CONNECT "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_owned);
    let authorization = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("proxy-authorization")
            .then(|| value.trim().to_owned())
    });
    stats.authorizations.lock().push(authorization.clone());

    let Some(target) = target else {
        stream
            .write_all(b"HTTP/1.1 405 Method Not Allowed\r\ncontent-length: 0\r\n\r\n")
            .await?;
        return Ok(());
    };
    stats.targets.lock().push(target.clone());

    if expected.is_some() && authorization.as_deref() != expected {
        stream
            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\ncontent-length: 0\r\n\r\n")
            .await?;
        return Ok(());
    }

    let mut upstream = TcpStream::connect(target.as_str()).await?;
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    stats.tunnels.fetch_add(1, Ordering::SeqCst);
    tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(())
}

mod test_cancel;
mod test_error;
mod test_http1;
mod test_http2;
mod test_idle;
mod test_pool;
mod test_proxy;
mod test_tls;
