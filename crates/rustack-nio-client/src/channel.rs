//! Connections handed out by channel pools.
//!
//! A [`Channel`] is either a socket channel that owns one physical
//! (optionally TLS, optionally tunneled) connection, or an HTTP/2 stream
//! channel that is a child of a socket channel and represents one stream
//! slot on it. Every channel belongs to one [`EventLoop`], carries a typed
//! [`ChannelAttributes`] struct, and a [`ChannelPipeline`] registry of named
//! handlers, some of which own a background task on the channel's loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use parking_lot::Mutex;
use rustack_nio_core::{EventLoop, NioError, NioResult, Protocol};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::executor::RequestContext;
use crate::request::RequestBody;

/// Names of the handlers a channel pipeline may hold.
pub mod handlers {
    /// TLS session; its presence means the handshake must be awaited.
    pub const SSL: &str = "ssl";
    /// HTTP/1.1 connection driver.
    pub const HTTP1_CODEC: &str = "http1-codec";
    /// HTTP/2 connection driver, including keep-alive pings and GOAWAY detection.
    pub const HTTP2_CODEC: &str = "http2-codec";
    /// Closes the channel once idle for too long.
    pub const IDLE_REAPER: &str = "idle-reaper";
    /// Closes or flags the channel once older than its time to live.
    pub const AGE_REAPER: &str = "age-reaper";
    /// Pending proxy CONNECT handshake.
    pub const PROXY_TUNNEL_INIT: &str = "proxy-tunnel-init";
    /// Per-exchange read timeout watchdog.
    pub const READ_TIMEOUT: &str = "read-timeout";
    /// Per-exchange write timeout watchdog.
    pub const WRITE_TIMEOUT: &str = "write-timeout";
    /// Marks the exchange currently driving the channel.
    pub const RESPONSE_HANDLER: &str = "response-handler";

    /// Handlers installed for one exchange and removed on release.
    pub const PER_EXCHANGE: [&str; 3] = [READ_TIMEOUT, WRITE_TIMEOUT, RESPONSE_HANDLER];
}

/// Type-erased byte stream a socket channel starts with.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed [`Io`].
pub type BoxIo = Box<dyn Io>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// In-flight exchange bound to a channel.
#[derive(Debug, Clone)]
pub struct ExchangeBinding {
    /// Identifier of the execution driving the exchange.
    pub execution_id: u64,
    /// The exchange's request context.
    pub context: Arc<RequestContext>,
    failures: mpsc::UnboundedSender<NioError>,
}

impl ExchangeBinding {
    /// Bind an execution, delivering pipeline failures to `failures`.
    #[must_use]
    pub fn new(
        execution_id: u64,
        context: Arc<RequestContext>,
        failures: mpsc::UnboundedSender<NioError>,
    ) -> Self {
        Self {
            execution_id,
            context,
            failures,
        }
    }
}

/// Timestamps and counters rendered in log lines.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDiagnostics {
    created_at: Instant,
    idle_since: Option<Instant>,
    last_read: Instant,
    response_count: u64,
}

impl ChannelDiagnostics {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            idle_since: Some(now),
            last_read: now,
            response_count: 0,
        }
    }

    /// Time since the channel was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the channel last went idle; `None` while in use.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|since| since.elapsed())
    }

    /// Time since response data was last read.
    #[must_use]
    pub fn since_last_read(&self) -> Duration {
        self.last_read.elapsed()
    }

    /// Number of exchanges started on the channel.
    #[must_use]
    pub fn response_count(&self) -> u64 {
        self.response_count
    }
}

impl fmt::Display for ChannelDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "age {:?}, responses {}",
            self.age(),
            self.response_count
        )?;
        match self.idle_for() {
            Some(idle) => write!(f, ", idle for {idle:?}"),
            None => f.write_str(", in use"),
        }
    }
}

/// Typed per-channel state.
pub struct ChannelAttributes {
    in_use: AtomicBool,
    keep_alive: Mutex<Option<bool>>,
    close_on_release: AtomicBool,
    response_complete: AtomicBool,
    last_http_content_received: AtomicBool,
    tunnel_established: AtomicBool,
    go_away: watch::Sender<Option<u32>>,
    protocol: watch::Sender<Option<NioResult<Protocol>>>,
    handshake: watch::Sender<Option<NioResult<()>>>,
    exchange: Mutex<Option<ExchangeBinding>>,
    diagnostics: Mutex<ChannelDiagnostics>,
}

impl fmt::Debug for ChannelAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAttributes")
            .field("in_use", &self.in_use())
            .field("keep_alive", &self.keep_alive())
            .field("close_on_release", &self.close_on_release())
            .field("response_complete", &self.response_complete())
            .field("tunnel_established", &self.tunnel_established())
            .field("go_away", &self.go_away())
            .finish_non_exhaustive()
    }
}

impl ChannelAttributes {
    fn new(protocol: Option<Protocol>) -> Self {
        Self {
            in_use: AtomicBool::new(false),
            keep_alive: Mutex::new(None),
            close_on_release: AtomicBool::new(false),
            response_complete: AtomicBool::new(true),
            last_http_content_received: AtomicBool::new(true),
            tunnel_established: AtomicBool::new(false),
            go_away: watch::Sender::new(None),
            protocol: watch::Sender::new(protocol.map(Ok)),
            handshake: watch::Sender::new(None),
            exchange: Mutex::new(None),
            diagnostics: Mutex::new(ChannelDiagnostics::new()),
        }
    }

    /// Whether the channel is checked out.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Mark the channel checked out or returned.
    pub fn set_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::Release);
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.idle_since = if in_use { None } else { Some(Instant::now()) };
    }

    /// Keep-alive decision from the last response, if any.
    #[must_use]
    pub fn keep_alive(&self) -> Option<bool> {
        *self.keep_alive.lock()
    }

    /// Record the keep-alive decision of a response.
    pub fn set_keep_alive(&self, keep_alive: bool) {
        *self.keep_alive.lock() = Some(keep_alive);
    }

    /// Whether the channel must be closed instead of returned to the pool.
    #[must_use]
    pub fn close_on_release(&self) -> bool {
        self.close_on_release.load(Ordering::Acquire)
    }

    /// Flag the channel for closure on its next release.
    pub fn set_close_on_release(&self) {
        self.close_on_release.store(true, Ordering::Release);
    }

    /// Whether the current exchange has consumed its whole response.
    #[must_use]
    pub fn response_complete(&self) -> bool {
        self.response_complete.load(Ordering::Acquire)
    }

    /// Whether the final frame of the current response was read.
    #[must_use]
    pub fn last_http_content_received(&self) -> bool {
        self.last_http_content_received.load(Ordering::Acquire)
    }

    pub(crate) fn start_response(&self) {
        self.response_complete.store(false, Ordering::Release);
        self.last_http_content_received.store(false, Ordering::Release);
        self.diagnostics.lock().response_count += 1;
    }

    pub(crate) fn set_last_http_content_received(&self) {
        self.last_http_content_received.store(true, Ordering::Release);
    }

    pub(crate) fn set_response_complete(&self) {
        self.response_complete.store(true, Ordering::Release);
    }

    /// Whether a proxy CONNECT tunnel is established on this channel.
    #[must_use]
    pub fn tunnel_established(&self) -> bool {
        self.tunnel_established.load(Ordering::Acquire)
    }

    pub(crate) fn set_tunnel_established(&self) {
        self.tunnel_established.store(true, Ordering::Release);
    }

    /// Last stream id of a GOAWAY received on this connection.
    #[must_use]
    pub fn go_away(&self) -> Option<u32> {
        *self.go_away.borrow()
    }

    pub(crate) fn set_go_away(&self, last_stream_id: u32) {
        self.go_away.send_replace(Some(last_stream_id));
    }

    /// Wait until a GOAWAY is received.
    pub async fn go_away_received(&self) -> Option<u32> {
        let mut rx = self.go_away.subscribe();
        let received = rx.wait_for(Option::is_some).await.ok()?;
        *received
    }

    /// The bound exchange, if any.
    #[must_use]
    pub fn exchange(&self) -> Option<ExchangeBinding> {
        self.exchange.lock().clone()
    }

    /// Snapshot of the channel diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> ChannelDiagnostics {
        *self.diagnostics.lock()
    }

    /// Record a read of response data.
    pub fn touch_read(&self) {
        self.diagnostics.lock().last_read = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct PipelineHandler {
    name: &'static str,
    task: Option<AbortHandle>,
}

/// Ordered registry of named handlers installed on a channel.
///
/// Removing a handler aborts the task it owns. Closing the channel clears
/// the whole registry.
#[derive(Default)]
pub struct ChannelPipeline {
    handlers: Mutex<Vec<PipelineHandler>>,
}

impl fmt::Debug for ChannelPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ChannelPipeline {
    /// Append a handler. Returns `false` (aborting `task`) when a handler
    /// with the same name is already installed.
    pub fn add_last(&self, name: &'static str, task: Option<AbortHandle>) -> bool {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|h| h.name == name) {
            if let Some(task) = task {
                task.abort();
            }
            return false;
        }
        handlers.push(PipelineHandler { name, task });
        true
    }

    /// Whether a handler is installed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.lock().iter().any(|h| h.name == name)
    }

    /// Remove a handler, aborting its task.
    pub fn remove(&self, name: &str) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(pos) = handlers.iter().position(|h| h.name == name) else {
            return false;
        };
        let handler = handlers.remove(pos);
        if let Some(task) = handler.task {
            task.abort();
        }
        true
    }

    /// Installed handler names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.lock().iter().map(|h| h.name).collect()
    }

    fn clear(&self) {
        let handlers = std::mem::take(&mut *self.handlers.lock());
        for handler in handlers {
            if let Some(task) = handler.task {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

enum ChannelIo {
    Raw(BoxIo),
    Http1(Option<http1::SendRequest<RequestBody>>),
    Http2(http2::SendRequest<RequestBody>),
    Detached,
}

struct ChannelInner {
    id: ChannelId,
    parent: Option<Channel>,
    event_loop: EventLoop,
    remote: String,
    attributes: ChannelAttributes,
    pipeline: ChannelPipeline,
    io: Mutex<ChannelIo>,
    closed: watch::Sender<bool>,
}

/// A pooled connection or HTTP/2 stream slot.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// Non-owning reference to a [`Channel`].
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl fmt::Debug for WeakChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(channel) => write!(f, "WeakChannel({channel})"),
            None => f.write_str("WeakChannel(<dropped>)"),
        }
    }
}

impl WeakChannel {
    /// The channel, if it is still referenced somewhere.
    #[must_use]
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("parent", &self.inner.parent.as_ref().map(Channel::id))
            .field("active", &self.is_active())
            .field("attributes", &self.inner.attributes)
            .field("pipeline", &self.inner.pipeline)
            .finish()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.parent {
            Some(parent) => write!(
                f,
                "[id: {}, parent: {}, remote: {}]",
                self.inner.id, parent.inner.id, self.inner.remote
            ),
            None => write!(f, "[id: {}, remote: {}]", self.inner.id, self.inner.remote),
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Channel {}

impl Channel {
    /// Register a freshly connected socket with `event_loop`.
    #[must_use]
    pub fn new_socket(event_loop: EventLoop, remote: impl Into<String>, io: BoxIo) -> Self {
        Self::build(
            None,
            event_loop,
            remote.into(),
            ChannelIo::Raw(io),
            None,
        )
    }

    /// Open a stream slot on an HTTP/2 socket channel.
    pub(crate) fn new_stream(parent: &Self) -> NioResult<Self> {
        let sender = match &*parent.inner.io.lock() {
            ChannelIo::Http2(sender) => sender.clone(),
            _ => return Err(parent.closed_error()),
        };
        Ok(Self::build(
            Some(parent.clone()),
            parent.inner.event_loop.clone(),
            parent.inner.remote.clone(),
            ChannelIo::Http2(sender),
            Some(Protocol::Http2),
        ))
    }

    fn build(
        parent: Option<Self>,
        event_loop: EventLoop,
        remote: String,
        io: ChannelIo,
        protocol: Option<Protocol>,
    ) -> Self {
        let channel = Self {
            inner: Arc::new(ChannelInner {
                id: ChannelId::next(),
                parent,
                event_loop,
                remote,
                attributes: ChannelAttributes::new(protocol),
                pipeline: ChannelPipeline::default(),
                io: Mutex::new(io),
                closed: watch::Sender::new(false),
            }),
        };
        trace!(channel = %channel, "channel registered");
        channel
    }

    /// Channel identifier.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Socket channel this stream channel belongs to.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Loop owning this channel.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// `host:port` the channel is connected to.
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    /// Typed channel state.
    #[must_use]
    pub fn attributes(&self) -> &ChannelAttributes {
        &self.inner.attributes
    }

    /// Installed handlers.
    #[must_use]
    pub fn pipeline(&self) -> &ChannelPipeline {
        &self.inner.pipeline
    }

    /// Non-owning reference to this channel.
    #[must_use]
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether the channel is open and its connection can carry requests.
    #[must_use]
    pub fn is_active(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Some(parent) = &self.inner.parent {
            if !parent.is_active() {
                return false;
            }
        }
        match &*self.inner.io.lock() {
            ChannelIo::Http1(Some(sender)) => !sender.is_closed(),
            ChannelIo::Http2(sender) => !sender.is_closed(),
            ChannelIo::Http1(None) | ChannelIo::Raw(_) => true,
            ChannelIo::Detached => false,
        }
    }

    /// Whether [`Channel::close`] was called or the connection ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Close the channel. Idempotent.
    ///
    /// Aborts every pipeline task (including the connection driver, which
    /// drops the socket) and fails anyone still waiting for the protocol or
    /// the TLS handshake.
    pub fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        debug!(
            channel = %self,
            diagnostics = %self.inner.attributes.diagnostics(),
            "closing channel"
        );
        self.inner.pipeline.clear();
        *self.inner.io.lock() = ChannelIo::Detached;

        let error = self.closed_error();
        self.inner.attributes.protocol.send_if_modified(|protocol| {
            if protocol.is_none() {
                *protocol = Some(Err(error.clone()));
                true
            } else {
                false
            }
        });
        self.inner.attributes.handshake.send_if_modified(|handshake| {
            if handshake.is_none() {
                *handshake = Some(Err(error.clone()));
                true
            } else {
                false
            }
        });
    }

    /// Resolve once the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Wait for protocol negotiation to finish.
    pub async fn protocol(&self) -> NioResult<Protocol> {
        let mut rx = self.inner.attributes.protocol.subscribe();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| self.closed_error())?;
        resolved.clone().unwrap_or_else(|| Err(self.closed_error()))
    }

    /// Negotiated protocol, if already known.
    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<Protocol> {
        match &*self.inner.attributes.protocol.borrow() {
            Some(Ok(protocol)) => Some(*protocol),
            _ => None,
        }
    }

    pub(crate) fn resolve_protocol(&self, result: NioResult<Protocol>) {
        self.inner.attributes.protocol.send_replace(Some(result));
    }

    /// Wait for the TLS handshake to finish.
    pub async fn handshake(&self) -> NioResult<()> {
        let mut rx = self.inner.attributes.handshake.subscribe();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| self.closed_error())?;
        resolved.clone().unwrap_or_else(|| Err(self.closed_error()))
    }

    pub(crate) fn resolve_handshake(&self, result: NioResult<()>) {
        self.inner.attributes.handshake.send_replace(Some(result));
    }

    pub(crate) fn take_raw_io(&self) -> NioResult<BoxIo> {
        let mut io = self.inner.io.lock();
        match std::mem::replace(&mut *io, ChannelIo::Detached) {
            ChannelIo::Raw(raw) => Ok(raw),
            other => {
                *io = other;
                Err(NioError::Internal(format!(
                    "channel {self} has no raw transport to take"
                )))
            }
        }
    }

    pub(crate) fn set_raw_io(&self, raw: BoxIo) {
        if !self.is_closed() {
            *self.inner.io.lock() = ChannelIo::Raw(raw);
        }
    }

    pub(crate) fn set_http1_sender(&self, sender: http1::SendRequest<RequestBody>) {
        if !self.is_closed() {
            *self.inner.io.lock() = ChannelIo::Http1(Some(sender));
        }
    }

    pub(crate) fn set_http2_sender(&self, sender: http2::SendRequest<RequestBody>) {
        if !self.is_closed() {
            *self.inner.io.lock() = ChannelIo::Http2(sender);
        }
    }

    /// Write a request and wait for the response head.
    pub async fn send_request(&self, request: Request<RequestBody>) -> NioResult<Response<Incoming>> {
        enum Sender {
            Http1(http1::SendRequest<RequestBody>),
            Http2(http2::SendRequest<RequestBody>),
        }

        let sender = match &mut *self.inner.io.lock() {
            ChannelIo::Http1(slot) => slot.take().map(Sender::Http1),
            ChannelIo::Http2(sender) => Some(Sender::Http2(sender.clone())),
            ChannelIo::Raw(_) | ChannelIo::Detached => None,
        };

        match sender.ok_or_else(|| self.closed_error())? {
            Sender::Http1(mut sender) => {
                if let Err(e) = sender.ready().await {
                    self.restore_http1_sender(sender);
                    return Err(self.decorate_error(e));
                }
                let response = sender.send_request(request);
                self.restore_http1_sender(sender);
                response.await.map_err(|e| self.decorate_error(e))
            }
            Sender::Http2(mut sender) => {
                sender.ready().await.map_err(|e| self.decorate_error(e))?;
                sender
                    .send_request(request)
                    .await
                    .map_err(|e| self.decorate_error(e))
            }
        }
    }

    fn restore_http1_sender(&self, sender: http1::SendRequest<RequestBody>) {
        if let ChannelIo::Http1(slot @ None) = &mut *self.inner.io.lock() {
            *slot = Some(sender);
        }
    }

    /// Bind an exchange; pipeline failures are delivered to it from now on.
    pub fn bind_exchange(&self, binding: ExchangeBinding) {
        *self.inner.attributes.exchange.lock() = Some(binding);
    }

    /// Clear the bound exchange.
    pub fn unbind_exchange(&self) {
        self.inner.attributes.exchange.lock().take();
    }

    /// Route a failure through the pipeline.
    ///
    /// A bound exchange receives it on its failure path. On a channel with no
    /// exchange the failure is logged and the channel closed.
    pub fn fire_exception_caught(&self, error: NioError) {
        let binding = self.inner.attributes.exchange.lock().clone();
        if let Some(binding) = binding {
            if binding.failures.send(error.clone()).is_ok() {
                trace!(channel = %self, execution_id = binding.execution_id, %error, "forwarded failure to exchange");
                return;
            }
        }
        debug!(channel = %self, %error, "failure on unused channel, closing it");
        self.close();
    }

    /// GOAWAY last stream id seen by this channel's connection.
    #[must_use]
    pub fn go_away(&self) -> Option<u32> {
        self.inner
            .attributes
            .go_away()
            .or_else(|| self.inner.parent.as_ref().and_then(Self::go_away))
    }

    /// Translate a codec failure, attaching channel context.
    pub(crate) fn decorate_error(&self, error: hyper::Error) -> NioError {
        if let Some(last_stream_id) = self.go_away() {
            return NioError::GoAway { last_stream_id };
        }
        if error.is_incomplete_message() || error.is_closed() || error.is_canceled() {
            return self.closed_error();
        }
        if error.is_parse() || error.is_user() {
            return NioError::Protocol(error.to_string());
        }
        NioError::io(error.to_string(), error)
    }

    /// Error describing this channel as closed.
    #[must_use]
    pub fn closed_error(&self) -> NioError {
        NioError::ChannelClosed {
            channel: format!("{self} ({})", self.inner.attributes.diagnostics()),
        }
    }
}
