//! Request execution.
//!
//! [`RequestExecutor::execute`] acquires a channel from the endpoint pool,
//! writes the request, delivers the response to the request's handler, and
//! gives the channel back. The exchange runs as a single task on the
//! channel's event loop. That task is the only place the exchange's
//! outcome is decided, so a channel is released exactly once, whichever of
//! success, pipeline failure, or caller cancellation happens first.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use rustack_nio_core::{EventLoopGroup, NioConfig, NioError, NioResult, Protocol};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::channel::{Channel, ExchangeBinding, handlers};
use crate::pool::{SharedPool, close_and_release};
use crate::request::RequestBody;
use crate::response::{ResponseContentStream, ResponseHandler, StreamOutcome};
use crate::timeout::{install_read_timeout, install_write_timeout};

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything an exchange needs besides the request itself.
#[derive(Debug)]
pub struct RequestContext {
    pool: SharedPool,
    group: EventLoopGroup,
    method: Method,
    uri: Uri,
    handler: Arc<dyn ResponseHandler>,
    config: Arc<NioConfig>,
    full_duplex: bool,
}

impl RequestContext {
    /// Create a context for one request.
    #[must_use]
    pub fn new(
        pool: SharedPool,
        group: EventLoopGroup,
        method: Method,
        uri: Uri,
        handler: Arc<dyn ResponseHandler>,
        config: Arc<NioConfig>,
    ) -> Self {
        Self {
            pool,
            group,
            method,
            uri,
            handler,
            config,
            full_duplex: false,
        }
    }

    /// Arm the read timeout when the request starts rather than when it is
    /// fully written.
    #[must_use]
    pub fn with_full_duplex(mut self, full_duplex: bool) -> Self {
        self.full_duplex = full_duplex;
        self
    }

    /// Pool the exchange leases its channel from.
    #[must_use]
    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Response handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ResponseHandler> {
        &self.handler
    }

    /// Transport configuration.
    #[must_use]
    pub fn config(&self) -> &NioConfig {
        &self.config
    }
}

/// Completion of an execution.
///
/// Resolves once the response body has been fully delivered, or with the
/// error that ended the exchange. Dropping it, or calling
/// [`ExecuteFuture::cancel`], cancels the exchange.
pub struct ExecuteFuture {
    execution_id: u64,
    rx: oneshot::Receiver<NioResult<()>>,
}

impl fmt::Debug for ExecuteFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteFuture")
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

impl ExecuteFuture {
    /// A future already failed with `error`.
    #[must_use]
    pub fn failed(error: NioError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            execution_id: NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed),
            rx,
        }
    }

    /// Identifier of the execution, as it appears in log lines.
    #[must_use]
    pub fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// Cancel the execution. The future then resolves with an I/O error.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

impl Future for ExecuteFuture {
    type Output = NioResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let execution_id = self.execution_id;
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(NioError::FutureCancelled { execution_id }.into_io_category())
            })
        })
    }
}

/// Drives one request over a pooled channel.
#[derive(Debug)]
pub struct RequestExecutor {
    context: Arc<RequestContext>,
}

impl RequestExecutor {
    /// Create an executor for `context`.
    #[must_use]
    pub fn new(context: Arc<RequestContext>) -> Self {
        Self { context }
    }

    /// Start executing `request`.
    pub fn execute(self, request: Request<RequestBody>) -> ExecuteFuture {
        let execution_id = NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();
        let context = self.context;
        trace!(execution_id, method = %context.method, uri = %context.uri, "executing request");
        context
            .group
            .next()
            .spawn(run(execution_id, context, request, done));
        ExecuteFuture { execution_id, rx }
    }
}

async fn run(
    execution_id: u64,
    context: Arc<RequestContext>,
    request: Request<RequestBody>,
    mut done: oneshot::Sender<NioResult<()>>,
) {
    let mut acquiring = context.pool.acquire();
    let acquired = tokio::select! {
        biased;
        () = done.closed() => None,
        result = &mut acquiring => Some(result),
    };

    let channel = match acquired {
        Some(Ok(channel)) => channel,
        Some(Err(error)) => {
            debug!(execution_id, %error, "failed to acquire a channel");
            context.handler.on_error(&error);
            let _ = done.send(Err(error));
            return;
        }
        None => {
            if let Some(channel) = acquiring.cancel() {
                close_and_release(&context.pool, channel).await;
            }
            let error = NioError::FutureCancelled { execution_id }.into_io_category();
            debug!(execution_id, "execution cancelled while acquiring a channel");
            context.handler.on_error(&error);
            return;
        }
    };

    trace!(execution_id, channel = %channel, "acquired channel");
    let event_loop = channel.event_loop().clone();
    event_loop.spawn(exchange(execution_id, context, channel, request, done));
}

async fn exchange(
    execution_id: u64,
    context: Arc<RequestContext>,
    channel: Channel,
    request: Request<RequestBody>,
    mut done: oneshot::Sender<NioResult<()>>,
) {
    let (failures_tx, mut failures) = mpsc::unbounded_channel();
    channel.bind_exchange(ExchangeBinding::new(
        execution_id,
        Arc::clone(&context),
        failures_tx,
    ));
    channel.pipeline().add_last(handlers::RESPONSE_HANDLER, None);

    let outcome = StreamOutcome::default();
    let result = {
        let drive = drive(&context, &channel, request, &outcome);
        tokio::pin!(drive);
        let result = loop {
            tokio::select! {
                biased;
                () = done.closed() => {
                    break Err(NioError::FutureCancelled { execution_id }.into_io_category());
                }
                Some(failure) = failures.recv() => {
                    // A late cancellation of an earlier exchange on this channel.
                    if let NioError::FutureCancelled { execution_id: other } = &failure {
                        if *other != execution_id {
                            continue;
                        }
                    }
                    break Err(failure);
                }
                result = &mut drive => break result,
            }
        };
        outcome.set(result.clone());
        result
    };

    match result {
        Ok(()) => {
            trace!(execution_id, channel = %channel, "exchange complete, releasing channel");
            if let Err(error) = context.pool.release(channel).await {
                debug!(execution_id, %error, "failed to release channel");
            }
            let _ = done.send(Ok(()));
        }
        Err(error) => {
            debug!(
                execution_id,
                channel = %channel,
                diagnostics = %channel.attributes().diagnostics(),
                %error,
                "exchange failed, closing channel"
            );
            close_and_release(&context.pool, channel).await;
            context.handler.on_error(&error);
            let _ = done.send(Err(error));
        }
    }
}

async fn drive(
    context: &RequestContext,
    channel: &Channel,
    mut request: Request<RequestBody>,
    outcome: &StreamOutcome,
) -> NioResult<()> {
    let protocol = channel.protocol().await?;
    if !channel.is_active() {
        return Err(channel.closed_error());
    }
    adapt_request(&mut request, protocol)?;

    let config = context.config();
    let (write_tx, mut write_rx) = oneshot::channel();
    request.body_mut().on_write_complete(write_tx);
    if context.full_duplex {
        install_read_timeout(channel, config.read_timeout);
    }
    install_write_timeout(channel, config.write_timeout);
    channel.attributes().start_response();

    let send = channel.send_request(request);
    tokio::pin!(send);
    let mut written = false;
    let response = loop {
        tokio::select! {
            _ = &mut write_rx, if !written => {
                written = true;
                write_completed(channel, config);
            }
            response = &mut send => break response?,
        }
    };
    if !written {
        write_completed(channel, config);
    }
    channel.attributes().touch_read();

    let (head, mut body) = response.into_parts();
    channel
        .attributes()
        .set_keep_alive(is_keep_alive(head.version, &head.headers));
    let expected = expected_length(context.method(), head.status, &head.headers);
    context.handler.on_headers(&head);

    let (stream, mut demands) = ResponseContentStream::new(outcome.clone());
    context.handler.on_stream(stream);

    let mut received = 0u64;
    loop {
        let Some(reply) = demands.recv().await else {
            return Err(NioError::io_message(
                "response content stream was dropped before the body was consumed",
            ));
        };
        let chunk = loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    channel.attributes().touch_read();
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            break Some(data);
                        }
                    }
                }
                Some(Err(error)) => {
                    let error = channel.decorate_error(error);
                    let _ = reply.send(Some(Err(error.clone())));
                    return Err(error);
                }
                None => break None,
            }
        };
        match chunk {
            Some(data) => {
                received += data.len() as u64;
                let _ = reply.send(Some(Ok(data)));
            }
            None => {
                channel.attributes().set_last_http_content_received();
                if let Some(expected) = expected {
                    if received < expected {
                        let error = NioError::ContentLengthMismatch { expected, received };
                        let _ = reply.send(Some(Err(error.clone())));
                        return Err(error);
                    }
                }
                channel.attributes().set_response_complete();
                outcome.set(Ok(()));
                let _ = reply.send(None);
                return Ok(());
            }
        }
    }
}

/// Swap the write timeout for the read timeout.
fn write_completed(channel: &Channel, config: &NioConfig) {
    channel.pipeline().remove(handlers::WRITE_TIMEOUT);
    if !channel.pipeline().contains(handlers::READ_TIMEOUT) {
        install_read_timeout(channel, config.read_timeout);
    }
}

fn default_port(uri: &Uri) -> u16 {
    if uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
        443
    } else {
        80
    }
}

/// Rewrite a request for the wire format of `protocol`.
///
/// HTTP/1.1 requests get a `Host` header and an origin-form target; HTTP/2
/// requests keep the absolute URI, which becomes the `:authority` and
/// `:path` pseudo headers. A declared `Content-Length` bounds the body.
pub(crate) fn adapt_request(request: &mut Request<RequestBody>, protocol: Protocol) -> NioResult<()> {
    let uri = request.uri().clone();
    let host = uri
        .host()
        .ok_or_else(|| NioError::InvalidRequest(format!("request URI {uri} has no host")))?;

    let content_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    request.body_mut().set_content_length(content_length);

    match protocol {
        Protocol::Http1_1 => {
            if !request.headers().contains_key(HOST) {
                let value = match uri.port_u16() {
                    Some(port) if port != default_port(&uri) => format!("{host}:{port}"),
                    _ => host.to_owned(),
                };
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| NioError::InvalidRequest(format!("invalid host {value}: {e}")))?;
                request.headers_mut().insert(HOST, value);
            }
            let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
            *request.uri_mut() = target
                .parse()
                .map_err(|e| NioError::InvalidRequest(format!("invalid target {target}: {e}")))?;
            *request.version_mut() = Version::HTTP_11;
        }
        Protocol::Http2 => {
            request.headers_mut().remove(HOST);
            *request.version_mut() = Version::HTTP_2;
        }
    }
    Ok(())
}

fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let mut connection = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim);
    match version {
        Version::HTTP_2 | Version::HTTP_3 => true,
        Version::HTTP_10 | Version::HTTP_09 => {
            connection.any(|t| t.eq_ignore_ascii_case("keep-alive"))
        }
        _ => !connection.any(|t| t.eq_ignore_ascii_case("close")),
    }
}

fn expected_length(method: &Method, status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return None;
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
