//! Rustack NIO Fetch - issue HTTP requests through the pooled async transport.
//!
//! # Usage
//!
//! ```text
//! rustack-nio-fetch [--http2] [--insecure] [-X METHOD] [-H 'Name: value']... [-d BODY] [-n COUNT] URL
//! ```
//!
//! The same request is sent `COUNT` times concurrently, which makes the tool
//! handy for watching connection reuse and HTTP/2 multiplexing in the logs.
//! Every `NIO_*` variable read by [`NioConfig::from_env`] applies, as do
//! `HTTP_PROXY`, `HTTPS_PROXY`, and `NO_PROXY`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use futures::future::join_all;
use http::{HeaderName, HeaderValue, Method, Request, Uri};
use rustack_nio_client::{NioAsyncHttpClient, RequestBody};
use rustack_nio_core::{NioConfig, Protocol};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: rustack-nio-fetch [--http2] [--insecure] [-X METHOD] [-H 'Name: value']... [-d BODY] [-n COUNT] URL";

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Parsed command line.
#[derive(Debug)]
struct Args {
    http2: bool,
    insecure: bool,
    method: Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Bytes>,
    count: usize,
    uri: Uri,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut http2 = false;
        let mut insecure = false;
        let mut method = None;
        let mut headers = Vec::new();
        let mut body = None;
        let mut count = 1;
        let mut uri = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--http2" => http2 = true,
                "-k" | "--insecure" => insecure = true,
                "-X" | "--request" => {
                    let value = args.next().context("-X needs a method")?;
                    method = Some(
                        Method::from_bytes(value.as_bytes())
                            .with_context(|| format!("invalid method {value}"))?,
                    );
                }
                "-H" | "--header" => {
                    let value = args.next().context("-H needs a header")?;
                    let (name, value) = value
                        .split_once(':')
                        .with_context(|| format!("header {value} is not 'Name: value'"))?;
                    headers.push((
                        HeaderName::from_bytes(name.trim().as_bytes())
                            .with_context(|| format!("invalid header name {name}"))?,
                        HeaderValue::from_str(value.trim())
                            .with_context(|| format!("invalid value for header {name}"))?,
                    ));
                }
                "-d" | "--data" => {
                    body = Some(Bytes::from(args.next().context("-d needs a body")?));
                }
                "-n" | "--count" => {
                    let value = args.next().context("-n needs a count")?;
                    count = value
                        .parse::<usize>()
                        .with_context(|| format!("invalid count {value}"))?
                        .max(1);
                }
                "-h" | "--help" => bail!(USAGE),
                other if other.starts_with('-') => bail!("unknown option {other}\n{USAGE}"),
                other => {
                    if uri.is_some() {
                        bail!("only one URL may be given\n{USAGE}");
                    }
                    uri = Some(
                        other
                            .parse::<Uri>()
                            .with_context(|| format!("invalid URL {other}"))?,
                    );
                }
            }
        }

        let method = method.unwrap_or(if body.is_some() { Method::POST } else { Method::GET });
        Ok(Self {
            http2,
            insecure,
            method,
            headers,
            body,
            count,
            uri: uri.context(USAGE)?,
        })
    }

    fn request(&self) -> Result<Request<RequestBody>> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let body = self
            .body
            .clone()
            .map_or_else(RequestBody::empty, RequestBody::from_bytes);
        builder.body(body).context("failed to build request")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;

    let mut config = NioConfig::from_env();
    init_tracing(&config.log_level)?;
    if args.http2 {
        config.protocol = Protocol::Http2;
    }
    if args.insecure {
        config.trust_all_certificates = true;
    }

    let client = NioAsyncHttpClient::builder()
        .config(config)
        .build()
        .context("failed to create HTTP client")?;
    info!(method = %args.method, uri = %args.uri, count = args.count, "sending requests");

    let started = Instant::now();
    let mut requests = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        requests.push(client.execute_buffered(args.request()?));
    }
    let responses = join_all(requests).await;

    let mut stdout = std::io::stdout().lock();
    let mut failures = 0usize;
    for (index, response) in responses.into_iter().enumerate() {
        match response {
            Ok(response) => {
                info!(
                    index,
                    status = %response.status(),
                    version = ?response.version(),
                    bytes = response.body().len(),
                    "response received"
                );
                if index == 0 {
                    stdout
                        .write_all(response.body())
                        .context("failed to write response body")?;
                }
            }
            Err(error) => {
                warn!(index, %error, "request failed");
                failures += 1;
            }
        }
    }
    stdout.flush().ok();
    drop(stdout);

    if let Some(metrics) = client.pool_metrics(&args.uri) {
        info!(
            max = metrics.max_concurrency,
            leased = metrics.leased_concurrency,
            idle_connections = client.idle_connection_count(),
            elapsed = ?started.elapsed(),
            "pool state after requests"
        );
    }
    client.close().await;

    if failures > 0 {
        bail!("{failures} of {} requests failed", args.count);
    }
    Ok(())
}

