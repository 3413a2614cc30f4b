//! Durable-log transports.
//!
//! [`LogTransport`] is the seam between delivery and the log. The production
//! implementation, [`HttpLogTransport`], appends records over HTTP and owns
//! the bounded retry for each write. [`mock::MemoryTransport`] records
//! messages in memory and can be scripted to fail or stall.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use sluice_core::{Clock, RealClock};
use tracing::{debug, info, warn};

use crate::{
    error::{DeliveryError, Result},
    retry::{RetryDecision, RetryPolicy},
};

/// Header carrying the record key.
pub const KEY_HEADER: &str = "X-Sluice-Key";

/// Prefix for per-message header names on the wire.
pub const HEADER_PREFIX: &str = "X-Sluice-Header-";

/// Largest response body kept for error reporting.
const MAX_ERROR_BODY: usize = 1024;

/// A keyed record bound for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Partitioning key.
    pub key: Bytes,
    /// Serialized event.
    pub value: Bytes,
    /// Ordered name/value metadata.
    pub headers: Vec<(String, String)>,
}

impl LogMessage {
    /// Creates a message without headers.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into(), headers: Vec::new() }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Key as UTF-8, lossily.
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Writer for one destination topic.
#[async_trait]
pub trait LogTransport: Send + Sync + fmt::Debug {
    /// Writes one message, retrying internally within the transport's policy.
    async fn write(&self, message: &LogMessage) -> Result<()>;

    /// Releases the transport. Later writes fail with `DeliveryError::Closed`.
    async fn close(&self) -> Result<()>;

    /// Topic this transport writes to, for logs.
    fn destination(&self) -> &str;
}

/// Configuration for [`HttpLogTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URLs of the log's HTTP endpoints, used round-robin.
    pub endpoints: Vec<String>,
    /// Topic to append to.
    pub topic: String,
    /// Timeout for a single attempt.
    pub write_timeout: Duration,
    /// Bounded retry applied per message.
    pub retry: RetryPolicy,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:8082".to_string()],
            topic: "events".to_string(),
            write_timeout: Duration::from_millis(600),
            retry: RetryPolicy::default(),
            user_agent: concat!("sluice/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpTransportConfig {
    /// Upper bound on one `write`: every attempt timing out, plus the
    /// backoff between them.
    pub fn worst_case_write(&self) -> Duration {
        self.write_timeout
            .saturating_mul(self.retry.attempts())
            .saturating_add(self.retry.max_total_backoff())
    }
}

/// Appends records to a durable log over HTTP.
///
/// Each record is sent as `POST {endpoint}/topics/{topic}/records` with the
/// value as the body, the key in [`KEY_HEADER`], and each message header as
/// `X-Sluice-Header-<name>`.
#[derive(Debug)]
pub struct HttpLogTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    clock: Arc<dyn Clock>,
    next_endpoint: AtomicUsize,
    closed: AtomicBool,
}

impl HttpLogTransport {
    /// Creates a transport using the real clock for backoff.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if no endpoints are given or the
    /// HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(RealClock::new()))
    }

    /// Creates a transport that sleeps between attempts through `clock`.
    pub fn with_clock(config: HttpTransportConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(DeliveryError::configuration("at least one endpoint is required"));
        }
        if config.topic.trim().is_empty() {
            return Err(DeliveryError::configuration("topic must not be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.write_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            clock,
            next_endpoint: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn pick_endpoint(&self) -> &str {
        let index = self.next_endpoint.fetch_add(1, Ordering::Relaxed) % self.config.endpoints.len();
        self.config.endpoints[index].trim_end_matches('/')
    }

    async fn send_once(&self, endpoint: &str, message: &LogMessage) -> Result<()> {
        let url = format!("{endpoint}/topics/{}/records", self.config.topic);

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(KEY_HEADER, header_value(&message.key))
            .body(message.value.clone());

        for (name, value) in &message.headers {
            request = request.header(format!("{HEADER_PREFIX}{name}"), header_value(value.as_bytes()));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::timeout(
                    u64::try_from(self.config.write_timeout.as_millis()).unwrap_or(u64::MAX),
                )
            } else {
                DeliveryError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = match response.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_ERROR_BODY)]).into_owned(),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        let code = status.as_u16();
        Err(match code {
            429 => DeliveryError::rate_limited(retry_after.unwrap_or(1)),
            400..=499 => DeliveryError::client_error(code, body),
            _ => DeliveryError::server_error(code, body),
        })
    }
}

#[async_trait]
impl LogTransport for HttpLogTransport {
    async fn write(&self, message: &LogMessage) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(DeliveryError::closed(&self.config.topic));
            }

            attempt += 1;
            let endpoint = self.pick_endpoint();
            let error = match self.send_once(endpoint, message).await {
                Ok(()) => {
                    debug!(topic = %self.config.topic, endpoint, attempt, "record appended");
                    return Ok(());
                },
                Err(error) => error,
            };

            match self.config.retry.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        topic = %self.config.topic,
                        endpoint,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "write attempt failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                },
                RetryDecision::GiveUp if error.is_retryable() => {
                    return Err(DeliveryError::retries_exhausted(attempt, error.to_string()));
                },
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(topic = %self.config.topic, "log transport closed");
        }
        Ok(())
    }

    fn destination(&self) -> &str {
        &self.config.topic
    }
}

/// Converts arbitrary bytes into a header value, replacing anything that is
/// not visible ASCII or a space.
fn header_value(raw: &[u8]) -> HeaderValue {
    HeaderValue::from_bytes(raw).unwrap_or_else(|_| {
        let cleaned: Vec<u8> =
            raw.iter().map(|&b| if (0x20..0x7f).contains(&b) { b } else { b'?' }).collect();
        HeaderValue::from_bytes(&cleaned).unwrap_or_else(|_| HeaderValue::from_static(""))
    })
}

/// In-memory transport for tests.
pub mod mock {
    use std::sync::Mutex;

    use tokio::sync::watch;

    use super::*;

    #[derive(Debug, Clone)]
    enum Behavior {
        Succeed,
        FailAlways(DeliveryError),
        FailTimes { remaining: usize, error: DeliveryError },
    }

    /// Records written messages; can be scripted to fail or pause.
    #[derive(Debug)]
    pub struct MemoryTransport {
        destination: String,
        messages: Mutex<Vec<LogMessage>>,
        behavior: Mutex<Behavior>,
        close_error: Mutex<Option<DeliveryError>>,
        paused: watch::Sender<bool>,
        write_calls: AtomicUsize,
        close_calls: AtomicUsize,
        closed: AtomicBool,
    }

    impl MemoryTransport {
        /// Creates a transport that accepts every write.
        pub fn new(destination: impl Into<String>) -> Self {
            Self {
                destination: destination.into(),
                messages: Mutex::new(Vec::new()),
                behavior: Mutex::new(Behavior::Succeed),
                close_error: Mutex::new(None),
                paused: watch::Sender::new(false),
                write_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }

        /// Makes every later write fail with `error`.
        pub fn fail_always(&self, error: DeliveryError) {
            *lock(&self.behavior) = Behavior::FailAlways(error);
        }

        /// Makes the next `times` writes fail with `error`.
        pub fn fail_times(&self, times: usize, error: DeliveryError) {
            *lock(&self.behavior) = Behavior::FailTimes { remaining: times, error };
        }

        /// Restores the default accept-everything behaviour.
        pub fn succeed(&self) {
            *lock(&self.behavior) = Behavior::Succeed;
        }

        /// Makes `close()` return `error`.
        pub fn fail_close(&self, error: DeliveryError) {
            *lock(&self.close_error) = Some(error);
        }

        /// Holds every write until [`resume`](Self::resume) is called.
        pub fn pause(&self) {
            self.paused.send_replace(true);
        }

        /// Releases paused writes.
        pub fn resume(&self) {
            self.paused.send_replace(false);
        }

        /// Messages written successfully, in order.
        pub fn messages(&self) -> Vec<LogMessage> {
            lock(&self.messages).clone()
        }

        /// Keys of written messages, in order.
        pub fn keys(&self) -> Vec<String> {
            lock(&self.messages).iter().map(LogMessage::key_str).collect()
        }

        /// Number of successfully written messages.
        pub fn message_count(&self) -> usize {
            lock(&self.messages).len()
        }

        /// Number of `write` calls, including ones still paused or failed.
        pub fn write_calls(&self) -> usize {
            self.write_calls.load(Ordering::SeqCst)
        }

        /// Number of `close` calls.
        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        fn next_result(&self) -> Result<()> {
            let mut behavior = lock(&self.behavior);
            match &mut *behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FailAlways(error) => Err(error.clone()),
                Behavior::FailTimes { remaining, error } => {
                    if *remaining == 0 {
                        return Ok(());
                    }
                    *remaining -= 1;
                    Err(error.clone())
                },
            }
        }
    }

    #[async_trait]
    impl LogTransport for MemoryTransport {
        async fn write(&self, message: &LogMessage) -> Result<()> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);

            let mut paused = self.paused.subscribe();
            // The sender lives in self, so this only errors if self is gone.
            let _ = paused.wait_for(|p| !*p).await;

            if self.closed.load(Ordering::Acquire) {
                return Err(DeliveryError::closed(&self.destination));
            }
            self.next_result()?;
            lock(&self.messages).push(message.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::Release);
            match lock(&self.close_error).clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        fn destination(&self) -> &str {
            &self.destination
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
