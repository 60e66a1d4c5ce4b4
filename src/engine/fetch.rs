//! Single-filing retrieval: bounded retries, jittered backoff, payload validation and extraction.

use anyhow::{Context, Result};
use log::{debug, warn};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::FilingDescriptor;
use crate::engine::rate_limiter::RateLimiter;
use crate::engine::signal::StopSignal;
use crate::error::FetchError;
use crate::utils::config::FetchConsts;

/// Status and body of one GET.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below HTTP: nothing came back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Worth another attempt within the fetch budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

/// GET boundary against the archive. Implemented over HTTP here, faked in tests.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> std::result::Result<TransportResponse, TransportError>;
}

/// Blocking reqwest client with the identifying User-Agent and a fixed per-call timeout.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self { client })
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> std::result::Result<TransportResponse, TransportError> {
        let resp = self.client.get(url).send().map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(classify_reqwest)?;
        Ok(TransportResponse { status, body })
    }
}

/// Retry and validation knobs. [`Default`] carries the production values.
#[derive(Clone, Debug)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub first_delay: Duration,
    pub jitter: Duration,
    pub retry_base: Duration,
    pub throttle_base: Duration,
    pub throttle_floor: Duration,
    pub throttle_jitter: Duration,
    pub min_content_len: usize,
    pub doc_start: String,
    pub doc_end: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: FetchConsts::MAX_ATTEMPTS,
            first_delay: FetchConsts::FIRST_DELAY,
            jitter: FetchConsts::JITTER,
            retry_base: FetchConsts::RETRY_BASE,
            throttle_base: FetchConsts::THROTTLE_BASE,
            throttle_floor: FetchConsts::THROTTLE_FLOOR,
            throttle_jitter: FetchConsts::THROTTLE_JITTER,
            min_content_len: FetchConsts::MIN_CONTENT_LEN,
            doc_start: FetchConsts::DOC_START.to_string(),
            doc_end: FetchConsts::DOC_END.to_string(),
        }
    }
}

/// `base + uniform(0, spread)`.
fn jittered(base: Duration, spread: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    base + spread.mul_f64(factor)
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1_u32 << attempt.min(16))
}

impl FetchPolicy {
    /// Sleep before attempt `attempt` (0-based): short jitter first, exponential afterwards.
    pub fn pre_attempt_delay(&self, attempt: u32) -> Duration {
        let floor = if attempt == 0 {
            self.first_delay
        } else {
            exponential(self.retry_base, attempt) + self.first_delay
        };
        jittered(floor, self.jitter)
    }

    /// Extra wait after a 429 on attempt `attempt`.
    pub fn throttle_delay(&self, attempt: u32) -> Duration {
        jittered(
            exponential(self.throttle_base, attempt) + self.throttle_floor,
            self.throttle_jitter,
        )
    }
}

/// Return the target document if `content` wraps it between `start` and `end` (inclusive),
/// else the whole payload.
pub fn extract_document<'a>(content: &'a str, start: &str, end: &str) -> &'a str {
    let Some(begin) = content.find(start) else {
        return content;
    };
    match content[begin..].find(end) {
        Some(rel_end) => &content[begin..begin + rel_end + end.len()],
        None => content,
    }
}

/// Fetch operation shared by the download workers and the bulk pool.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<dyn RateLimiter>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<dyn RateLimiter>,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Retrieve one filing. Every attempt goes through the limiter; sleeps observe `stop`.
    pub fn fetch(
        &self,
        descriptor: &FilingDescriptor,
        stop: &StopSignal,
    ) -> std::result::Result<String, FetchError> {
        let accession = &descriptor.accession_number;
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if !stop.sleep(self.policy.pre_attempt_delay(attempt)) {
                return Err(FetchError::Cancelled);
            }
            self.limiter.admit();
            debug!(
                "Downloading {} (attempt {}) from {}",
                accession,
                attempt + 1,
                descriptor.url
            );
            let last_attempt = attempt + 1 == max_attempts;

            match self.transport.get(&descriptor.url) {
                Ok(resp) if resp.is_success() => {
                    self.limiter.report_success();
                    return self.validate(accession, resp.body);
                }
                Ok(resp) if resp.status == 429 => {
                    self.limiter.report_throttled();
                    warn!("Throttled on {} (attempt {})", accession, attempt + 1);
                    if last_attempt {
                        return Err(FetchError::Throttled {
                            attempts: max_attempts,
                        });
                    }
                    let wait = self.policy.throttle_delay(attempt);
                    debug!(
                        "Waiting {:?} before retry {}/{}",
                        wait,
                        attempt + 2,
                        max_attempts
                    );
                    if !stop.sleep(wait) {
                        return Err(FetchError::Cancelled);
                    }
                }
                Ok(resp) => {
                    warn!(
                        "Download failed for {}: HTTP {} ({})",
                        accession, resp.status, descriptor.url
                    );
                    return Err(FetchError::PermanentFetch {
                        status: resp.status,
                    });
                }
                Err(e) if e.is_transient() => {
                    warn!("{} on {} (attempt {})", e, accession, attempt + 1);
                    if last_attempt {
                        return Err(FetchError::TransientNetwork {
                            attempts: max_attempts,
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    warn!("Transport error for {}: {}", accession, e);
                    return Err(FetchError::Transport(e.to_string()));
                }
            }
        }
        // Only reachable if max_attempts were 0, which `max(1)` rules out.
        Err(FetchError::Throttled {
            attempts: max_attempts,
        })
    }

    fn validate(&self, accession: &str, body: String) -> std::result::Result<String, FetchError> {
        if body.len() < self.policy.min_content_len {
            warn!(
                "Suspiciously short content for {}: {} bytes",
                accession,
                body.len()
            );
            return Err(FetchError::Validation { len: body.len() });
        }
        let doc = extract_document(&body, &self.policy.doc_start, &self.policy.doc_end);
        if doc.len() == body.len() {
            Ok(body)
        } else {
            Ok(doc.to_string())
        }
    }
}
