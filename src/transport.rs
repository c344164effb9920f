//! HTTP transport: cookie-jar session, transient retry, rate limiting
//!
//! A single fixed transport operation, `soap_action`, over a reused
//! cookie-jar `reqwest::Client`, adding transient-retry and rate-limiting
//! behavior on top: no retry middleware is pulled in, so the backoff loop
//! here is hand-rolled around `reqwest::Client::post` rather than pulled
//! in from `reqwest-retry`/`reqwest-middleware`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url};
use tokio::sync::Mutex;

#[cfg(feature = "tracing")]
use tracing::{debug, instrument, warn};

use crate::envelope;
use crate::error::{IhcError, IhcResult};
use crate::tls::FingerprintVerifier;
use crate::xml::XmlElement;

const RETRYABLE_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// How the transport should establish HTTPS, if at all.
pub enum TlsMode {
    /// `http://` base URL: no TLS.
    Plain,
    /// `https://` base URL, pinned against the SHA-1 fingerprint of a PEM
    /// certificate's bytes.
    Pinned { pem_bytes: Vec<u8> },
}

/// Gate-then-sleep-then-update rate limiter, one per [`Session`].
struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                #[cfg(feature = "tracing")]
                debug!(?remaining, "rate limiter sleeping before request");
                tokio::time::sleep(remaining).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// A cookie-bearing HTTP session against one controller base URL.
///
/// Holds the reusable `reqwest::Client` (cookie jar + connection pool),
/// retry/backoff configuration, and the rate limiter. Credentials
/// themselves live on [`crate::controller::Controller`]; the session only
/// knows how to move bytes.
pub struct Session {
    base_url: Url,
    client: Client,
    rate_limiter: RateLimiter,
    retry_attempts: u32,
    retry_backoff_factor: Duration,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl Session {
    /// Build a session against `base_url`, configuring TLS per `tls`.
    pub fn new(
        base_url: &str,
        tls: TlsMode,
        min_interval: Duration,
        retry_attempts: u32,
        retry_backoff_factor: Duration,
        request_timeout: Duration,
    ) -> IhcResult<Self> {
        let url = Url::parse(base_url).map_err(|e| IhcError::Protocol(format!("invalid base URL: {e}")))?;

        let mut builder = Client::builder().cookie_store(true).timeout(request_timeout);
        builder = match tls {
            TlsMode::Plain => builder,
            TlsMode::Pinned { pem_bytes } => {
                let verifier = FingerprintVerifier::from_pem(&pem_bytes)?;
                builder.use_preconfigured_tls(verifier.into_client_config())
            }
        };
        let client = builder
            .build()
            .map_err(IhcError::Transport)?;

        Ok(Self {
            base_url: url,
            client,
            rate_limiter: RateLimiter::new(min_interval),
            retry_attempts,
            retry_backoff_factor,
            request_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Issue one SOAP call against `service_path` with the given `action`
    /// and pre-built operation body, returning the parsed response element.
    #[cfg_attr(feature = "tracing", instrument(skip(self, body), fields(service = %service_path, action = %action)))]
    pub async fn soap_action(&self, service_path: &str, action: &str, body: &str) -> IhcResult<XmlElement> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IhcError::SessionClosed);
        }

        let url = self
            .base_url
            .join(service_path)
            .map_err(|e| IhcError::Protocol(format!("invalid service path {service_path}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| IhcError::Protocol("base URL has no host".to_string()))?
            .to_string();

        let envelope_xml = envelope::wrap(body);
        let content_length = envelope_xml.len();

        self.rate_limiter.wait().await;

        let response_text = self
            .post_with_retry(url, &host, action, envelope_xml, content_length)
            .await?;

        envelope::parse_body(&response_text)
    }

    async fn post_with_retry(
        &self,
        url: Url,
        host: &str,
        action: &str,
        body: String,
        content_length: usize,
    ) -> IhcResult<String> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .post(url.clone())
                .header("Host", host)
                .header("Content-Type", "text/xml; charset=UTF-8")
                .header("Cache-Control", "no-cache")
                .header("Content-Length", content_length.to_string())
                .header("SOAPAction", action)
                .timeout(self.request_timeout)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if RETRYABLE_STATUSES.contains(&response.status()) && attempt < self.retry_attempts => {
                    let backoff = self.retry_backoff_factor * 2u32.pow(attempt);
                    #[cfg(feature = "tracing")]
                    warn!(status = %response.status(), attempt, ?backoff, "transient HTTP failure, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.map_err(IhcError::Transport)?;
                    if !status.is_success() && status != StatusCode::INTERNAL_SERVER_ERROR {
                        return Err(IhcError::Protocol(format!("unexpected HTTP status {status}")));
                    }
                    return Ok(text);
                }
                Err(err) => return Err(IhcError::Transport(err)),
            }
        }
    }

    /// Mark the session closed; further calls fail with
    /// [`IhcError::SessionClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_are_502_503_504() {
        assert!(RETRYABLE_STATUSES.contains(&StatusCode::BAD_GATEWAY));
        assert!(RETRYABLE_STATUSES.contains(&StatusCode::SERVICE_UNAVAILABLE));
        assert!(RETRYABLE_STATUSES.contains(&StatusCode::GATEWAY_TIMEOUT));
        assert!(!RETRYABLE_STATUSES.contains(&StatusCode::BAD_REQUEST));
        assert!(!RETRYABLE_STATUSES.contains(&StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn backoff_sequence_is_0_2_0_4_0_8() {
        let factor = Duration::from_millis(200);
        let sequence: Vec<Duration> = (0..3).map(|attempt| factor * 2u32.pow(attempt)).collect();
        assert_eq!(
            sequence,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_gates_sequential_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn closed_session_rejects_further_calls() {
        let session = Session {
            base_url: Url::parse("http://example.invalid").unwrap(),
            client: Client::new(),
            rate_limiter: RateLimiter::new(Duration::ZERO),
            retry_attempts: 3,
            retry_backoff_factor: Duration::from_millis(200),
            request_timeout: Duration::from_secs(30),
            closed: AtomicBool::new(false),
        };
        session.close();
        assert!(session.closed.load(Ordering::Acquire));
    }
}
