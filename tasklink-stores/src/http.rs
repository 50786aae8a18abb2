//! Blocking HTTP with timeouts and retry for both store adapters.

use std::thread;
use std::time::Duration;

use serde_json::Value;

use tasklink_core::config::HttpConfig;
use tasklink_sync::StoreError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// The record does not exist; lookups answer `None`.
    NotFound,
    /// Rate limit or server error: retried.
    Transient,
    Rejected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}

/// Delay before retry number `retry` (1-based): exponential, capped.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .user_agent(concat!("tasklink/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }

    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    /// Issue a request, retrying transient failures, and decode the JSON
    /// body. `Ok(None)` means the remote answered 404.
    pub fn call<F>(&self, op: &str, send: F) -> Result<Option<Value>, StoreError>
    where
        F: Fn(&ureq::Agent) -> Result<ureq::Response, ureq::Error>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let message = match send(&self.agent) {
                Ok(response) => {
                    return response
                        .into_json::<Value>()
                        .map(Some)
                        .map_err(|e| StoreError::malformed(op, e.to_string()));
                }
                Err(ureq::Error::Status(status, response)) => match classify_status(status) {
                    StatusClass::NotFound => return Ok(None),
                    StatusClass::Transient => format!("status {status}"),
                    StatusClass::Success | StatusClass::Rejected => {
                        return Err(StoreError::Rejected {
                            op: op.to_owned(),
                            status,
                            message: response.into_string().unwrap_or_default(),
                        })
                    }
                },
                Err(ureq::Error::Transport(transport)) => transport.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(StoreError::Transient {
                    op: op.to_owned(),
                    attempts: attempt,
                    message,
                });
            }
            let delay = backoff_delay(self.backoff, attempt);
            tracing::warn!(
                "{op}: attempt {attempt}/{} failed ({message}); retrying in {delay:?}",
                self.max_attempts
            );
            thread::sleep(delay);
        }
    }

    /// Like [`HttpClient::call`] for requests whose record must exist.
    pub fn call_required<F>(&self, op: &str, send: F) -> Result<Value, StoreError>
    where
        F: Fn(&ureq::Agent) -> Result<ureq::Response, ureq::Error>,
    {
        self.call(op, send)?.ok_or_else(|| StoreError::Rejected {
            op: op.to_owned(),
            status: 404,
            message: "not found".to_owned(),
        })
    }
}
