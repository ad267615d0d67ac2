//! http-status and http-content-match probes

use std::time::Duration;

use async_trait::async_trait;

use super::Probe;
use crate::error::ProbeError;
use crate::models::{CheckKind, CheckSpec, ServiceDefinition};

const USER_AGENT: &str = "CCDC-Scoring/1.0";

/// Most body bytes read for a content match
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Room left under the executor's bound so a stalled reply is reported here
const MAX_TIMEOUT_MARGIN: Duration = Duration::from_millis(250);

pub struct HttpProbe {
    kind: CheckKind,
    client: reqwest::Client,
}

impl HttpProbe {
    /// Shared client: lab services use self-signed certs, so those are accepted
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            })
    }

    pub fn status(client: reqwest::Client) -> Self {
        Self { kind: CheckKind::HttpStatus, client }
    }

    pub fn content_match(client: reqwest::Client) -> Self {
        Self { kind: CheckKind::HttpContentMatch, client }
    }

    async fn get(&self, url: &str, budget: Duration) -> Result<reqwest::Response, ProbeError> {
        self.client
            .get(url)
            .timeout(budget)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, budget))
    }

    async fn exchange(&self, service: &ServiceDefinition, budget: Duration) -> Result<String, ProbeError> {
        match &service.check {
            CheckSpec::HttpStatus { path, status, require_body, tls } => {
                let url = build_url(&service.host, service.port, path, *tls);
                let resp = self.get(&url, budget).await?;
                let code = resp.status();

                match status {
                    Some(expected) if code.as_u16() != *expected => {
                        return Err(ProbeError::AssertionFailed(format!(
                            "HTTP {} (expected {})",
                            code.as_u16(),
                            expected
                        )))
                    }
                    None if !code.is_success() => {
                        return Err(ProbeError::AssertionFailed(format!(
                            "HTTP {} {}",
                            code.as_u16(),
                            code.canonical_reason().unwrap_or("")
                        )))
                    }
                    _ => {}
                }

                if *require_body {
                    let body = read_body(resp, budget).await?;
                    if body.is_empty() {
                        return Err(ProbeError::AssertionFailed(format!("HTTP {} with empty body", code.as_u16())));
                    }
                    return Ok(format!("HTTP {} OK ({} bytes)", code.as_u16(), body.len()));
                }
                Ok(format!("HTTP {} OK", code.as_u16()))
            }
            CheckSpec::HttpContentMatch { path, substring, tls } => {
                let url = build_url(&service.host, service.port, path, *tls);
                let resp = self.get(&url, budget).await?;
                let code = resp.status();
                if !code.is_success() {
                    return Err(ProbeError::AssertionFailed(format!("HTTP {}", code.as_u16())));
                }

                let body = read_body(resp, budget).await?;
                if body.contains(substring.as_str()) {
                    Ok(format!("HTTP {} body contains '{}' ({} bytes)", code.as_u16(), substring, body.len()))
                } else {
                    Err(ProbeError::AssertionFailed(format!("body missing '{}'", substring)))
                }
            }
            other => Err(ProbeError::Misconfigured(format!(
                "{} probe given {} check",
                self.kind,
                other.kind()
            ))),
        }
    }
}

/// Share of `timeout` the HTTP exchange may use
fn response_budget(timeout: Duration) -> Duration {
    timeout.saturating_sub((timeout / 10).min(MAX_TIMEOUT_MARGIN))
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> CheckKind {
        self.kind
    }

    /// A stalled or slow reply is FAIL; only failing to connect is ERROR
    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let budget = response_budget(timeout);
        match tokio::time::timeout(budget, self.exchange(service, budget)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::ResponseTimeout(budget)),
        }
    }
}

fn build_url(host: &str, port: u16, path: &str, tls: bool) -> String {
    let scheme = if tls { "https" } else { "http" };
    let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
    format!("{}://{}:{}{}", scheme, host, port, path)
}

async fn read_body(mut resp: reqwest::Response, budget: Duration) -> Result<String, ProbeError> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(|e| map_reqwest_error(e, budget))? {
        body.extend_from_slice(&chunk);
        if body.len() >= MAX_BODY_BYTES {
            body.truncate(MAX_BODY_BYTES);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn map_reqwest_error(err: reqwest::Error, budget: Duration) -> ProbeError {
    if err.is_connect() && is_refused(&err) {
        ProbeError::ConnectionRefused
    } else if err.is_timeout() {
        ProbeError::ResponseTimeout(budget)
    } else if err.is_connect() {
        ProbeError::Unreachable(err.to_string())
    } else if err.is_decode() || err.is_body() {
        ProbeError::ProtocolMismatch(err.to_string())
    } else {
        ProbeError::Unreachable(err.to_string())
    }
}

fn is_refused(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::ConnectionRefused;
        }
        source = e.source();
    }
    false
}
