//! banner-match probe
//!
//! Used for IMAP (`* OK`) and POP3 (`+OK`) style greetings.

use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use tokio::io::{AsyncRead, BufReader};

use super::{net, Probe};
use crate::error::ProbeError;
use crate::models::{CheckKind, CheckSpec, ServiceDefinition};

pub struct BannerProbe;

/// Compile a banner pattern the way the probe matches it
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Read the first line from `stream` and match it against `pattern`
pub async fn match_banner<S>(stream: S, pattern: &Regex, timeout: Duration) -> Result<String, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let banner = net::read_line(&mut reader, timeout).await?;

    if pattern.is_match(&banner) {
        Ok(format!("Banner: {}", banner))
    } else {
        Err(ProbeError::AssertionFailed(format!(
            "banner missing '{}': {}",
            pattern.as_str(),
            banner
        )))
    }
}

#[async_trait]
impl Probe for BannerProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::BannerMatch
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let CheckSpec::BannerMatch { pattern } = &service.check else {
            return Err(ProbeError::Misconfigured(format!(
                "banner probe given {} check",
                service.kind()
            )));
        };
        let pattern = compile_pattern(pattern).map_err(|e| ProbeError::Misconfigured(e.to_string()))?;

        let stream = net::connect(&service.host, service.port, timeout).await?;
        match_banner(stream, &pattern, timeout).await
    }
}
