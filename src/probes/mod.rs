//! Probe registry
//!
//! Every check kind implements [`Probe`]. The executor never matches on the
//! kind itself: it looks the implementation up here and calls [`execute`],
//! which wraps the probe in an outer timeout and folds the result into a
//! [`ProbeOutcome`].

pub mod net;
pub mod tcp;
pub mod http;
pub mod banner;
pub mod credentialed;
pub mod mysql;
pub mod dns;
pub mod smb;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ProbeError;
use crate::models::{CheckKind, ProbeOutcome, ServiceDefinition};

/// One protocol-specific check.
///
/// `check` returns a short success message or the reason the service is not
/// healthy. Implementations must be read-only against the target.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> CheckKind;

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError>;
}

/// Run `probe` against `service`, never taking longer than `timeout`.
///
/// The bound is enforced here, outside the probe: targets may stall any
/// read indefinitely.
pub async fn execute(probe: &dyn Probe, service: &ServiceDefinition, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, probe.check(service, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };
    ProbeOutcome::from_result(result, started.elapsed())
}

/// Probe implementations keyed by the kind they handle
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: HashMap<CheckKind, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a probe for every built-in kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let http = http::HttpProbe::client();

        registry.register(Arc::new(tcp::TcpConnectProbe));
        registry.register(Arc::new(http::HttpProbe::status(http.clone())));
        registry.register(Arc::new(http::HttpProbe::content_match(http)));
        registry.register(Arc::new(banner::BannerProbe));
        registry.register(Arc::new(credentialed::CredentialedQueryProbe));
        registry.register(Arc::new(dns::DnsResolveProbe));
        registry.register(Arc::new(dns::ZoneTransferProbe));
        registry.register(Arc::new(smb::SmbProbe::share_list()));
        registry.register(Arc::new(smb::SmbProbe::file_read()));
        registry
    }

    /// Add or replace the implementation for `probe.kind()`
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        if self.probes.insert(probe.kind(), probe.clone()).is_some() {
            tracing::debug!("Replaced probe for kind {}", probe.kind());
        }
    }

    pub fn get(&self, kind: CheckKind) -> Option<Arc<dyn Probe>> {
        self.probes.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<CheckKind> {
        let mut kinds: Vec<_> = self.probes.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
