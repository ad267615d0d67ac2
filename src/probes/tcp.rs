//! tcp-connect probe

use std::time::Duration;

use async_trait::async_trait;

use super::{net, Probe};
use crate::error::ProbeError;
use crate::models::{CheckKind, ServiceDefinition};

/// PASS iff the TCP handshake completes
pub struct TcpConnectProbe;

#[async_trait]
impl Probe for TcpConnectProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::TcpConnect
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let _stream = net::connect(&service.host, service.port, timeout).await?;
        Ok("Port open".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckSpec, OutcomeStatus};
    use crate::probes::execute;
    use tokio::net::TcpListener;

    fn service(port: u16) -> ServiceDefinition {
        ServiceDefinition {
            id: "ldap".to_string(),
            name: "LDAP".to_string(),
            machine: "DC01".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight: 100,
            timeout_secs: Some(2.0),
            check: CheckSpec::TcpConnect,
        }
    }

    #[tokio::test]
    async fn test_open_port_passes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = execute(&TcpConnectProbe, &service(port), Duration::from_secs(2)).await;
        assert_eq!(outcome.status, OutcomeStatus::Pass);
        assert_eq!(outcome.message, "Port open");
    }

    #[tokio::test]
    async fn test_closed_port_errors() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let outcome = execute(&TcpConnectProbe, &service(port), Duration::from_secs(2)).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
    }
}
