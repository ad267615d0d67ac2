//! Service definition model

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Per-service probe timeout when the catalog doesn't set one
pub const DEFAULT_PROBE_TIMEOUT_SECS: f64 = 10.0;

/// One monitored service. Loaded at startup, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceDefinition {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// VM the service lives on
    #[serde(default)]
    pub machine: String,
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    /// Points awarded for a passing round
    #[validate(range(min = 1))]
    pub weight: u64,
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, max = 300.0))]
    pub timeout_secs: Option<f64>,
    pub check: CheckSpec,
}

impl ServiceDefinition {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS))
    }

    pub fn kind(&self) -> CheckKind {
        self.check.kind()
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

/// Protocols covered by the credentialed-query kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryProtocol {
    Ftp,
    Smtp,
    Mysql,
}

/// Kind-specific expectations, tagged by probe kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CheckSpec {
    TcpConnect,
    HttpStatus {
        #[serde(default = "default_path")]
        path: String,
        /// Exact status to require; any 2xx when unset
        #[serde(default)]
        status: Option<u16>,
        /// Also fail a matching status that comes back with an empty body
        #[serde(default)]
        require_body: bool,
        #[serde(default)]
        tls: bool,
    },
    HttpContentMatch {
        #[serde(default = "default_path")]
        path: String,
        substring: String,
        #[serde(default)]
        tls: bool,
    },
    BannerMatch {
        /// Case-insensitive regex matched against the first line
        pattern: String,
    },
    CredentialedQuery {
        protocol: QueryProtocol,
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    DnsResolve {
        name: String,
        #[serde(default)]
        expected: Option<Ipv4Addr>,
    },
    DnsZoneTransfer {
        zone: String,
    },
    SmbShareList {
        /// Share that must appear in the listing
        #[serde(default)]
        share: Option<String>,
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    SmbFileRead {
        share: String,
        path: String,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        credentials: Option<Credentials>,
    },
}

fn default_path() -> String {
    "/".to_string()
}

impl CheckSpec {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckSpec::TcpConnect => CheckKind::TcpConnect,
            CheckSpec::HttpStatus { .. } => CheckKind::HttpStatus,
            CheckSpec::HttpContentMatch { .. } => CheckKind::HttpContentMatch,
            CheckSpec::BannerMatch { .. } => CheckKind::BannerMatch,
            CheckSpec::CredentialedQuery { .. } => CheckKind::CredentialedQuery,
            CheckSpec::DnsResolve { .. } => CheckKind::DnsResolve,
            CheckSpec::DnsZoneTransfer { .. } => CheckKind::DnsZoneTransfer,
            CheckSpec::SmbShareList { .. } => CheckKind::SmbShareList,
            CheckSpec::SmbFileRead { .. } => CheckKind::SmbFileRead,
        }
    }
}

/// Registry key for probe implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    TcpConnect,
    HttpStatus,
    HttpContentMatch,
    BannerMatch,
    CredentialedQuery,
    DnsResolve,
    DnsZoneTransfer,
    SmbShareList,
    SmbFileRead,
}

impl CheckKind {
    pub const ALL: [CheckKind; 9] = [
        CheckKind::TcpConnect,
        CheckKind::HttpStatus,
        CheckKind::HttpContentMatch,
        CheckKind::BannerMatch,
        CheckKind::CredentialedQuery,
        CheckKind::DnsResolve,
        CheckKind::DnsZoneTransfer,
        CheckKind::SmbShareList,
        CheckKind::SmbFileRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TcpConnect => "tcp-connect",
            Self::HttpStatus => "http-status",
            Self::HttpContentMatch => "http-content-match",
            Self::BannerMatch => "banner-match",
            Self::CredentialedQuery => "credentialed-query",
            Self::DnsResolve => "dns-resolve",
            Self::DnsZoneTransfer => "dns-zone-transfer",
            Self::SmbShareList => "smb-share-list",
            Self::SmbFileRead => "smb-file-read",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
