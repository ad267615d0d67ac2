//! Configuration module
//!
//! Everything is read once at startup and fixed for the process lifetime.

use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use validator::Validate;

use crate::error::ConfigError;
use crate::models::{CheckSpec, QueryProtocol, ServiceDefinition};
use crate::probes::banner;

/// Placeholder expanded to the range network in a services file
const BASE_NET_PLACEHOLDER: &str = "{BASE_NET}";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Ludus range number, the X in 10.X.10.0/24
    pub range_id: u32,

    /// First three octets of the service network
    pub base_net: String,

    /// Time between round starts
    pub check_interval: Duration,

    /// Share of the interval a round may use before stragglers are abandoned
    pub round_deadline_fraction: f64,

    pub max_score_per_round: u64,

    pub services: Vec<ServiceDefinition>,

    /// Server port
    pub port: u16,

    /// Round journal location, `None` disables it
    pub database_url: Option<String>,

    /// Rounds kept in memory for history queries
    pub history_retention: usize,

    pub max_concurrent_probes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// An unset `RANGE_ID` is taken from this host's own range address.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            let value = env::var(key).ok().filter(|v| !v.trim().is_empty());
            match value {
                None if key == "RANGE_ID" => detect_range_id().map(|id| id.to_string()),
                value => value,
            }
        })
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let range_id: u32 = parse(&lookup, "RANGE_ID", 10)?;
        if range_id > 255 {
            return Err(invalid("RANGE_ID", "must be an octet"));
        }

        let base_net = lookup("BASE_NET")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("10.{}.10", range_id));

        let interval_secs: u64 = parse(&lookup, "CHECK_INTERVAL", 60)?;
        if interval_secs < 1 {
            return Err(invalid("CHECK_INTERVAL", "must be at least 1 second"));
        }

        let round_deadline_fraction: f64 = parse(&lookup, "ROUND_DEADLINE_FRACTION", 0.9)?;
        if !(round_deadline_fraction > 0.0 && round_deadline_fraction <= 1.0) {
            return Err(invalid("ROUND_DEADLINE_FRACTION", "must be in (0, 1]"));
        }

        let probe_timeout: f64 = parse(&lookup, "PROBE_TIMEOUT", 10.0)?;
        if !(probe_timeout > 0.0 && probe_timeout.is_finite()) {
            return Err(invalid("PROBE_TIMEOUT", "must be positive"));
        }

        let mut services = match lookup("SERVICES_FILE").filter(|v| !v.trim().is_empty()) {
            Some(path) => load_services_file(&path, &base_net)?,
            None => default_services(&base_net),
        };
        for service in &mut services {
            service.timeout_secs.get_or_insert(probe_timeout);
        }
        validate_services(&services)?;

        let weight_sum = services
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.weight))
            .ok_or_else(|| invalid("MAX_SCORE_PER_ROUND", "sum of weights overflows"))?;
        let max_score_per_round: u64 = parse(&lookup, "MAX_SCORE_PER_ROUND", weight_sum)?;
        if max_score_per_round == 0 {
            return Err(invalid("MAX_SCORE_PER_ROUND", "must be positive"));
        }

        let history_retention: usize = parse(&lookup, "HISTORY_RETENTION", 1000)?;
        let max_concurrent_probes: usize = parse(&lookup, "MAX_CONCURRENT_PROBES", 32)?;
        if history_retention == 0 || max_concurrent_probes == 0 {
            return Err(invalid("HISTORY_RETENTION", "retention and concurrency must be positive"));
        }

        let database_url = match lookup("DATABASE_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some("sqlite://scores.db".to_string()),
        };

        Ok(Self {
            range_id,
            base_net,
            check_interval: Duration::from_secs(interval_secs),
            round_deadline_fraction,
            max_score_per_round,
            services,
            port: parse(&lookup, "PORT", 8080)?,
            database_url,
            history_retention,
            max_concurrent_probes,
        })
    }

    pub fn round_deadline(&self) -> Duration {
        self.check_interval.mul_f64(self.round_deadline_fraction)
    }
}

// ============================================================================
// RANGE DETECTION
// ============================================================================

/// Read the range number off the scoring host's interfaces
fn detect_range_id() -> Option<u32> {
    let output = match Command::new("ip").args(["addr", "show"]).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("Range detection failed, using default: {}", e);
            return None;
        }
    };

    if !output.status.success() {
        tracing::warn!(
            "ip addr show exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return None;
    }

    let range_id = range_id_from_ip_addr(&String::from_utf8_lossy(&output.stdout));
    match range_id {
        Some(id) => tracing::info!("Detected range {} from local address", id),
        None => tracing::warn!("No 10.X.99.Y address found, using default range"),
    }
    range_id
}

/// First `10.X.99.Y` inet address in `ip addr show` output gives X
pub fn range_id_from_ip_addr(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("inet") => fields.next(),
                _ => None,
            }
        })
        .filter_map(|cidr| cidr.split('/').next()?.parse::<Ipv4Addr>().ok())
        .find_map(|ip| match ip.octets() {
            [10, range, 99, _] => Some(u32::from(range)),
            _ => None,
        })
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { key, reason: reason.to_string() }
}

/// Parse `key`, falling back to `default` when unset or blank
fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue { key, reason: format!("'{}': {}", raw, e) }),
        None => Ok(default),
    }
}

fn load_services_file(path: &str, base_net: &str) -> Result<Vec<ServiceDefinition>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ServicesFile {
        path: path.to_string(),
        source,
    })?;

    let mut services: Vec<ServiceDefinition> = serde_json::from_str(&raw)?;
    for service in &mut services {
        service.host = service.host.replace(BASE_NET_PLACEHOLDER, base_net);
    }
    tracing::info!("Loaded {} services from {}", services.len(), path);
    Ok(services)
}

/// Reject catalogs that would make scoring ambiguous or probes unrunnable
pub fn validate_services(services: &[ServiceDefinition]) -> Result<(), ConfigError> {
    if services.is_empty() {
        return Err(ConfigError::NoServices);
    }

    let mut seen = HashSet::new();
    for service in services {
        let fail = |reason: String| ConfigError::InvalidService { id: service.id.clone(), reason };

        service.validate().map_err(|e| fail(e.to_string()))?;
        if !seen.insert(service.id.as_str()) {
            return Err(fail("duplicate id".to_string()));
        }
        if let CheckSpec::BannerMatch { pattern } = &service.check {
            banner::compile_pattern(pattern).map_err(|e| fail(e.to_string()))?;
        }
    }
    Ok(())
}

/// The stock blue-team range: ten services across six machines
pub fn default_services(base_net: &str) -> Vec<ServiceDefinition> {
    let svc = |id: &str, name: &str, machine: &str, octet: u8, port: u16, weight: u64, check: CheckSpec| {
        ServiceDefinition {
            id: id.to_string(),
            name: name.to_string(),
            machine: machine.to_string(),
            host: format!("{}.{}", base_net, octet),
            port,
            weight,
            timeout_secs: None,
            check,
        }
    };
    let banner = |expect: &str| CheckSpec::BannerMatch { pattern: regex::escape(expect) };
    let query = |protocol| CheckSpec::CredentialedQuery { protocol, credentials: None };

    // Falls back to no assertion when BASE_NET isn't a dotted triple
    let web_ip = format!("{}.31", base_net).parse::<Ipv4Addr>().ok();

    vec![
        svc("http", "HTTP Web Server", "WEB01", 31, 80, 100, CheckSpec::HttpStatus {
            path: "/".to_string(),
            status: Some(200),
            require_body: true,
            tls: false,
        }),
        svc("ftp", "FTP Server", "FTP01", 81, 21, 50, query(QueryProtocol::Ftp)),
        svc("smtp", "SMTP (Mail)", "MAIL01", 61, 25, 75, query(QueryProtocol::Smtp)),
        svc("imap", "IMAP (Mail)", "MAIL01", 61, 143, 50, banner("* OK")),
        svc("pop3", "POP3 (Mail)", "MAIL01", 61, 110, 50, banner("+OK")),
        svc("dns", "DNS Server", "DNS01", 71, 53, 100, CheckSpec::DnsResolve {
            name: "web.ludus.domain".to_string(),
            expected: web_ip,
        }),
        svc("mysql", "MySQL Database", "DB01", 41, 3306, 75, query(QueryProtocol::Mysql)),
        svc("smb", "SMB File Share", "FILESVR", 51, 445, 50, CheckSpec::TcpConnect),
        svc("ldap", "LDAP (Active Directory)", "DC01", 11, 389, 100, CheckSpec::TcpConnect),
        svc("kerberos", "Kerberos (Active Directory)", "DC01", 11, 88, 100, CheckSpec::TcpConnect),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    fn services_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.range_id, 10);
        assert_eq!(cfg.base_net, "10.10.10");
        assert_eq!(cfg.services.len(), 10);
        assert_eq!(cfg.max_score_per_round, 750);
        assert_eq!(cfg.check_interval, Duration::from_secs(60));
        assert_eq!(cfg.round_deadline(), Duration::from_secs(54));
        assert_eq!(cfg.database_url.as_deref(), Some("sqlite://scores.db"));
        assert!(cfg.services.iter().all(|s| s.timeout() == Duration::from_secs(10)));

        let http = cfg.services.iter().find(|s| s.id == "http").unwrap();
        assert!(matches!(
            http.check,
            CheckSpec::HttpStatus { status: Some(200), require_body: true, .. }
        ));
    }

    #[test]
    fn test_range_id_drives_catalog() {
        let cfg = config(&[("RANGE_ID", "7")]).unwrap();
        assert_eq!(cfg.base_net, "10.7.10");

        let dns = cfg.services.iter().find(|s| s.id == "dns").unwrap();
        assert_eq!(dns.host, "10.7.10.71");
        assert_eq!(
            dns.check,
            CheckSpec::DnsResolve {
                name: "web.ludus.domain".to_string(),
                expected: Some(Ipv4Addr::new(10, 7, 10, 31)),
            }
        );
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("CHECK_INTERVAL", "30"),
            ("MAX_SCORE_PER_ROUND", "500"),
            ("PROBE_TIMEOUT", "2.5"),
            ("DATABASE_URL", ""),
        ])
        .unwrap();
        assert_eq!(cfg.check_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_score_per_round, 500);
        assert_eq!(cfg.services[0].timeout(), Duration::from_millis(2500));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            config(&[("CHECK_INTERVAL", "0")]),
            Err(ConfigError::InvalidValue { key: "CHECK_INTERVAL", .. })
        ));
        assert!(matches!(
            config(&[("ROUND_DEADLINE_FRACTION", "1.5")]),
            Err(ConfigError::InvalidValue { key: "ROUND_DEADLINE_FRACTION", .. })
        ));
        assert!(matches!(
            config(&[("PORT", "http")]),
            Err(ConfigError::InvalidValue { key: "PORT", .. })
        ));
    }

    #[test]
    fn test_services_file_with_placeholder() {
        let file = services_file(
            r#"[
                {"id": "web", "host": "{BASE_NET}.31", "port": 80, "weight": 40,
                 "check": {"kind": "http-content-match", "substring": "Welcome"}},
                {"id": "pop3", "host": "{BASE_NET}.61", "port": 110, "weight": 10, "timeout_secs": 3,
                 "check": {"kind": "banner-match", "pattern": "\\+OK"}}
            ]"#,
        );
        let path = file.path().to_string_lossy().to_string();
        let cfg = config(&[("SERVICES_FILE", path.as_str()), ("RANGE_ID", "3")]).unwrap();

        assert_eq!(cfg.services.len(), 2);
        assert_eq!(cfg.services[0].host, "10.3.10.31");
        assert_eq!(cfg.services[1].timeout(), Duration::from_secs(3));
        assert_eq!(cfg.max_score_per_round, 50);
    }

    #[test]
    fn test_services_file_validation() {
        let dupes = services_file(
            r#"[
                {"id": "a", "host": "h", "port": 1, "weight": 1, "check": {"kind": "tcp-connect"}},
                {"id": "a", "host": "h", "port": 2, "weight": 1, "check": {"kind": "tcp-connect"}}
            ]"#,
        );
        let path = dupes.path().to_string_lossy().to_string();
        assert!(matches!(
            config(&[("SERVICES_FILE", path.as_str())]),
            Err(ConfigError::InvalidService { .. })
        ));

        let bad_regex = services_file(
            r#"[{"id": "imap", "host": "h", "port": 143, "weight": 1,
                 "check": {"kind": "banner-match", "pattern": "(unclosed"}}]"#,
        );
        let path = bad_regex.path().to_string_lossy().to_string();
        assert!(matches!(
            config(&[("SERVICES_FILE", path.as_str())]),
            Err(ConfigError::InvalidService { .. })
        ));

        let zero_weight = services_file(
            r#"[{"id": "a", "host": "h", "port": 1, "weight": 0, "check": {"kind": "tcp-connect"}}]"#,
        );
        let path = zero_weight.path().to_string_lossy().to_string();
        assert!(config(&[("SERVICES_FILE", path.as_str())]).is_err());

        let empty = services_file("[]");
        let path = empty.path().to_string_lossy().to_string();
        assert!(matches!(config(&[("SERVICES_FILE", path.as_str())]), Err(ConfigError::NoServices)));
    }

    #[test]
    fn test_range_id_from_ip_addr() {
        let output = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever
    inet6 ::1/128 scope host noprefixroute
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff
    inet 10.23.10.5/24 brd 10.23.10.255 scope global eth0
3: eth1: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    inet 10.42.99.10/24 brd 10.42.99.255 scope global dynamic eth1
    inet 10.43.99.11/24 scope global secondary eth1
";
        assert_eq!(range_id_from_ip_addr(output), Some(42));
    }

    #[test]
    fn test_range_id_from_ip_addr_without_range_address() {
        assert_eq!(range_id_from_ip_addr(""), None);
        assert_eq!(range_id_from_ip_addr("    inet 192.168.1.4/24 scope global wlan0\n"), None);
        assert_eq!(range_id_from_ip_addr("    inet 10.5.99/24 scope global eth0\n"), None);
    }

    #[test]
    fn test_missing_services_file() {
        assert!(matches!(
            config(&[("SERVICES_FILE", "/nonexistent/services.json")]),
            Err(ConfigError::ServicesFile { .. })
        ));
    }
}
