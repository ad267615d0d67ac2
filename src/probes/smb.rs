//! smb-share-list and smb-file-read probes
//!
//! Both drive `smbclient` as a child process. The child is killed if the
//! probe future is dropped, so an abandoned round leaves nothing running.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::Probe;
use crate::error::ProbeError;
use crate::models::{CheckKind, CheckSpec, Credentials, ServiceDefinition};

const DEFAULT_BINARY: &str = "smbclient";

#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub name: String,
    pub kind: String,
    pub comment: String,
}

pub struct SmbProbe {
    kind: CheckKind,
    binary: String,
}

impl SmbProbe {
    pub fn share_list() -> Self {
        Self { kind: CheckKind::SmbShareList, binary: DEFAULT_BINARY.to_string() }
    }

    pub fn file_read() -> Self {
        Self { kind: CheckKind::SmbFileRead, binary: DEFAULT_BINARY.to_string() }
    }

    /// Use a different `smbclient` executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: Vec<String>, creds: Option<&Credentials>, timeout: Duration) -> Result<String, ProbeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Keep the password off the command line
        match creds {
            Some(c) => {
                cmd.arg("-U").arg(&c.username).env("PASSWD", &c.password);
            }
            None => {
                cmd.arg("-N");
            }
        }

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProbeError::Misconfigured(format!("cannot run {}: {}", self.binary, e)));
            }
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(&format!("{}\n{}", stdout, stderr), output.status.code()))
    }
}

/// Map smbclient's NT_STATUS text onto the probe taxonomy
pub fn classify_failure(output: &str, exit_code: Option<i32>) -> ProbeError {
    let status = output
        .split_whitespace()
        .find(|w| w.starts_with("NT_STATUS_"))
        .map(|w| w.trim_end_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_'));

    match status {
        Some("NT_STATUS_CONNECTION_REFUSED") => ProbeError::ConnectionRefused,
        Some(s @ ("NT_STATUS_IO_TIMEOUT" | "NT_STATUS_HOST_UNREACHABLE" | "NT_STATUS_NETWORK_UNREACHABLE")) => {
            ProbeError::Unreachable(s.to_string())
        }
        Some(s) => ProbeError::AssertionFailed(s.to_string()),
        None => ProbeError::ProtocolMismatch(format!(
            "smbclient exited with {}",
            exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string())
        )),
    }
}

/// Parse `smbclient -L -g` output (`Disk|name|comment` lines)
pub fn parse_share_list(output: &str) -> Vec<Share> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '|');
            let kind = parts.next()?;
            if !matches!(kind, "Disk" | "IPC" | "Printer") {
                return None;
            }
            let name = parts.next()?.to_string();
            let comment = parts.next().unwrap_or("").to_string();
            Some(Share { name, kind: kind.to_string(), comment })
        })
        .collect()
}

fn timeout_arg(timeout: Duration) -> String {
    timeout.as_secs().max(1).to_string()
}

/// Arguments for a share listing
pub fn list_args(host: &str, port: u16, timeout: Duration) -> Vec<String> {
    vec![
        "-L".to_string(),
        format!("//{}", host),
        "-p".to_string(),
        port.to_string(),
        "-t".to_string(),
        timeout_arg(timeout),
        "-g".to_string(),
    ]
}

/// Arguments to stream one file to stdout. `get` is the only command issued.
pub fn get_args(host: &str, port: u16, share: &str, path: &str, timeout: Duration) -> Result<Vec<String>, ProbeError> {
    // smbclient splits -c on ';' and we quote the path ourselves
    if path.contains(['"', ';']) || share.contains(['/', '\\', ';']) {
        return Err(ProbeError::Misconfigured(format!("unsafe share path {}/{}", share, path)));
    }

    Ok(vec![
        format!("//{}/{}", host, share),
        "-p".to_string(),
        port.to_string(),
        "-t".to_string(),
        timeout_arg(timeout),
        "-c".to_string(),
        format!("get \"{}\" -", path.replace('/', "\\")),
    ])
}

#[async_trait]
impl Probe for SmbProbe {
    fn kind(&self) -> CheckKind {
        self.kind
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        match (&service.check, self.kind) {
            (CheckSpec::SmbShareList { share, credentials }, CheckKind::SmbShareList) => {
                let args = list_args(&service.host, service.port, timeout);
                let output = self.run(args, credentials.as_ref(), timeout).await?;
                let shares = parse_share_list(&output);

                if shares.is_empty() {
                    return Err(ProbeError::ProtocolMismatch("no shares listed".to_string()));
                }
                match share {
                    Some(want) if !shares.iter().any(|s| s.name.eq_ignore_ascii_case(want)) => {
                        Err(ProbeError::AssertionFailed(format!("share '{}' not listed", want)))
                    }
                    _ => {
                        let names: Vec<&str> = shares.iter().map(|s| s.name.as_str()).collect();
                        Ok(format!("{} shares: {}", shares.len(), names.join(", ")))
                    }
                }
            }
            (CheckSpec::SmbFileRead { share, path, contains, credentials }, CheckKind::SmbFileRead) => {
                let args = get_args(&service.host, service.port, share, path, timeout)?;
                let body = self.run(args, credentials.as_ref(), timeout).await?;

                match contains {
                    Some(needle) if !body.contains(needle.as_str()) => Err(ProbeError::AssertionFailed(format!(
                        "{}/{} missing '{}'",
                        share, path, needle
                    ))),
                    _ => Ok(format!("Read {}/{} ({} bytes)", share, path, body.len())),
                }
            }
            _ => Err(ProbeError::Misconfigured(format!(
                "{} probe given {} check",
                self.kind,
                service.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeFault;
    use crate::models::OutcomeStatus;
    use crate::probes::execute;

    const LISTING: &str = "\
Disk|ADMIN$|Remote Admin
Disk|public|Public files
IPC|IPC$|IPC Service (Samba 4.15)
Workgroup|LUDUS|FILESVR
";

    #[test]
    fn test_parse_share_list() {
        let shares = parse_share_list(LISTING);
        assert_eq!(shares.len(), 3);
        assert_eq!(shares[1].name, "public");
        assert_eq!(shares[1].comment, "Public files");
        assert_eq!(shares[2].kind, "IPC");
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("session setup failed: NT_STATUS_LOGON_FAILURE", Some(1)),
            ProbeError::AssertionFailed("NT_STATUS_LOGON_FAILURE".to_string())
        );
        assert_eq!(
            classify_failure("Connection to 10.10.10.51 failed (Error NT_STATUS_CONNECTION_REFUSED)", Some(1)),
            ProbeError::ConnectionRefused
        );
        assert!(matches!(
            classify_failure("do_connect: NT_STATUS_IO_TIMEOUT", Some(1)),
            ProbeError::Unreachable(_)
        ));
        assert!(matches!(classify_failure("", None), ProbeError::ProtocolMismatch(_)));
    }

    #[test]
    fn test_get_args_quote_path_and_reject_injection() {
        let args = get_args("10.10.10.51", 445, "public", "docs/readme.txt", Duration::from_secs(10)).unwrap();
        assert_eq!(args[0], "//10.10.10.51/public");
        assert_eq!(args.last().unwrap(), "get \"docs\\readme.txt\" -");

        let err = get_args("h", 445, "public", "x; del y", Duration::from_secs(10)).unwrap_err();
        assert_eq!(err.fault(), ProbeFault::Misconfigured);
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let probe = SmbProbe::share_list().with_binary("/nonexistent/smbclient");
        let svc = ServiceDefinition {
            id: "smb".to_string(),
            name: "SMB (File Share)".to_string(),
            machine: "FILESVR".to_string(),
            host: "127.0.0.1".to_string(),
            port: 445,
            weight: 50,
            timeout_secs: Some(2.0),
            check: CheckSpec::SmbShareList { share: None, credentials: None },
        };

        let outcome = execute(&probe, &svc, Duration::from_secs(2)).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.fault, Some(ProbeFault::Misconfigured));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_misconfigured() {
        let svc = ServiceDefinition {
            id: "web".to_string(),
            name: String::new(),
            machine: String::new(),
            host: "127.0.0.1".to_string(),
            port: 80,
            weight: 1,
            timeout_secs: None,
            check: CheckSpec::TcpConnect,
        };
        let err = SmbProbe::file_read().check(&svc, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Misconfigured(_)));
    }
}
