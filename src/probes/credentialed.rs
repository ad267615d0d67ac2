//! credentialed-query probe
//!
//! Log in, then run one harmless follow-up command. Both steps must succeed.
//!
//! | protocol | login                 | follow-up |
//! |----------|-----------------------|-----------|
//! | ftp      | `USER`/`PASS` → 230   | `PWD` → 257 |
//! | smtp     | `EHLO` (+ `AUTH PLAIN`) | `NOOP` → 250 |
//! | mysql    | handshake (+ native password) | `COM_PING` |

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{mysql, net, Probe};
use crate::error::ProbeError;
use crate::models::{CheckKind, CheckSpec, Credentials, QueryProtocol, ServiceDefinition};

const EHLO_DOMAIN: &str = "scoring.ccdc.test";

/// Multi-line replies longer than this are treated as hostile
const MAX_REPLY_LINES: usize = 64;

pub struct CredentialedQueryProbe;

#[async_trait]
impl Probe for CredentialedQueryProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::CredentialedQuery
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let CheckSpec::CredentialedQuery { protocol, credentials } = &service.check else {
            return Err(ProbeError::Misconfigured(format!(
                "credentialed-query probe given {} check",
                service.kind()
            )));
        };

        let stream = net::connect(&service.host, service.port, timeout).await?;
        match protocol {
            QueryProtocol::Ftp => {
                let creds = credentials.clone().unwrap_or_else(anonymous_ftp);
                ftp_session(stream, &creds, timeout).await
            }
            QueryProtocol::Smtp => smtp_session(stream, credentials.as_ref(), timeout).await,
            QueryProtocol::Mysql => mysql::mysql_session(stream, credentials.as_ref(), timeout).await,
        }
    }
}

fn anonymous_ftp() -> Credentials {
    Credentials {
        username: "anonymous".to_string(),
        password: "scoring@ccdc.test".to_string(),
    }
}

/// Read one FTP/SMTP style reply, following `NNN-` continuation lines.
///
/// Returns the code and the text of the first line.
pub async fn read_reply<R>(reader: &mut R, timeout: Duration) -> Result<(u16, String), ProbeError>
where
    R: AsyncBufRead + Unpin,
{
    let first = net::read_line(reader, timeout).await?;
    let code = parse_code(&first)?;
    let text = first.get(4..).unwrap_or("").to_string();

    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", code);
        let mut lines = 1;
        loop {
            let line = net::read_line(reader, timeout).await?;
            if line.starts_with(&terminator) || line == code.to_string() {
                break;
            }
            lines += 1;
            if lines > MAX_REPLY_LINES {
                return Err(ProbeError::ProtocolMismatch("reply too long".to_string()));
            }
        }
    }

    Ok((code, text))
}

fn parse_code(line: &str) -> Result<u16, ProbeError> {
    line.get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| ProbeError::ProtocolMismatch(format!("not a reply line: {}", line)))
}

async fn command<S>(reader: &mut BufReader<S>, line: &str, timeout: Duration) -> Result<(u16, String), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = reader.get_mut();
    stream
        .write_all(format!("{}\r\n", line).as_bytes())
        .await
        .map_err(|e| ProbeError::from_io(e, timeout))?;
    stream.flush().await.map_err(|e| ProbeError::from_io(e, timeout))?;
    read_reply(reader, timeout).await
}

fn expect(step: &str, got: (u16, String), accepted: &[u16]) -> Result<String, ProbeError> {
    let (code, text) = got;
    if accepted.contains(&code) {
        Ok(text)
    } else {
        Err(ProbeError::AssertionFailed(format!("{} rejected: {} {}", step, code, text)))
    }
}

/// FTP login followed by `PWD`. Never issues a write command.
pub async fn ftp_session<S>(stream: S, creds: &Credentials, timeout: Duration) -> Result<String, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let (code, banner) = read_reply(&mut reader, timeout).await?;
    if code != 220 {
        return Err(ProbeError::ProtocolMismatch(format!("expected 220 greeting, got {}", code)));
    }

    let (code, text) = command(&mut reader, &format!("USER {}", creds.username), timeout).await?;
    match code {
        230 => {}
        331 | 332 => {
            let reply = command(&mut reader, &format!("PASS {}", creds.password), timeout).await?;
            expect("login", reply, &[230, 202])?;
        }
        _ => {
            return Err(ProbeError::AssertionFailed(format!("login rejected: {} {}", code, text)));
        }
    }

    let cwd = expect("PWD", command(&mut reader, "PWD", timeout).await?, &[257])?;
    // Best effort, the verdict is already in
    let _ = command(&mut reader, "QUIT", timeout).await;

    Ok(format!("Login OK as {} | {} | {}", creds.username, cwd, truncate(&banner, 60)))
}

/// SMTP greeting, `EHLO`, optional `AUTH PLAIN`, then `NOOP`
pub async fn smtp_session<S>(stream: S, creds: Option<&Credentials>, timeout: Duration) -> Result<String, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let (code, banner) = read_reply(&mut reader, timeout).await?;
    if code != 220 {
        return Err(ProbeError::ProtocolMismatch(format!("expected 220, got {}", code)));
    }

    expect("EHLO", command(&mut reader, &format!("EHLO {}", EHLO_DOMAIN), timeout).await?, &[250])?;

    if let Some(creds) = creds {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{}\0{}", creds.username, creds.password));
        expect("AUTH", command(&mut reader, &format!("AUTH PLAIN {}", token), timeout).await?, &[235])?;
    }

    expect("NOOP", command(&mut reader, "NOOP", timeout).await?, &[250])?;
    let _ = command(&mut reader, "QUIT", timeout).await;

    let auth = if creds.is_some() { "AUTH + " } else { "" };
    Ok(format!("{}EHLO accepted | {}", auth, truncate(&banner, 60)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials { username: user.to_string(), password: pass.to_string() }
    }

    #[tokio::test]
    async fn test_multiline_reply() {
        let mock = Builder::new()
            .read(b"250-mail.ludus.domain\r\n250-PIPELINING\r\n250 8BITMIME\r\n")
            .build();
        let mut reader = BufReader::new(mock);
        let (code, text) = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap();
        assert_eq!(code, 250);
        assert_eq!(text, "mail.ludus.domain");
    }

    #[tokio::test]
    async fn test_garbage_reply_is_mismatch() {
        let mock = Builder::new().read(b"SSH-2.0-OpenSSH_8.9\r\n").build();
        let mut reader = BufReader::new(mock);
        let err = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::ProtocolMismatch(_)));
    }

    #[tokio::test]
    async fn test_ftp_anonymous_login_and_pwd() {
        let mock = Builder::new()
            .read(b"220 (vsFTPd 2.3.4)\r\n")
            .write(b"USER anonymous\r\n")
            .read(b"331 Please specify the password.\r\n")
            .write(b"PASS scoring@ccdc.test\r\n")
            .read(b"230 Login successful.\r\n")
            .write(b"PWD\r\n")
            .read(b"257 \"/\" is the current directory\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 Goodbye.\r\n")
            .build();

        let msg = ftp_session(mock, &anonymous_ftp(), Duration::from_secs(1)).await.unwrap();
        assert!(msg.starts_with("Login OK as anonymous"));
        assert!(msg.contains("vsFTPd"));
    }

    #[tokio::test]
    async fn test_ftp_rejected_login_fails() {
        let mock = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"USER bob\r\n")
            .read(b"331 Password required\r\n")
            .write(b"PASS wrong\r\n")
            .read(b"530 Login incorrect.\r\n")
            .build();

        let err = ftp_session(mock, &creds("bob", "wrong"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::AssertionFailed(_)));
    }

    #[tokio::test]
    async fn test_smtp_ehlo_auth_noop() {
        let token = base64::engine::general_purpose::STANDARD.encode("\0alice\0Summer2024!");
        let auth = format!("AUTH PLAIN {}\r\n", token);

        let mock = Builder::new()
            .read(b"220 mail.ludus.domain ESMTP Postfix\r\n")
            .write(b"EHLO scoring.ccdc.test\r\n")
            .read(b"250-mail.ludus.domain\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(auth.as_bytes())
            .read(b"235 2.7.0 Authentication successful\r\n")
            .write(b"NOOP\r\n")
            .read(b"250 2.0.0 Ok\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 2.0.0 Bye\r\n")
            .build();

        let c = creds("alice", "Summer2024!");
        let msg = smtp_session(mock, Some(&c), Duration::from_secs(1)).await.unwrap();
        assert!(msg.starts_with("AUTH + EHLO accepted"));
    }

    #[tokio::test]
    async fn test_smtp_bad_greeting() {
        let mock = Builder::new().read(b"554 no service\r\n").build();
        let err = smtp_session(mock, None, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::ProtocolMismatch(_)));
    }
}
