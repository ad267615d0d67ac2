//! MySQL/MariaDB wire checks
//!
//! Parses the initial handshake packet and, when credentials are configured,
//! logs in with `mysql_native_password` and sends `COM_PING`.

use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProbeError;
use crate::models::Credentials;

const PROTOCOL_V10: u8 = 0x0a;
const PACKET_OK: u8 = 0x00;
const PACKET_ERR: u8 = 0xff;
const PACKET_AUTH_SWITCH: u8 = 0xfe;
const COM_PING: u8 = 0x0e;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

const NATIVE_PASSWORD: &str = "mysql_native_password";

/// Largest packet we accept from the server
const MAX_PACKET_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub server_version: String,
    pub connection_id: u32,
    pub salt: Vec<u8>,
    pub auth_plugin: String,
}

/// Read one packet, returning (sequence id, payload)
async fn read_packet<S>(stream: &mut S, timeout: Duration) -> Result<(u8, Vec<u8>), ProbeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ProbeError::from_io(e, timeout))?;

    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(ProbeError::ProtocolMismatch(format!("bad packet length {}", len)));
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| ProbeError::from_io(e, timeout))?;
    Ok((header[3], payload))
}

async fn write_packet<S>(stream: &mut S, seq: u8, payload: &[u8], timeout: Duration) -> Result<(), ProbeError>
where
    S: AsyncWrite + Unpin,
{
    let len = (payload.len() as u32).to_le_bytes();
    let mut packet = Vec::with_capacity(payload.len() + 4);
    packet.extend_from_slice(&[len[0], len[1], len[2], seq]);
    packet.extend_from_slice(payload);

    stream.write_all(&packet).await.map_err(|e| ProbeError::from_io(e, timeout))?;
    stream.flush().await.map_err(|e| ProbeError::from_io(e, timeout))
}

fn read_cstr(buf: &[u8], pos: &mut usize) -> Option<String> {
    let rest = buf.get(*pos..)?;
    let end = rest.iter().position(|b| *b == 0)?;
    let s = String::from_utf8_lossy(&rest[..end]).into_owned();
    *pos += end + 1;
    Some(s)
}

fn err_message(payload: &[u8]) -> String {
    // 0xff, 2-byte code, then optional '#' + 5-byte SQL state
    let code = payload
        .get(1..3)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .unwrap_or(0);
    let mut msg_start = 3;
    if payload.get(3) == Some(&b'#') {
        msg_start = 9;
    }
    let msg = payload.get(msg_start..).map(String::from_utf8_lossy).unwrap_or_default();
    format!("MySQL error {}: {}", code, msg)
}

/// Parse a protocol-10 initial handshake payload
pub fn parse_handshake(payload: &[u8]) -> Result<Handshake, ProbeError> {
    match payload.first() {
        Some(&PROTOCOL_V10) => {}
        Some(&PACKET_ERR) => return Err(ProbeError::AssertionFailed(err_message(payload))),
        Some(other) => {
            return Err(ProbeError::ProtocolMismatch(format!("protocol byte 0x{:02x}", other)));
        }
        None => return Err(ProbeError::ProtocolMismatch("empty handshake".to_string())),
    }

    let short = || ProbeError::ProtocolMismatch("truncated handshake".to_string());
    let mut pos = 1;
    let server_version = read_cstr(payload, &mut pos).ok_or_else(short)?;

    let conn = payload.get(pos..pos + 4).ok_or_else(short)?;
    let connection_id = u32::from_le_bytes([conn[0], conn[1], conn[2], conn[3]]);
    pos += 4;

    let mut salt = payload.get(pos..pos + 8).ok_or_else(short)?.to_vec();
    pos += 8 + 1; // filler

    // Old servers stop after the lower capability flags
    let mut auth_plugin = NATIVE_PASSWORD.to_string();
    if payload.len() >= pos + 2 + 1 + 2 + 2 + 1 + 10 {
        let caps_low = u16::from_le_bytes([payload[pos], payload[pos + 1]]) as u32;
        pos += 2 + 1 + 2; // caps low, charset, status
        let caps_high = u16::from_le_bytes([payload[pos], payload[pos + 1]]) as u32;
        pos += 2;
        let caps = caps_low | (caps_high << 16);
        let auth_data_len = payload[pos] as usize;
        pos += 1 + 10; // reserved

        if caps & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = auth_data_len.saturating_sub(8).max(13);
            let part2 = payload.get(pos..pos + part2_len).ok_or_else(short)?;
            // Trailing NUL is not part of the scramble
            salt.extend(part2.iter().take_while(|b| **b != 0));
            pos += part2_len;
        }
        if caps & CLIENT_PLUGIN_AUTH != 0 {
            if let Some(name) = read_cstr(payload, &mut pos).filter(|n| !n.is_empty()) {
                auth_plugin = name;
            }
        }
    }

    Ok(Handshake { server_version, connection_id, salt, auth_plugin })
}

/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`
pub fn native_password_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let mix = hasher.finalize();

    stage1.iter().zip(mix.iter()).map(|(a, b)| a ^ b).collect()
}

fn handshake_response(username: &str, scramble: &[u8]) -> Vec<u8> {
    let caps = CLIENT_LONG_PASSWORD | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH;

    let mut out = Vec::with_capacity(64 + username.len());
    out.extend_from_slice(&caps.to_le_bytes());
    out.extend_from_slice(&0x0100_0000u32.to_le_bytes()); // max packet
    out.push(0x21); // utf8_general_ci
    out.extend_from_slice(&[0u8; 23]);
    out.extend_from_slice(username.as_bytes());
    out.push(0);
    out.push(scramble.len() as u8);
    out.extend_from_slice(scramble);
    out.extend_from_slice(NATIVE_PASSWORD.as_bytes());
    out.push(0);
    out
}

/// Handshake check, plus login and `COM_PING` when credentials are given
pub async fn mysql_session<S>(mut stream: S, creds: Option<&Credentials>, timeout: Duration) -> Result<String, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (_, payload) = read_packet(&mut stream, timeout).await?;
    let handshake = parse_handshake(&payload)?;

    let Some(creds) = creds else {
        return Ok(format!("MySQL/MariaDB {}", handshake.server_version));
    };

    if handshake.auth_plugin != NATIVE_PASSWORD {
        tracing::debug!(
            "Server default auth plugin is {}, requesting {}",
            handshake.auth_plugin,
            NATIVE_PASSWORD
        );
    }

    let scramble = native_password_scramble(&creds.password, &handshake.salt);
    write_packet(&mut stream, 1, &handshake_response(&creds.username, &scramble), timeout).await?;

    let (seq, reply) = read_packet(&mut stream, timeout).await?;
    match reply.first() {
        Some(&PACKET_OK) => {}
        Some(&PACKET_ERR) => return Err(ProbeError::AssertionFailed(err_message(&reply))),
        Some(&PACKET_AUTH_SWITCH) => {
            let mut pos = 1;
            let plugin = read_cstr(&reply, &mut pos).unwrap_or_default();
            if plugin != NATIVE_PASSWORD {
                return Err(ProbeError::ProtocolMismatch(format!("unsupported auth plugin {}", plugin)));
            }
            let salt: Vec<u8> = reply[pos..].iter().copied().take_while(|b| *b != 0).collect();
            let scramble = native_password_scramble(&creds.password, &salt);
            write_packet(&mut stream, seq.wrapping_add(1), &scramble, timeout).await?;

            let (_, reply) = read_packet(&mut stream, timeout).await?;
            match reply.first() {
                Some(&PACKET_OK) => {}
                Some(&PACKET_ERR) => return Err(ProbeError::AssertionFailed(err_message(&reply))),
                _ => return Err(ProbeError::ProtocolMismatch("unexpected auth reply".to_string())),
            }
        }
        _ => return Err(ProbeError::ProtocolMismatch("unexpected auth reply".to_string())),
    }

    write_packet(&mut stream, 0, &[COM_PING], timeout).await?;
    let (_, pong) = read_packet(&mut stream, timeout).await?;
    match pong.first() {
        Some(&PACKET_OK) => Ok(format!(
            "Login OK as {} | MySQL/MariaDB {}",
            creds.username, handshake.server_version
        )),
        Some(&PACKET_ERR) => Err(ProbeError::AssertionFailed(err_message(&pong))),
        _ => Err(ProbeError::ProtocolMismatch("unexpected ping reply".to_string())),
    }
}
