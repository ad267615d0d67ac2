//! dns-resolve and dns-zone-transfer probes
//!
//! A minimal wire codec: just enough to build a single-question query and
//! read the answer section of the reply.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;

use super::{net, Probe};
use crate::error::ProbeError;
use crate::models::{CheckKind, CheckSpec, ServiceDefinition};

pub const TYPE_A: u16 = 1;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_AXFR: u16 = 252;
const CLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;

const MAX_UDP_LEN: usize = 4096;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_HOPS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Owner name
    pub name: String,
    pub rtype: u16,
    pub rdata: Vec<u8>,
}

impl Record {
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match (self.rtype, self.rdata.as_slice()) {
            (TYPE_A, [a, b, c, d]) => Some(Ipv4Addr::new(*a, *b, *c, *d)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u16,
    pub rcode: u8,
    pub answers: Vec<Record>,
}

/// Encode a single-question IN query
pub fn build_query(id: u16, name: &str, qtype: u16, recursion: bool) -> Result<Vec<u8>, ProbeError> {
    let name = name.trim_end_matches('.');
    if name.len() > MAX_NAME_LEN {
        return Err(ProbeError::Misconfigured(format!("query name too long: {}", name)));
    }

    let flags = if recursion { FLAG_RD } else { 0 };
    let mut out = Vec::with_capacity(name.len() + 18);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]); // qd=1 an=0 ns=0 ar=0

    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN {
            return Err(ProbeError::Misconfigured(format!("label too long: {}", label)));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(out)
}

fn malformed(what: &str) -> ProbeError {
    ProbeError::ProtocolMismatch(format!("malformed DNS response: {}", what))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, ProbeError> {
    buf.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed("truncated"))
}

/// Advance past a possibly-compressed name, returning the offset after it
fn skip_name(buf: &[u8], mut pos: usize) -> Result<usize, ProbeError> {
    for _ in 0..=MAX_LABEL_LEN * 2 {
        let len = *buf.get(pos).ok_or_else(|| malformed("truncated name"))?;
        match len {
            0 => return Ok(pos + 1),
            l if l & 0xc0 == 0xc0 => {
                // A pointer always ends the name in place
                buf.get(pos + 1).ok_or_else(|| malformed("truncated pointer"))?;
                return Ok(pos + 2);
            }
            l if l & 0xc0 != 0 => return Err(malformed("reserved label type")),
            l => pos += 1 + l as usize,
        }
    }
    Err(malformed("name too long"))
}

/// Decode a name, following compression pointers
fn read_name(buf: &[u8], mut pos: usize) -> Result<String, ProbeError> {
    let mut labels = Vec::new();
    let mut hops = 0;
    loop {
        let len = *buf.get(pos).ok_or_else(|| malformed("truncated name"))?;
        if len == 0 {
            break;
        }
        if len & 0xc0 == 0xc0 {
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(malformed("pointer loop"));
            }
            pos = (read_u16(buf, pos)? & 0x3fff) as usize;
            continue;
        }
        let label = buf
            .get(pos + 1..pos + 1 + len as usize)
            .ok_or_else(|| malformed("truncated label"))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len as usize;
    }
    Ok(labels.join("."))
}

pub fn parse_response(buf: &[u8]) -> Result<Response, ProbeError> {
    if buf.len() < 12 {
        return Err(malformed("short header"));
    }
    let id = read_u16(buf, 0)?;
    let flags = read_u16(buf, 2)?;
    if flags & FLAG_QR == 0 {
        return Err(malformed("not a response"));
    }
    let rcode = (flags & 0x000f) as u8;
    let qdcount = read_u16(buf, 4)?;
    let ancount = read_u16(buf, 6)?;

    let mut pos = 12;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos)? + 4;
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let name = read_name(buf, pos)?;
        pos = skip_name(buf, pos)?;
        let rtype = read_u16(buf, pos)?;
        let rdlen = read_u16(buf, pos + 8)? as usize;
        pos += 10;
        let rdata = buf.get(pos..pos + rdlen).ok_or_else(|| malformed("truncated rdata"))?;
        answers.push(Record { name, rtype, rdata: rdata.to_vec() });
        pos += rdlen;
    }

    Ok(Response { id, rcode, answers })
}

fn check_rcode(resp: &Response, name: &str) -> Result<(), ProbeError> {
    if resp.rcode != 0 {
        return Err(ProbeError::AssertionFailed(format!("DNS RCODE {} for {}", resp.rcode, name)));
    }
    if resp.answers.is_empty() {
        return Err(ProbeError::AssertionFailed(format!("no records for {}", name)));
    }
    Ok(())
}

pub struct DnsResolveProbe;

impl DnsResolveProbe {
    async fn query(host: &str, port: u16, name: &str, timeout: Duration) -> Result<Response, ProbeError> {
        let id: u16 = rand::random();
        let query = build_query(id, name, TYPE_A, true)?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ProbeError::from_io(e, timeout))?;
        socket
            .connect((host, port))
            .await
            .map_err(|e| ProbeError::from_io(e, timeout))?;
        socket.send(&query).await.map_err(|e| ProbeError::from_io(e, timeout))?;

        let mut buf = vec![0u8; MAX_UDP_LEN];
        loop {
            let n = match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
                Ok(result) => result.map_err(|e| ProbeError::from_io(e, timeout))?,
                Err(_) => return Err(ProbeError::Timeout(timeout)),
            };
            let resp = parse_response(&buf[..n])?;
            // Stale or spoofed datagram
            if resp.id != id {
                continue;
            }
            return Ok(resp);
        }
    }
}

#[async_trait]
impl Probe for DnsResolveProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::DnsResolve
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let CheckSpec::DnsResolve { name, expected } = &service.check else {
            return Err(ProbeError::Misconfigured(format!(
                "dns-resolve probe given {} check",
                service.kind()
            )));
        };

        let resp = Self::query(&service.host, service.port, name, timeout).await?;
        check_rcode(&resp, name)?;

        let addrs: Vec<Ipv4Addr> = resp.answers.iter().filter_map(Record::ipv4).collect();
        match expected {
            Some(want) if !addrs.contains(want) => Err(ProbeError::AssertionFailed(format!(
                "{} resolved to {:?}, expected {}",
                name, addrs, want
            ))),
            Some(want) => Ok(format!("Resolved {} -> {}", name, want)),
            None => Ok(format!("DNS query OK for {} ({} records)", name, resp.answers.len())),
        }
    }
}

/// AXFR over TCP. Only the first message of the transfer is read.
pub struct ZoneTransferProbe;

#[async_trait]
impl Probe for ZoneTransferProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::DnsZoneTransfer
    }

    async fn check(&self, service: &ServiceDefinition, timeout: Duration) -> Result<String, ProbeError> {
        let CheckSpec::DnsZoneTransfer { zone } = &service.check else {
            return Err(ProbeError::Misconfigured(format!(
                "dns-zone-transfer probe given {} check",
                service.kind()
            )));
        };

        let id: u16 = rand::random();
        let query = build_query(id, zone, TYPE_AXFR, false)?;
        let mut stream = net::connect(&service.host, service.port, timeout).await?;

        let mut framed = (query.len() as u16).to_be_bytes().to_vec();
        framed.extend_from_slice(&query);
        stream.write_all(&framed).await.map_err(|e| ProbeError::from_io(e, timeout))?;

        let len = stream.read_u16().await.map_err(|e| ProbeError::from_io(e, timeout))? as usize;
        let mut msg = vec![0u8; len];
        stream
            .read_exact(&mut msg)
            .await
            .map_err(|e| ProbeError::from_io(e, timeout))?;

        let resp = parse_response(&msg)?;
        if resp.id != id {
            return Err(malformed("transaction id mismatch"));
        }
        check_rcode(&resp, zone)?;
        let soa = &resp.answers[0];
        if soa.rtype != TYPE_SOA {
            return Err(ProbeError::ProtocolMismatch(format!(
                "zone transfer for {} did not start with SOA",
                zone
            )));
        }
        if !soa.name.eq_ignore_ascii_case(zone.trim_end_matches('.')) {
            return Err(ProbeError::AssertionFailed(format!(
                "SOA owner {} does not match zone {}",
                soa.name, zone
            )));
        }

        Ok(format!("AXFR {} OK ({} records in first message)", zone, resp.answers.len()))
    }
}
