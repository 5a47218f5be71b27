//! Ping check: native ICMP echo with a system `ping` fallback.
//!
//! The echo runs on a blocking socket inside `spawn_blocking` so the
//! round-trip measurement is not skewed by the async scheduler.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{millis, CheckOutcome, CheckStatus, ProbeError};

/// Whether this process may open ICMP sockets at all.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Wire constants for one address family.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// ICMPv6 checksums are filled in by the kernel.
    needs_checksum: bool,
}

const ICMP_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    needs_checksum: true,
};

const ICMP_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    needs_checksum: false,
};

const ECHO_PACKET_LEN: usize = 64;

/// Ping `target` once and classify the reply against `threshold_ms`.
pub async fn run_ping_check(target: &str, timeout: Duration, threshold_ms: f64) -> CheckOutcome {
    classify_ping(ping_once(target, timeout).await, threshold_ms)
}

fn classify_ping(result: Result<Duration, ProbeError>, threshold_ms: f64) -> CheckOutcome {
    match result {
        Ok(rtt) => {
            let status = if millis(rtt) > threshold_ms {
                CheckStatus::Slow
            } else {
                CheckStatus::Online
            };
            CheckOutcome::responded(status, rtt)
        }
        Err(ProbeError::Timeout(_)) => CheckOutcome::failed(CheckStatus::Offline, "no response"),
        Err(e) => CheckOutcome::failed(CheckStatus::Error, e.to_string()),
    }
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping check: using native ICMP (raw socket)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping check: using native ICMP (unprivileged datagram socket)");
        return IcmpCapability::Native;
    }
    tracing::info!("Ping check: ICMP sockets unavailable, using the ping command");
    IcmpCapability::CommandOnly
}

/// Send one echo request and return the round-trip time.
async fn ping_once(target: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(target, timeout).await;
    }

    let ip = resolve_address(target).await?;
    let rtt = tokio::task::spawn_blocking(move || echo_blocking(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("ping task failed: {}", e)))?;

    match rtt {
        Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
            tracing::warn!("ICMP to {} not permitted ({}), falling back to the ping command", target, msg);
            run_ping_command(target, timeout).await
        }
        other => other,
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("not permitted") || msg.contains("denied")
}

async fn resolve_address(target: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", target, e)))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", target)))
}

fn echo_blocking(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = match ip {
        IpAddr::V4(_) => &ICMP_V4,
        IpAddr::V6(_) => &ICMP_V6,
    };

    // Raw sockets need privileges; datagram ICMP works for ping_group_range members.
    let (socket, datagram) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(s) => (s, false),
        Err(_) => Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
            .map(|s| (s, true))
            .map_err(|e| ProbeError::Network(format!("cannot open ICMP socket: {}", e)))?,
    };

    socket
        .set_write_timeout(Some(timeout))
        .and_then(|_| socket.connect(&SocketAddr::new(ip, 0).into()))
        .map_err(|e| ProbeError::Network(format!("cannot reach {}: {}", ip, e)))?;

    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = echo_request(family, identifier, sequence);

    let start = Instant::now();
    socket
        .send(&packet)
        .map_err(|e| ProbeError::Network(format!("send failed: {}", e)))?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("cannot set timeout: {}", e)))?;

        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("receive failed: {}", e)),
        })?;
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes.
        let reply = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        // Datagram sockets on Linux rewrite the identifier, so only the sequence is ours.
        let expected_id = if datagram { None } else { Some(identifier) };
        if is_echo_reply(family, reply, expected_id, sequence) {
            if elapsed >= timeout {
                return Err(ProbeError::Timeout(timeout));
            }
            return Ok(elapsed);
        }
    }
}

fn echo_request(family: &EchoFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; ECHO_PACKET_LEN];
    packet[0] = family.request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, byte) in packet[8..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    if family.needs_checksum {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Check that `reply` is the echo reply for our request. IPv4 raw sockets
/// deliver the IP header too, so skip it when present.
fn is_echo_reply(family: &EchoFamily, reply: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if family.needs_checksum && reply.first().map_or(false, |b| b >> 4 == 4) {
        usize::from(reply[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = reply.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    icmp[0] == family.reply_type
        && reply_seq == sequence
        && identifier.map_or(true, |id| id == reply_id)
}

/// Internet checksum (RFC 1071).
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

async fn run_ping_command(target: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let wait_secs = timeout.as_secs().max(1).to_string();

    let output = Command::new("ping")
        .args(["-c", "1", "-W", wait_secs.as_str(), target])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("cannot run ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout") || stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        return Err(ProbeError::Command(format!("ping exited with {}: {}", output.status, detail)));
    }

    parse_ping_output(&stdout)
}

/// Extract the round-trip time from `ping` output (Linux and BSD formats).
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static REPLY_TIME: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let reply_time = REPLY_TIME.get_or_init(|| Regex::new(r"time[=<]([0-9.]+)\s*ms").expect("valid regex"));
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*[0-9.]+/([0-9.]+)/").expect("valid regex")
    });

    reply_time
        .captures(output)
        .or_else(|| summary.captures(output))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("unrecognized ping output: {}", output.trim())))
}
