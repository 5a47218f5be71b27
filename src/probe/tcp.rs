//! TCP connect check.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::{millis, CheckOutcome, CheckStatus, ProbeError};

/// Attempt a TCP connection to `(host, port)`.
///
/// A failed or timed-out connect is `offline` with the latency to the
/// failure point; only resolution problems are reported as `error`.
pub async fn run_tcp_check(host: &str, port: u16, timeout: Duration) -> CheckOutcome {
    let addrs = match resolve(host, port).await {
        Ok(addrs) => addrs,
        Err(e) => return CheckOutcome::failed(CheckStatus::Error, e.to_string()),
    };

    let start = Instant::now();
    let attempt = tokio::time::timeout(timeout, TcpStream::connect(addrs.as_slice())).await;
    let elapsed = start.elapsed();

    match attempt {
        Ok(Ok(stream)) => {
            drop(stream);
            CheckOutcome::responded(CheckStatus::Online, elapsed)
        }
        Ok(Err(e)) => {
            let message = match e.raw_os_error() {
                Some(code) => format!("connection refused (code: {})", code),
                None => format!("connection failed: {}", e),
            };
            CheckOutcome::responded(CheckStatus::Offline, elapsed).with_error(message)
        }
        Err(_) => CheckOutcome::responded(CheckStatus::Offline, elapsed)
            .with_error(format!("connection timed out after {} ms", millis(timeout))),
    }
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ProbeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", host, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::Resolve(format!("no addresses found for {}", host)));
    }
    Ok(addrs)
}
