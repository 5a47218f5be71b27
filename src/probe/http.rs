//! HTTP check.

use std::time::{Duration, Instant};

use super::{CheckOutcome, CheckStatus, ProbeError};

/// Issue a GET against `address` (following redirects) and compare the
/// final status code with `expected_status`.
pub async fn run_http_check(address: &str, timeout: Duration, expected_status: u16) -> CheckOutcome {
    match fetch(address, timeout).await {
        Ok((code, elapsed)) => {
            let outcome = if code == expected_status {
                CheckOutcome::responded(CheckStatus::Online, elapsed)
            } else {
                CheckOutcome::responded(CheckStatus::Error, elapsed)
                    .with_error(format!("unexpected status code: {}", code))
            };
            CheckOutcome {
                http_status: Some(code),
                ..outcome
            }
        }
        Err(ProbeError::Timeout(after)) => {
            CheckOutcome::failed(CheckStatus::Timeout, format!("request timed out after {:?}", after))
        }
        Err(e) => CheckOutcome::failed(CheckStatus::Offline, e.to_string()),
    }
}

/// Returns the final status code and the time to read the full body.
async fn fetch(address: &str, timeout: Duration) -> Result<(u16, Duration), ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let start = Instant::now();

    let response = client.get(&url).send().await.map_err(|e| transport_error(e, timeout))?;
    let code = response.status().as_u16();

    // Read the full body to measure complete transfer time
    response.bytes().await.map_err(|e| transport_error(e, timeout))?;

    Ok((code, start.elapsed()))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}
