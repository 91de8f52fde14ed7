use anyhow::{Context, Result, ensure};
use reqwest::{Client, Response};

/// Create the HTTP client used to talk to the device
///
/// Proxies are disabled since the device only exists on the local setup
/// network. Idle connections are not pooled: the device usually serves one
/// client at a time and drops the access point after joining a network.
/// Deadlines are enforced per attempt by the executor, not by the client.
pub fn device_client() -> Result<Client> {
    Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .context("failed to create device HTTP client")
}

/// Join a device base URL and an endpoint path with exactly one "/"
pub fn build_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Check the response status and read the body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "POST /wifi-setup")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is 2xx
/// * `Err` - If the status is not successful or reading the body fails
pub async fn handle_http_response(res: Response, context_msg: &str) -> Result<String> {
    let status = res.status();
    let body = res.text().await.context("failed to read response body")?;

    ensure!(
        status.is_success(),
        "{context_msg} failed with status {status} and body: {body}"
    );

    Ok(body)
}
