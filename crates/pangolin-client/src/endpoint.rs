//! Helpers deriving public addresses from an organization's API endpoint

use reqwest::Url;

/// Host part of an API endpoint (`https://pangolin.example.com/api` →
/// `pangolin.example.com`)
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint.trim()).ok()?;
    url.host_str().filter(|h| !h.is_empty()).map(str::to_string)
}

/// Scheme, host and port of an API endpoint, without any path
pub fn endpoint_origin(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint.trim()).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}
