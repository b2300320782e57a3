use crate::error::{Error, Result};
use anyhow::Context;
use log::error;
use reqwest::{Client, Response, StatusCode, header};
use std::time::Duration;

/// Create the HTTP client used for the remote visit API
///
/// Every request sent through the returned client is bounded by `timeout`.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use uvtapp::http_client::api_client;
///
/// let client = api_client(Duration::from_secs(30))
///     .expect("failed to create client");
/// ```
pub fn api_client(timeout: Duration) -> anyhow::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json, text/plain"),
    );

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .context("failed to create API HTTP client")
}

/// Which statuses count as success for an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accept {
    /// Any 2xx status
    Success,
    /// Exactly this status
    Only(StatusCode),
}

impl Accept {
    pub fn matches(&self, status: StatusCode) -> bool {
        match self {
            Accept::Success => status.is_success(),
            Accept::Only(expected) => status == *expected,
        }
    }
}

/// Handle HTTP response by checking status and extracting body
///
/// This is a common utility for processing HTTP responses.
/// It ensures the response status is accepted and extracts the body text.
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `accept` - Which statuses count as success
/// * `operation` - Description of the request (e.g., "POST /api/VisitHeader")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is accepted
/// * `Err` - RemoteRejection for other statuses (with whatever body could be read),
///   Transport if reading an accepted response's body fails
pub async fn handle_http_response(
    res: Response,
    accept: Accept,
    operation: &str,
) -> Result<String> {
    let status = res.status();

    if !accept.matches(status) {
        // best-effort body for rejected statuses
        let body = res.text().await.unwrap_or_default();
        error!("{operation} rejected with status {status}: {body}");
        return Err(Error::RemoteRejection {
            operation: operation.to_string(),
            status,
            body,
        });
    }

    res.text()
        .await
        .map_err(|e| Error::transport(operation, e))
}
