use std::time::Duration;

use anyhow::Context;
use reqwest::{redirect, StatusCode};

/// Fixed link-local address of the instance metadata service.
const IMDS_BASE_URL: &str = "http://169.254.169.254/latest";

/// Per-request wall-clock limit. The metadata service answers from the
/// hypervisor in single-digit milliseconds; anything slower means we are
/// not on an instance and should give up quickly.
const IMDS_TIMEOUT: Duration = Duration::from_secs(1);

/// Constrained HTTP client for the instance metadata service.
///
/// Every request is a plain-HTTP GET (or HEAD) against the link-local
/// address with a one second timeout. Redirects and proxies are disabled,
/// and the client lives only for the current invocation, so connections are
/// never reused across invocations.
pub struct ImdsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ImdsClient {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(IMDS_BASE_URL.to_string())
    }

    /// Client against a non-standard base URL. Tests point this at a local
    /// listener; production callers use [`ImdsClient::new`].
    pub fn with_base_url(base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(IMDS_TIMEOUT)
            .redirect(redirect::Policy::none())
            .no_proxy()
            .build()
            .context("Error building the metadata HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// Fetch a metadata path. `Ok(Some(body))` on 200, `Ok(None)` on 404,
    /// error for every other status or transport failure.
    pub async fn fetch(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Error fetching {url} from the metadata service"))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .with_context(|| format!("Error reading the body of {url}"))?;
                Ok(Some(body.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => anyhow::bail!("Metadata service returned {status} for {url}"),
        }
    }

    /// UTF-8 convenience over [`ImdsClient::fetch`].
    pub async fn fetch_string(&self, path: &str) -> anyhow::Result<Option<String>> {
        match self.fetch(path).await? {
            Some(body) => {
                let text = String::from_utf8(body)
                    .with_context(|| format!("Metadata value at {path} is not UTF-8"))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Status code of a HEAD request, with no body transfer.
    pub async fn head_status(&self, path: &str) -> anyhow::Result<StatusCode> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .with_context(|| format!("Error probing {url} on the metadata service"))?;
        Ok(response.status())
    }
}
