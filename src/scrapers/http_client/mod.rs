//! Direct HTTP fetch tier.
//!
//! [`HttpCapability`] is the seam the fetch executor talks to; [`HttpClient`]
//! is the reqwest implementation. Throttling and retries live above this
//! layer, so a call here is exactly one network request.

mod response;
mod user_agent;

pub use response::HttpResponse;
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, COOKIE, REFERER};
use reqwest::Client;
use tracing::debug;

use crate::error::TransportError;

/// One GET request, with an optional `Cookie` header from the session.
#[async_trait]
pub trait HttpCapability: Send + Sync {
    async fn get(&self, url: &str, cookie_header: Option<&str>) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed HTTP client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a client with the site's expected default headers.
    pub fn new(
        timeout: Duration,
        user_agent_config: Option<&str>,
        referer: &str,
    ) -> Result<Self, reqwest::Error> {
        let user_agent = resolve_user_agent(user_agent_config);

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, value);
        }

        let client = Client::builder()
            .user_agent(&user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpCapability for HttpClient {
    async fn get(&self, url: &str, cookie_header: Option<&str>) -> Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url);
        if let Some(cookies) = cookie_header.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
