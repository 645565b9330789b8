mod retry;

pub use retry::retry_async;

use repoupdater_ratelimit::RateLimitRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use url::Url;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// The shared HTTP client every `Source` talks to its host through
/// (spec.md §4.A). Wraps `reqwest` with the workspace's rate-limit registry
/// so a host's `ExternalService`-configured quota is enforced in one place
/// instead of duplicated per source implementation.
#[derive(Debug, Clone)]
pub struct Client {
    inner: reqwest::Client,
    rate_limits: Arc<RateLimitRegistry>,
}

impl Client {
    pub fn new(rate_limits: Arc<RateLimitRegistry>) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { inner, rate_limits })
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitRegistry> {
        &self.rate_limits
    }

    /// Waits for a token from `url`'s host bucket, then issues the request.
    /// Hosts with no registered limit (`RateLimitRegistry::set_limit` never
    /// called for them) go straight through.
    pub async fn get(&self, url: &Url) -> reqwest::Result<reqwest::Response> {
        self.throttle(url).await;
        self.inner.get(url.clone()).send().await
    }

    pub fn request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        self.inner.request(method, url.clone())
    }

    /// Waits for a token from `url`'s host bucket without issuing a
    /// request. `Source` implementations that need custom headers (auth
    /// tokens, `Accept`) build their own `RequestBuilder` via [`Client::request`]
    /// and call this first, rather than going through [`Client::get`].
    pub async fn throttle(&self, url: &Url) {
        if let Some(host) = url.host_str() {
            trace!(host, "waiting for rate limit token");
            self.rate_limits.wait(host).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_reaches_an_unthrottled_host() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/ping").with_status(200).create_async().await;

        let client = Client::new(Arc::new(RateLimitRegistry::new())).unwrap();
        let url: Url = format!("{}/ping", server.url()).parse().unwrap();
        let response = client.get(&url).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
