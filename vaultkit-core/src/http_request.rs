use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response, Url};

use crate::{error::VaultKitError, NetworkConfig};

/// A thin wrapper on an HTTP client for talking to identity providers and the wallet proxy.
/// Sets the timeout and user-agent, refuses plain HTTP, and retries transient failures.
#[derive(Debug, Clone)]
pub struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Request {
    /// Builds a request helper over a shared client with the limits of `config`.
    pub(crate) fn new(client: reqwest::Client, config: &NetworkConfig) -> Self {
        Self {
            client,
            timeout: config.timeout(),
            max_retries: config.max_retries,
        }
    }

    /// Creates a GET request builder with defaults applied.
    pub(crate) fn get(&self, url: Url) -> Result<RequestBuilder, VaultKitError> {
        self.req(Method::GET, url)
    }

    fn req(&self, method: Method, url: Url) -> Result<RequestBuilder, VaultKitError> {
        if cfg!(not(test)) && url.scheme() != "https" {
            return Err(VaultKitError::InvalidInput {
                attribute: "url".to_string(),
                reason: format!("refusing non-HTTPS endpoint {url}"),
            });
        }

        Ok(self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("vaultkit-core/{}", env!("CARGO_PKG_VERSION")),
            ))
    }

    /// Sends a request built by `get`, retrying timeouts, connect errors, 429 and 5xx.
    ///
    /// Non-retryable statuses are returned as a normal response for the caller to inspect.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, VaultKitError> {
        self.send(request_builder, StatusPolicy::RetryBad).await
    }

    /// Like [`Self::handle`], but only timeouts and connect errors are retried. The final
    /// response is returned whatever its status.
    pub(crate) async fn handle_any_status(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, VaultKitError> {
        self.send(request_builder, StatusPolicy::ReturnAll).await
    }

    async fn send(
        &self,
        request_builder: RequestBuilder,
        policy: StatusPolicy,
    ) -> Result<Response, VaultKitError> {
        let Some(template) = request_builder.try_clone() else {
            return execute_request_builder(request_builder, policy)
                .await
                .map_err(Into::into);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                RequestHandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            execute_request_builder(request_builder, policy).await
        })
        .retry(backoff)
        .when(RequestHandleError::is_retryable)
        .notify(|err: &RequestHandleError, after: Duration| {
            log::warn!("retrying {} in {after:?}: {}", err.url, err.error);
        })
        .await
        .map_err(Into::into)
    }
}

/// How responses with a 429 or 5xx status are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusPolicy {
    /// Retried, then surfaced as an error.
    RetryBad,
    /// Returned to the caller like any other response.
    ReturnAll,
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl RequestHandleError {
    const fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    const fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RequestHandleError> for VaultKitError {
    fn from(value: RequestHandleError) -> Self {
        Self::NetworkError {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute_request_builder(
    request_builder: RequestBuilder,
    policy: StatusPolicy,
) -> Result<Response, RequestHandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        RequestHandleError::permanent(
            err.url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let bad_status = status == 429 || (500..600).contains(&status);
            if bad_status && policy == StatusPolicy::RetryBad {
                return Err(RequestHandleError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(resp)
        }
        Err(err) if err.is_timeout() || err.is_connect() => Err(RequestHandleError::retryable(
            url,
            None,
            format!("request timeout/connect error: {err}"),
        )),
        Err(err) => Err(RequestHandleError::permanent(
            url,
            None,
            format!("request failed: {err}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Network;

    fn request(max_retries: u32) -> Request {
        let mut config = NetworkConfig::for_network(Network::Testnet);
        config.max_retries = max_retries;
        Request::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let request = request(1);
        let url = Url::parse(&format!("{}/flaky", server.url())).unwrap();
        let err = request
            .handle(request.get(url).unwrap())
            .await
            .unwrap_err();

        failing.assert_async().await;
        assert!(matches!(
            err,
            VaultKitError::NetworkError {
                status: Some(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_client_errors_are_returned_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let request = request(3);
        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let response = request.handle(request.get(url).unwrap()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_any_status_returns_server_errors_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/busy")
            .with_status(503)
            .with_body("try later")
            .expect(1)
            .create_async()
            .await;

        let request = request(2);
        let url = Url::parse(&format!("{}/busy", server.url())).unwrap();
        let response = request
            .handle_any_status(request.get(url).unwrap())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status().as_u16(), 503);
        assert_eq!(response.text().await.unwrap(), "try later");
    }
}
