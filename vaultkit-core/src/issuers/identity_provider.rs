//! HTTP side of the identity provider handshake.
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use super::{IdentityObject, IdentityProvider};
use crate::{error::VaultKitError, http_request::Request, IdentityRequest, RecoveryRequest};

/// Marker preceding the continuation URL in the fragment of the URL an identity provider
/// redirects back to.
pub const CODE_URI_MARKER: &str = "#code_uri=";

/// Body of the continuation endpoint.
#[derive(Debug, Deserialize)]
struct IdentityTokenContainer {
    status: String,
    #[serde(default)]
    token: Option<IdentityToken>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityToken {
    identity_object: IdentityObject,
}

/// Talks to identity providers and the wallet proxy's provider directory.
#[derive(Debug, Clone)]
pub(crate) struct IdentityProviderClient {
    request: Request,
}

impl IdentityProviderClient {
    pub(crate) const fn new(request: Request) -> Self {
        Self { request }
    }

    /// Lists the identity providers known to the wallet proxy.
    pub(crate) async fn list(
        &self,
        wallet_proxy_url: &str,
    ) -> Result<Vec<IdentityProvider>, VaultKitError> {
        let url = parse_url(&format!(
            "{}/v1/ip_info",
            wallet_proxy_url.trim_end_matches('/')
        ))?;
        let response = self.request.handle(self.request.get(url.clone())?).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VaultKitError::NetworkError {
                url: url.to_string(),
                status: Some(status.as_u16()),
                error: "failed to fetch identity providers".to_string(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| VaultKitError::SerializationError {
                error: format!("Failed to parse identity provider list: {e}"),
            })
    }

    /// Sends an issuance request to the provider and returns the URL it redirected to.
    ///
    /// The provider answers a valid request with a redirect to its verification flow; any
    /// other answer is a rejection.
    pub(crate) async fn start_issuance(
        &self,
        issuance_start: &str,
        request: &IdentityRequest,
        redirect_uri: &str,
    ) -> Result<String, VaultKitError> {
        let state = json!({ "idObjectRequest": request }).to_string();
        let url = Url::parse_with_params(
            issuance_start,
            [
                ("scope", "identity"),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| invalid_url(issuance_start, &e))?;

        let response = self
            .request
            .handle_any_status(self.request.get(url.clone())?)
            .await?;
        if response.url() == &url {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to parse error details.".to_string());
            return Err(VaultKitError::IssuerRejected { detail });
        }

        Ok(response.url().to_string())
    }

    /// Follows the continuation URL embedded in `returned_url` once and interprets the status.
    pub(crate) async fn fetch_identity(
        &self,
        returned_url: &str,
    ) -> Result<IdentityObject, VaultKitError> {
        let url = parse_url(code_uri(returned_url)?)?;
        let response = self.request.handle(self.request.get(url.clone())?).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VaultKitError::NetworkError {
                url: url.to_string(),
                status: Some(status.as_u16()),
                error: "failed to retrieve identity".to_string(),
            });
        }

        let container: IdentityTokenContainer =
            response
                .json()
                .await
                .map_err(|e| VaultKitError::SerializationError {
                    error: format!("Failed to parse identity token container: {e}"),
                })?;

        match container.status.as_str() {
            "done" => container
                .token
                .map(|token| token.identity_object)
                .ok_or_else(|| VaultKitError::SerializationError {
                    error: "Missing identity object in completed token".to_string(),
                }),
            "error" => Err(VaultKitError::IssuerError {
                detail: container.detail.unwrap_or_default(),
            }),
            "pending" => Err(VaultKitError::IssuancePending),
            _ => Err(VaultKitError::UnexpectedIssuerStatus {
                status: container.status,
            }),
        }
    }

    /// Asks a provider to re-issue the identity matching a recovery request.
    pub(crate) async fn recover(
        &self,
        recovery_start: &str,
        request: &RecoveryRequest,
    ) -> Result<IdentityObject, VaultKitError> {
        let state = json!({ "idRecoveryRequest": request }).to_string();
        let url = Url::parse_with_params(recovery_start, [("state", state.as_str())])
            .map_err(|e| invalid_url(recovery_start, &e))?;

        let response = self.request.handle(self.request.get(url.clone())?).await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(VaultKitError::NetworkError {
                url: recovery_start.to_string(),
                status: Some(status.as_u16()),
                error: format!("Recovery request failed: {error_body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| VaultKitError::SerializationError {
                error: format!("Failed to parse recovered identity: {e}"),
            })
    }
}

/// Extracts the continuation URL following [`CODE_URI_MARKER`].
pub(crate) fn code_uri(returned_url: &str) -> Result<&str, VaultKitError> {
    returned_url
        .split_once(CODE_URI_MARKER)
        .map(|(_, code_uri)| code_uri)
        .filter(|code_uri| !code_uri.is_empty())
        .ok_or_else(|| VaultKitError::MalformedReturnUrl {
            url: returned_url.to_string(),
        })
}

fn parse_url(url: &str) -> Result<Url, VaultKitError> {
    Url::parse(url).map_err(|e| invalid_url(url, &e))
}

fn invalid_url(url: &str, err: &impl std::fmt::Display) -> VaultKitError {
    VaultKitError::InvalidInput {
        attribute: "url".to_string(),
        reason: format!("`{url}` is not a valid URL: {err}"),
    }
}
