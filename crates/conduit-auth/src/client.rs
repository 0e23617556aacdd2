//! HTTP client for the identity service.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::Principal;
use conduit_core::principal::mask_credential;

use crate::errors::AuthError;
use crate::principal::extract_principal;

const MAX_ERROR_BODY: usize = 256;

/// Resolves bearer credentials into principals.
///
/// Implementations must be stateless and safe to call concurrently; the
/// dispatch engine calls this once per frame for every processor that needs
/// a principal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `credential` into a principal.
    async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Exchange `credential` for a principal at `endpoint`.
///
/// Sends `GET <endpoint>?access_token=<credential>` with an
/// `Authorization: bearer <credential>` header. Any non-2xx status, a body
/// that is not JSON, or a body without user details is an error.
#[tracing::instrument(skip_all, fields(credential = %mask_credential(credential)))]
pub async fn authenticate(
    client: &reqwest::Client,
    credential: &str,
    endpoint: &str,
) -> Result<Principal, AuthError> {
    let resp = client
        .get(endpoint)
        .query(&[("access_token", credential)])
        .header(reqwest::header::AUTHORIZATION, format!("bearer {credential}"))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let mut body = resp.text().await.unwrap_or_default();
        body.truncate(
            body.char_indices()
                .nth(MAX_ERROR_BODY)
                .map_or(body.len(), |(i, _)| i),
        );
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = resp.bytes().await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    let mut principal = extract_principal(&body)?;
    credential.clone_into(&mut principal.credential);

    tracing::debug!(user_id = principal.user_id, tenant_id = principal.tenant_id, "credential resolved");
    Ok(principal)
}

/// [`Authenticator`] backed by the identity service over HTTP.
#[derive(Clone, Debug)]
pub struct HttpAuthenticator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuthenticator {
    /// Create an authenticator for `endpoint` with a bounded request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Create an authenticator that shares an existing client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Identity endpoint this authenticator calls.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        authenticate(&self.client, credential, &self.endpoint).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
