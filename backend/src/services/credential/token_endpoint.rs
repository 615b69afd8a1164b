//! Microsoft identity platform v2 token endpoint flows
//!
//! Both credentials post a client-credentials grant to
//! `{authority}/{tenant}/oauth2/v2.0/token`; they differ only in how the client proves its
//! identity (shared secret vs federated assertion file).

use async_trait::async_trait;
use reqwest::Client;

use super::{Credential, CredentialError, CredentialStrategy, TokenResponse, TokenScope};

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, Clone)]
struct TokenEndpoint {
    authority_host: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
}

impl TokenEndpoint {
    fn url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host.trim_end_matches('/'), tenant_id)
    }

    fn require(&self, credential: &str) -> Result<(&str, &str), CredentialError> {
        match (self.tenant_id.as_deref(), self.client_id.as_deref()) {
            (Some(tenant), Some(client)) => Ok((tenant, client)),
            _ => Err(CredentialError::unavailable(format!(
                "{} requires AZURE_TENANT_ID and AZURE_CLIENT_ID",
                credential
            ))),
        }
    }
}

async fn request_token(
    http: &Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<Credential, CredentialError> {
    let response = http.post(url).form(form).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::Rejected { status, body });
    }

    let token: TokenResponse =
        response.json().await.map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
    Ok(Credential::Token(token.into_access_token()?))
}

/// Service principal configured through `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` /
/// `AZURE_CLIENT_SECRET`
pub struct ClientSecretCredential {
    http: Client,
    endpoint: TokenEndpoint,
    client_secret: Option<String>,
}

impl ClientSecretCredential {
    pub fn new(
        http: Client,
        authority_host: impl Into<String>,
        tenant_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: TokenEndpoint { authority_host: authority_host.into(), tenant_id, client_id },
            client_secret,
        }
    }
}

#[async_trait]
impl CredentialStrategy for ClientSecretCredential {
    fn name(&self) -> &'static str {
        "EnvironmentCredential"
    }

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError> {
        let (tenant, client_id) = self.endpoint.require(self.name())?;
        let secret = self
            .client_secret
            .as_deref()
            .ok_or_else(|| CredentialError::unavailable("AZURE_CLIENT_SECRET is not set"))?;

        tracing::debug!("Requesting client-credentials token for client {}", client_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", secret),
            ("scope", scope.as_str()),
        ];
        request_token(&self.http, &self.endpoint.url(tenant), &form).await
    }
}

/// Federated workload identity (e.g. Kubernetes service account tokens)
pub struct WorkloadIdentityCredential {
    http: Client,
    endpoint: TokenEndpoint,
    token_file: Option<String>,
}

impl WorkloadIdentityCredential {
    pub fn new(
        http: Client,
        authority_host: impl Into<String>,
        tenant_id: Option<String>,
        client_id: Option<String>,
        token_file: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: TokenEndpoint { authority_host: authority_host.into(), tenant_id, client_id },
            token_file,
        }
    }
}

#[async_trait]
impl CredentialStrategy for WorkloadIdentityCredential {
    fn name(&self) -> &'static str {
        "WorkloadIdentityCredential"
    }

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError> {
        let (tenant, client_id) = self.endpoint.require(self.name())?;
        let path = self
            .token_file
            .as_deref()
            .ok_or_else(|| CredentialError::unavailable("AZURE_FEDERATED_TOKEN_FILE is not set"))?;

        // The projected token is rotated by the platform, read it on every attempt
        let assertion = tokio::fs::read_to_string(path).await?;
        let assertion = assertion.trim();
        if assertion.is_empty() {
            return Err(CredentialError::InvalidResponse(format!(
                "federated token file {} is empty",
                path
            )));
        }

        tracing::debug!("Requesting federated token for client {}", client_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion),
            ("scope", scope.as_str()),
        ];
        request_token(&self.http, &self.endpoint.url(tenant), &form).await
    }
}
