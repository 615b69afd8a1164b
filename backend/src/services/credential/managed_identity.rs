use async_trait::async_trait;
use reqwest::Client;

use super::{Credential, CredentialError, CredentialStrategy, TokenResponse, TokenScope};

const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const IMDS_API_VERSION: &str = "2018-02-01";

#[derive(Debug, Clone)]
enum Source {
    /// App Service / Functions identity endpoint
    AppService { endpoint: String, header: String },
    /// VM / container instance metadata service
    Imds { endpoint: String },
}

/// Workload (managed) identity of the hosting instance
pub struct ManagedIdentityCredential {
    http: Client,
    source: Source,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn app_service(http: Client, endpoint: String, header: String) -> Self {
        Self { http, source: Source::AppService { endpoint, header }, client_id: None }
    }

    pub fn imds(http: Client, endpoint: String) -> Self {
        Self { http, source: Source::Imds { endpoint }, client_id: None }
    }

    /// Prefer the App Service endpoint when the platform advertises it
    pub fn detect(
        http: Client,
        identity_endpoint: Option<&str>,
        identity_header: Option<&str>,
        imds_endpoint: &str,
    ) -> Self {
        match (identity_endpoint, identity_header) {
            (Some(endpoint), Some(header)) => {
                Self::app_service(http, endpoint.to_string(), header.to_string())
            },
            _ => Self::imds(http, imds_endpoint.to_string()),
        }
    }

    /// Select a user-assigned identity
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }
}

#[async_trait]
impl CredentialStrategy for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "ManagedIdentityCredential"
    }

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError> {
        let mut query = vec![("resource", scope.resource())];
        if let Some(client_id) = self.client_id.as_deref() {
            query.push(("client_id", client_id));
        }

        let request = match &self.source {
            Source::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                tracing::debug!("Requesting managed identity token from App Service endpoint");
                self.http.get(endpoint).header("X-IDENTITY-HEADER", header)
            },
            Source::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                tracing::debug!("Requesting managed identity token from IMDS");
                self.http.get(endpoint).header("Metadata", "true")
            },
        };

        let response = request.query(&query).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        Ok(Credential::Token(token.into_access_token()?))
    }
}
