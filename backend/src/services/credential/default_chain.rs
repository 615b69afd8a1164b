use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use super::{
    AzureCliCredential, ClientSecretCredential, Credential, CredentialEnvironment, CredentialError,
    CredentialStrategy, ManagedIdentityCredential, TokenScope, WorkloadIdentityCredential,
};
use crate::config::IdentityConfig;

/// Which sources the composite credential may use.
///
/// Interactive browser, IDE, PowerShell and shared token cache sources are never built: the
/// service runs headless, so those flags only document the intent of a chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCredentialOptions {
    pub exclude_environment: bool,
    pub exclude_workload_identity: bool,
    pub exclude_managed_identity: bool,
    pub exclude_azure_cli: bool,
    pub exclude_shared_token_cache: bool,
    pub exclude_interactive_browser: bool,
    pub exclude_developer_tools: bool,
}

impl DefaultCredentialOptions {
    /// Headless cloud host: no CLI, browser, IDE or shared cache
    pub fn hosted() -> Self {
        Self {
            exclude_azure_cli: true,
            exclude_shared_token_cache: true,
            exclude_interactive_browser: true,
            exclude_developer_tools: true,
            ..Self::default()
        }
    }

    /// Developer session: no managed identity, no shared cache
    pub fn local() -> Self {
        Self {
            exclude_managed_identity: true,
            exclude_shared_token_cache: true,
            exclude_interactive_browser: true,
            ..Self::default()
        }
    }
}

/// Composite "default" credential: first source that yields a token wins
pub struct DefaultCredential {
    sources: Vec<Arc<dyn CredentialStrategy>>,
}

impl DefaultCredential {
    pub fn new(sources: Vec<Arc<dyn CredentialStrategy>>) -> Self {
        Self { sources }
    }

    pub fn from_environment(
        http: &Client,
        env: &CredentialEnvironment,
        identity: &IdentityConfig,
        options: DefaultCredentialOptions,
    ) -> Self {
        let authority =
            env.authority_host.clone().unwrap_or_else(|| identity.authority_host.clone());
        let mut sources: Vec<Arc<dyn CredentialStrategy>> = Vec::new();

        if !options.exclude_environment {
            sources.push(Arc::new(ClientSecretCredential::new(
                http.clone(),
                authority.clone(),
                env.tenant_id.clone(),
                env.client_id.clone(),
                env.client_secret.clone(),
            )));
        }
        if !options.exclude_workload_identity {
            sources.push(Arc::new(WorkloadIdentityCredential::new(
                http.clone(),
                authority,
                env.tenant_id.clone(),
                env.client_id.clone(),
                env.federated_token_file.clone(),
            )));
        }
        if !options.exclude_managed_identity {
            sources.push(Arc::new(
                ManagedIdentityCredential::detect(
                    http.clone(),
                    env.identity_endpoint.as_deref(),
                    env.identity_header.as_deref(),
                    &identity.imds_endpoint,
                )
                .with_client_id(identity.managed_identity_client_id.clone()),
            ));
        }
        if !options.exclude_azure_cli {
            sources.push(Arc::new(AzureCliCredential::new(
                identity.azure_cli_path.clone(),
                env.tenant_id.clone(),
            )));
        }

        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl CredentialStrategy for DefaultCredential {
    fn name(&self) -> &'static str {
        "DefaultAzureCredential"
    }

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.acquire(scope).await {
                Ok(credential) => {
                    tracing::debug!("{} obtained a token via {}", self.name(), source.name());
                    return Ok(credential);
                },
                Err(e) => {
                    tracing::debug!("{} source {} failed: {}", self.name(), source.name(), e);
                    failures.push((source.name(), e));
                },
            }
        }

        Err(CredentialError::Chain(failures))
    }
}
