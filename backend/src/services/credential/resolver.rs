use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{
    Credential, CredentialEnvironment, CredentialError, CredentialStrategy, DefaultCredential,
    DefaultCredentialOptions, HostEnvironment, ManagedIdentityCredential, SqlPasswordCredential,
    TokenScope,
};
use crate::config::IdentityConfig;

/// Diagnostic record of one strategy that did not produce a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub strategy: &'static str,
    pub kind: &'static str,
    pub message: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.strategy, self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("all authentication methods failed after {} attempt(s)", .attempts.len())]
    AllMethodsExhausted {
        attempts: Vec<AttemptFailure>,
        #[source]
        source: CredentialError,
    },

    #[error("credential resolution timed out after {}s", .budget.as_secs())]
    Timeout { budget: Duration, attempts: Vec<AttemptFailure> },
}

impl AuthError {
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            Self::AllMethodsExhausted { attempts, .. } | Self::Timeout { attempts, .. } => attempts,
        }
    }
}

type Chain = Vec<Arc<dyn CredentialStrategy>>;

/// Ordered credential strategies for each host environment
pub struct CredentialResolver {
    scope: TokenScope,
    hosted: Chain,
    local: Chain,
}

impl CredentialResolver {
    pub fn new(scope: TokenScope, hosted: Chain, local: Chain) -> Self {
        Self { scope, hosted, local }
    }

    /// Standard chains:
    /// - hosted: managed identity, default credential (headless), SQL login
    /// - local: default credential (developer tools), SQL login
    pub fn from_environment(
        scope: TokenScope,
        env: &CredentialEnvironment,
        identity: &IdentityConfig,
    ) -> Result<Self, anyhow::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(identity.http_timeout_secs))
            .build()?;

        let managed_identity = ManagedIdentityCredential::detect(
            http.clone(),
            env.identity_endpoint.as_deref(),
            env.identity_header.as_deref(),
            &identity.imds_endpoint,
        )
        .with_client_id(identity.managed_identity_client_id.clone());
        let hosted_default = DefaultCredential::from_environment(
            &http,
            env,
            identity,
            DefaultCredentialOptions::hosted(),
        );
        let local_default = DefaultCredential::from_environment(
            &http,
            env,
            identity,
            DefaultCredentialOptions::local(),
        );
        tracing::debug!(
            "Default credential sources: hosted={:?} local={:?}",
            hosted_default.source_names(),
            local_default.source_names()
        );

        let sql_login: Arc<dyn CredentialStrategy> =
            Arc::new(SqlPasswordCredential::new(env.sql_login.clone()));

        let hosted: Chain =
            vec![Arc::new(managed_identity), Arc::new(hosted_default), sql_login.clone()];
        let local: Chain = vec![Arc::new(local_default), sql_login];

        Ok(Self::new(scope, hosted, local))
    }

    pub fn chain(&self, environment: HostEnvironment) -> &[Arc<dyn CredentialStrategy>] {
        match environment {
            HostEnvironment::Hosted => &self.hosted,
            HostEnvironment::Local => &self.local,
        }
    }

    /// Walk the chain for `environment` until a strategy succeeds.
    ///
    /// The whole walk shares one `budget`; when it elapses the outstanding attempt is dropped
    /// and no later strategy runs.
    pub async fn resolve(
        &self,
        environment: HostEnvironment,
        budget: Duration,
    ) -> Result<Credential, AuthError> {
        tracing::info!("Resolving database credential ({:?} environment)", environment);

        let mut attempts = Vec::new();
        let outcome =
            tokio::time::timeout(budget, self.walk(self.chain(environment), &mut attempts)).await;

        match outcome {
            Ok(Ok(credential)) => Ok(credential),
            Ok(Err(source)) => {
                tracing::error!(
                    "All authentication methods failed: {}",
                    attempts.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" | ")
                );
                Err(AuthError::AllMethodsExhausted { attempts, source })
            },
            Err(_) => {
                tracing::error!(
                    "Credential resolution timed out after {}s ({} attempt(s) failed before)",
                    budget.as_secs(),
                    attempts.len()
                );
                Err(AuthError::Timeout { budget, attempts })
            },
        }
    }

    async fn walk(
        &self,
        chain: &[Arc<dyn CredentialStrategy>],
        attempts: &mut Vec<AttemptFailure>,
    ) -> Result<Credential, CredentialError> {
        let mut last_error = None;

        for strategy in chain {
            tracing::info!("Attempting {}", strategy.name());
            match strategy.acquire(&self.scope).await {
                Ok(credential) => {
                    tracing::info!(
                        "{} succeeded ({})",
                        strategy.name(),
                        credential.kind()
                    );
                    return Ok(credential);
                },
                Err(e) => {
                    tracing::warn!("{} failed: {}: {}", strategy.name(), e.kind(), e);
                    attempts.push(AttemptFailure {
                        strategy: strategy.name(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    last_error = Some(e);
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| CredentialError::unavailable("no credential strategies configured")))
    }
}
