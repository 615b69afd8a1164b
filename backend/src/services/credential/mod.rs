//! Credential Resolver
//!
//! Produces one credential for connecting to an Azure SQL database by walking an ordered
//! chain of strategies under a single time budget.
//!
//! # Chains
//! ```text
//! hosted:  ManagedIdentity ─▶ Default(env, workload, MI) ─▶ SqlPassword
//! local:   Default(env, workload, az cli) ─▶ SqlPassword
//! ```
//!
//! Each strategy owns its failure: it is logged, recorded as an [`AttemptFailure`] and the
//! next strategy runs. Tokens are fetched fresh for every resolution.

mod azure_cli;
mod default_chain;
mod environment;
mod managed_identity;
mod resolver;
mod sql_password;
mod token_endpoint;

pub use azure_cli::AzureCliCredential;
pub use default_chain::{DefaultCredential, DefaultCredentialOptions};
pub use environment::{CredentialEnvironment, HostEnvironment};
pub use managed_identity::ManagedIdentityCredential;
pub use resolver::{AttemptFailure, AuthError, CredentialResolver};
pub use sql_password::SqlPasswordCredential;
pub use token_endpoint::{ClientSecretCredential, WorkloadIdentityCredential};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Bearer token for the database resource
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self { secret: secret.into(), expires_on }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// SQL authentication login taken from `SQL_USERNAME` / `SQL_PASSWORD`
#[derive(Clone, PartialEq, Eq)]
pub struct SqlCredentialPair {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SqlCredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlCredentialPair")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Credential {
    Token(AccessToken),
    SqlPassword(SqlCredentialPair),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "access_token",
            Self::SqlPassword(_) => "sql_password",
        }
    }
}

/// OAuth scope requested for the database, e.g. `https://database.windows.net//.default`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScope(String);

impl TokenScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    /// v2 scope, used by the token endpoint flows
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// v1 resource, used by managed identity and the Azure CLI
    pub fn resource(&self) -> &str {
        let resource = self.0.strip_suffix(".default").unwrap_or(&self.0);
        // "https://database.windows.net//" -> "https://database.windows.net/"
        match resource.strip_suffix("//") {
            Some(base) => &resource[..base.len() + 1],
            None => resource,
        }
    }
}

/// Failure of a single strategy
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{0}")]
    Unavailable(String),

    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Process(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", format_chain(.0))]
    Chain(Vec<(&'static str, CredentialError)>),
}

impl CredentialError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Variant name, recorded alongside the message of a failed attempt
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "Unavailable",
            Self::Http(_) => "Http",
            Self::Rejected { .. } => "Rejected",
            Self::InvalidResponse(_) => "InvalidResponse",
            Self::Process(_) => "Process",
            Self::Io(_) => "Io",
            Self::Chain(_) => "Chain",
        }
    }
}

fn format_chain(failures: &[(&'static str, CredentialError)]) -> String {
    let parts: Vec<String> =
        failures.iter().map(|(name, err)| format!("{}: {}", name, err)).collect();
    format!("default credential chain failed [{}]", parts.join("; "))
}

/// One named way of obtaining a credential
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError>;
}

/// Token payload shared by the identity endpoints.
///
/// Managed identity reports `expires_on` as epoch seconds (often as a string), the v2 token
/// endpoint reports a relative `expires_in`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "deserialize_opt_epoch")]
    expires_on: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_epoch")]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_access_token(self) -> Result<AccessToken, CredentialError> {
        if self.access_token.is_empty() {
            return Err(CredentialError::InvalidResponse("empty access_token".to_string()));
        }
        let expires_on = match (self.expires_on, self.expires_in) {
            (Some(epoch), _) => DateTime::from_timestamp(epoch, 0).ok_or_else(|| {
                CredentialError::InvalidResponse(format!("expires_on out of range: {}", epoch))
            })?,
            (None, Some(secs)) => Utc::now() + chrono::Duration::seconds(secs),
            (None, None) => {
                return Err(CredentialError::InvalidResponse("missing token expiry".to_string()));
            },
        };
        Ok(AccessToken::new(self.access_token, expires_on))
    }
}

// Epoch seconds as a number or a numeric string
fn deserialize_opt_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = Option<i64>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "epoch seconds as a number or string")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            i64::try_from(v).map(Some).map_err(E::custom)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            v.trim().parse::<i64>().map(Some).map_err(E::custom)
        }
        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests;
