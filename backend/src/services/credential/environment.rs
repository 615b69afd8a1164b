use super::SqlCredentialPair;
use crate::config::IdentityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEnvironment {
    /// Running on a cloud platform instance (App Service, container host)
    Hosted,
    /// Developer machine
    Local,
}

/// Snapshot of every environment value the credential strategies consume.
///
/// Taken once at the process boundary so nothing in the pipeline reads the environment.
#[derive(Clone, Default)]
pub struct CredentialEnvironment {
    pub hosted: bool,
    pub sql_login: Option<SqlCredentialPair>,
    pub identity_endpoint: Option<String>,
    pub identity_header: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub federated_token_file: Option<String>,
    pub authority_host: Option<String>,
}

impl CredentialEnvironment {
    pub fn from_process_env(identity: &IdentityConfig) -> Self {
        Self::from_lookup(identity, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(identity: &IdentityConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sql_login = match (value("SQL_USERNAME"), value("SQL_PASSWORD")) {
            (Some(username), Some(password)) => Some(SqlCredentialPair { username, password }),
            _ => None,
        };

        Self {
            // presence only, the value is irrelevant
            hosted: lookup(&identity.hosted_marker_var).is_some_and(|v| !v.is_empty()),
            sql_login,
            identity_endpoint: value("IDENTITY_ENDPOINT"),
            identity_header: value("IDENTITY_HEADER"),
            tenant_id: value("AZURE_TENANT_ID"),
            client_id: value("AZURE_CLIENT_ID"),
            client_secret: value("AZURE_CLIENT_SECRET"),
            federated_token_file: value("AZURE_FEDERATED_TOKEN_FILE"),
            authority_host: value("AZURE_AUTHORITY_HOST"),
        }
    }

    pub fn host(&self) -> HostEnvironment {
        if self.hosted { HostEnvironment::Hosted } else { HostEnvironment::Local }
    }
}

impl std::fmt::Debug for CredentialEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEnvironment")
            .field("host", &self.host())
            .field("sql_login", &self.sql_login.is_some())
            .field("identity_endpoint", &self.identity_endpoint)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.is_some())
            .field("federated_token_file", &self.federated_token_file)
            .finish()
    }
}
