use async_trait::async_trait;

use super::{Credential, CredentialError, CredentialStrategy, SqlCredentialPair, TokenScope};

/// Last-resort SQL authentication login
pub struct SqlPasswordCredential {
    login: Option<SqlCredentialPair>,
}

impl SqlPasswordCredential {
    pub fn new(login: Option<SqlCredentialPair>) -> Self {
        Self { login }
    }
}

#[async_trait]
impl CredentialStrategy for SqlPasswordCredential {
    fn name(&self) -> &'static str {
        "SqlPasswordCredential"
    }

    async fn acquire(&self, _scope: &TokenScope) -> Result<Credential, CredentialError> {
        match &self.login {
            Some(pair) => {
                tracing::info!("Using SQL authentication for login {}", pair.username);
                Ok(Credential::SqlPassword(pair.clone()))
            },
            None => Err(CredentialError::unavailable(
                "SQL_USERNAME and SQL_PASSWORD are not both set",
            )),
        }
    }
}
