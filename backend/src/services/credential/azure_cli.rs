use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;

use super::{AccessToken, Credential, CredentialError, CredentialStrategy, TokenScope};

/// Developer login of the Azure CLI (`az login`)
pub struct AzureCliCredential {
    program: String,
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Local wall-clock time, e.g. "2024-05-01 10:24:31.000000"
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds, only emitted by newer CLI releases
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(program: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self { program: program.into(), tenant_id }
    }
}

#[async_trait]
impl CredentialStrategy for AzureCliCredential {
    fn name(&self) -> &'static str {
        "AzureCliCredential"
    }

    async fn acquire(&self, scope: &TokenScope) -> Result<Credential, CredentialError> {
        let mut command = Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json", "--resource"])
            .arg(scope.resource())
            .kill_on_drop(true);
        if let Some(tenant) = self.tenant_id.as_deref() {
            command.args(["--tenant", tenant]);
        }

        let output = command.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CredentialError::unavailable(format!("Azure CLI '{}' not found", self.program))
            },
            _ => CredentialError::Io(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::Process(format!(
                "az account get-access-token failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let token = parse_cli_output(&output.stdout)?;
        Ok(Credential::Token(token))
    }
}

fn parse_cli_output(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let token: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| CredentialError::InvalidResponse(format!("az output: {}", e)))?;

    let expires_on = match (token.expires_on_epoch, token.expires_on.as_deref()) {
        (Some(epoch), _) => DateTime::from_timestamp(epoch, 0),
        (None, Some(local)) => parse_local_time(local),
        (None, None) => None,
    }
    .ok_or_else(|| CredentialError::InvalidResponse("az output has no usable expiry".into()))?;

    Ok(AccessToken::new(token.access_token, expires_on))
}

fn parse_local_time(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local.from_local_datetime(&naive).earliest().map(|t| t.with_timezone(&Utc))
}
