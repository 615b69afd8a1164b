//! Analysis Orchestrator
//!
//! validate -> resolve credential -> execute statement -> filter plans

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisConfig;
use crate::models::{AnalysisRequest, PerformanceRecord};
use crate::services::credential::{AuthError, Credential, CredentialResolver, HostEnvironment};
use crate::services::plan_filter::PlanFilter;
use crate::services::query_executor::{DatabaseTarget, SqlError, StatsExecutor};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("database query failed: {0}")]
    Sql(#[from] SqlError),
}

/// Values the pipeline needs, resolved at startup
#[derive(Debug, Clone, Copy)]
pub struct AnalysisSettings {
    pub environment: HostEnvironment,
    pub resolution_budget: Duration,
    pub query_timeout: Duration,
}

impl AnalysisSettings {
    pub fn new(environment: HostEnvironment, config: &AnalysisConfig) -> Self {
        Self {
            environment,
            resolution_budget: config.resolution_timeout(),
            query_timeout: config.query_timeout(),
        }
    }
}

pub struct AnalysisService {
    settings: AnalysisSettings,
    resolver: Arc<CredentialResolver>,
    executor: Arc<dyn StatsExecutor>,
    filter: PlanFilter,
}

impl AnalysisService {
    pub fn new(
        settings: AnalysisSettings,
        resolver: Arc<CredentialResolver>,
        executor: Arc<dyn StatsExecutor>,
        filter: PlanFilter,
    ) -> Self {
        Self { settings, resolver, executor, filter }
    }

    /// Top CPU consumers of `database_name` on `server_name`, system catalog noise removed.
    ///
    /// Records keep the server-side ranking. Cancelling `cancel` (or hitting the query
    /// deadline) aborts row streaming and closes the connection.
    pub async fn analyze(
        &self,
        server_name: &str,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, AnalysisError> {
        let request = AnalysisRequest::new(server_name, database_name);
        request.check().map_err(AnalysisError::Validation)?;

        let target = DatabaseTarget::new(
            request.database_server_name.trim(),
            request.database_name.trim(),
        );
        tracing::info!(
            "Analyzing {}/{} ({:?} environment)",
            target.server_name,
            target.database_name,
            self.settings.environment
        );

        let credential = self
            .resolver
            .resolve(self.settings.environment, self.settings.resolution_budget)
            .await?;

        let records = self.execute_with_deadline(&target, &credential, cancel).await?;
        let candidates = records.len();

        let kept = self.filter.retain(records);
        tracing::info!(
            "Analysis of {}/{} complete: {} of {} statements kept",
            target.server_name,
            target.database_name,
            kept.len(),
            candidates
        );
        Ok(kept)
    }

    async fn execute_with_deadline(
        &self,
        target: &DatabaseTarget,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, SqlError> {
        let scope = cancel.child_token();
        let deadline = {
            let scope = scope.clone();
            let limit = self.settings.query_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!("Query deadline of {}s reached, cancelling", limit.as_secs());
                scope.cancel();
            })
        };

        let result = self.executor.execute(target, credential, &scope).await;
        deadline.abort();
        result
    }
}
