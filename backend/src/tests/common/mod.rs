// Common test utilities: scripted collaborators and record builders

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::AppState;
use crate::models::PerformanceRecord;
use crate::services::credential::{
    AccessToken, Credential, CredentialError, CredentialResolver, CredentialStrategy,
    HostEnvironment, TokenScope,
};
use crate::services::query_executor::{DatabaseTarget, SqlError, StatsExecutor};
use crate::services::{AnalysisService, AnalysisSettings, PlanFilter};

pub const SCOPE: &str = "https://database.windows.net//.default";
const SHOWPLAN_NS: &str = "http://schemas.microsoft.com/sqlserver/2004/07/showplan";

// ========================================================================
// Credential strategies
// ========================================================================

pub enum StrategyBehavior {
    Token,
    Fail,
    Hang,
}

/// Strategy that counts its invocations
pub struct CountingStrategy {
    name: &'static str,
    behavior: StrategyBehavior,
    pub calls: AtomicUsize,
}

impl CountingStrategy {
    pub fn new(name: &'static str, behavior: StrategyBehavior) -> Arc<Self> {
        Arc::new(Self { name, behavior, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn acquire(&self, _scope: &TokenScope) -> Result<Credential, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StrategyBehavior::Token => Ok(Credential::Token(AccessToken::new(
                format!("token-from-{}", self.name),
                Utc::now() + chrono::Duration::hours(1),
            ))),
            StrategyBehavior::Fail => {
                Err(CredentialError::unavailable(format!("{} is not configured", self.name)))
            },
            StrategyBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }
}

// ========================================================================
// Statistics executor
// ========================================================================

pub enum ExecutorBehavior {
    Records(Vec<PerformanceRecord>),
    ConnectionRefused,
    PermissionDenied,
    /// Blocks until cancelled
    Stall,
}

/// Executor that replays a script and remembers what it was asked
pub struct FakeExecutor {
    behavior: ExecutorBehavior,
    calls: AtomicUsize,
    last_target: std::sync::Mutex<Option<DatabaseTarget>>,
}

impl FakeExecutor {
    pub fn new(behavior: ExecutorBehavior) -> Arc<Self> {
        Arc::new(Self { behavior, calls: AtomicUsize::new(0), last_target: Default::default() })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<DatabaseTarget> {
        self.last_target.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatsExecutor for FakeExecutor {
    async fn execute(
        &self,
        target: &DatabaseTarget,
        _credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, SqlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_target.lock().unwrap() = Some(target.clone());

        match &self.behavior {
            ExecutorBehavior::Records(records) => Ok(records.clone()),
            ExecutorBehavior::ConnectionRefused => Err(SqlError::ConnectionFailed {
                host: format!("{}.database.windows.net", target.server_name),
                code: None,
                message: "connection refused".into(),
            }),
            ExecutorBehavior::PermissionDenied => Err(SqlError::ExecutionFailed {
                code: Some(300),
                message: "VIEW DATABASE STATE permission denied in database".into(),
            }),
            ExecutorBehavior::Stall => {
                cancel.cancelled().await;
                Err(SqlError::Cancelled)
            },
        }
    }
}

// ========================================================================
// Records
// ========================================================================

fn showplan(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-16"?><ShowPlanXML xmlns="{SHOWPLAN_NS}" Version="1.564"><BatchSequence><Batch><Statements>{body}</Statements></Batch></BatchSequence></ShowPlanXML>"#
    )
}

fn record(rank: u64, statement: &str, query_plan: String) -> PerformanceRecord {
    PerformanceRecord {
        server_name: "contoso-sql".into(),
        database_name: "sales".into(),
        total_logical_reads: 1_000 * rank,
        total_logical_writes: 10 * rank,
        execution_count: rank,
        io_total: 1_010 * rank,
        // higher rank number means lower CPU
        avg_cpu_time: 100_000 / rank,
        statement_text: statement.to_string(),
        sql_handle: format!("0x02{rank:038X}"),
        plan_handle: format!("0x06{rank:038X}"),
        query_plan,
    }
}

/// Statement over a user table
pub fn user_record(rank: u64) -> PerformanceRecord {
    let statement = format!("SELECT * FROM dbo.Orders WHERE CustomerId = {rank}");
    let plan = showplan(&format!(
        r#"<StmtSimple StatementText="{statement}" StatementId="1"><QueryPlan><OptimizerStatsUsage><StatisticsInfo Database="[sales]" Schema="[dbo]" Table="[Orders]" Statistics="[IX_Orders_Customer]"/></OptimizerStatsUsage></QueryPlan></StmtSimple>"#
    ));
    record(rank, &statement, plan)
}

/// Statement whose plan reads system catalog statistics
pub fn sys_record(rank: u64) -> PerformanceRecord {
    let statement = "SELECT name FROM dbo.Lookup";
    let plan = showplan(&format!(
        r#"<StmtSimple StatementText="{statement}" StatementId="1"><QueryPlan><OptimizerStatsUsage><StatisticsInfo Database="[sales]" Schema="[sys]" Table="[sysschobjs]" Statistics="[clst]"/></OptimizerStatsUsage></QueryPlan></StmtSimple>"#
    ));
    record(rank, statement, plan)
}

// ========================================================================
// Pipeline assembly
// ========================================================================

pub fn settings(query_timeout: Duration) -> AnalysisSettings {
    AnalysisSettings {
        environment: HostEnvironment::Local,
        resolution_budget: Duration::from_secs(5),
        query_timeout,
    }
}

pub fn service_with(
    settings: AnalysisSettings,
    strategies: Vec<Arc<dyn CredentialStrategy>>,
    executor: Arc<FakeExecutor>,
) -> AnalysisService {
    let resolver =
        CredentialResolver::new(TokenScope::new(SCOPE), strategies.clone(), strategies);
    AnalysisService::new(settings, Arc::new(resolver), executor, PlanFilter::default())
}

pub fn app_state(service: AnalysisService) -> Arc<AppState> {
    Arc::new(AppState { analysis_service: Arc::new(service) })
}
