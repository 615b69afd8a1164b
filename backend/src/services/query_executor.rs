//! Query Executor - runs the top CPU consumers statement against Azure SQL

use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use thiserror::Error;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisConfig;
use crate::models::PerformanceRecord;
use crate::services::credential::Credential;

/// Top 20 statements by average worker time, joined to their cached plans.
///
/// Statements whose plan was evicted are dropped server-side. The plan is cast to text and the
/// outer select re-applies the ranking so row order is deterministic.
pub const TOP_CONSUMERS_SQL: &str = r#"
SET NOCOUNT ON;
WITH TopConsumerQueries_CTE (TOTAL_LOGICAL_READS, TOTAL_LOGICAL_WRITES, EXECUTION_COUNT, IO_TOTAL, AvgCPUTime, statement_text, sql_handle, plan_handle) AS
(
    SELECT TOP 20
        TOTAL_LOGICAL_READS,
        TOTAL_LOGICAL_WRITES,
        EXECUTION_COUNT,
        TOTAL_LOGICAL_READS + TOTAL_LOGICAL_WRITES AS [IO_TOTAL],
        total_worker_time / execution_count AS [AvgCPUTime],
        st.text AS statement_text,
        qs.sql_handle AS sql_handle,
        qs.plan_handle
    FROM SYS.DM_EXEC_QUERY_STATS qs
    CROSS APPLY SYS.DM_EXEC_SQL_TEXT(qs.sql_handle) st
    ORDER BY total_worker_time / execution_count DESC
)
SELECT
    @@servername AS servername,
    db_name(qp.dbid) AS database_name,
    TOTAL_LOGICAL_READS,
    TOTAL_LOGICAL_WRITES,
    EXECUTION_COUNT,
    IO_TOTAL,
    AvgCPUTime,
    statement_text,
    CONVERT(VARCHAR(MAX), sql_handle, 1) AS sql_handle,
    CONVERT(VARCHAR(MAX), plan_handle, 1) AS plan_handle,
    CAST(qp.query_plan AS NVARCHAR(MAX)) AS query_plan
FROM TopConsumerQueries_CTE
CROSS APPLY SYS.DM_EXEC_QUERY_PLAN (TopConsumerQueries_CTE.plan_handle) AS qp
WHERE qp.query_plan IS NOT NULL
  AND db_name(qp.dbid) IS NOT NULL
ORDER BY AvgCPUTime DESC;"#;

const APPLICATION_NAME: &str = "database-analysis";

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("failed to connect to {host}: {message}")]
    ConnectionFailed { host: String, code: Option<u32>, message: String },

    #[error("query execution failed: {message}")]
    ExecutionFailed { code: Option<u32>, message: String },

    #[error("query cancelled")]
    Cancelled,
}

impl SqlError {
    fn connection(host: &str, err: tiberius::error::Error) -> Self {
        Self::ConnectionFailed { host: host.to_string(), code: server_code(&err), message: err.to_string() }
    }

    fn execution(err: tiberius::error::Error) -> Self {
        Self::ExecutionFailed { code: server_code(&err), message: err.to_string() }
    }

    pub fn code(&self) -> Option<u32> {
        match self {
            Self::ConnectionFailed { code, .. } | Self::ExecutionFailed { code, .. } => *code,
            Self::Cancelled => None,
        }
    }
}

fn server_code(err: &tiberius::error::Error) -> Option<u32> {
    match err {
        tiberius::error::Error::Server(token) => Some(token.code()),
        _ => None,
    }
}

/// Server and database a request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub server_name: String,
    pub database_name: String,
}

impl DatabaseTarget {
    pub fn new(server_name: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self { server_name: server_name.into(), database_name: database_name.into() }
    }
}

/// Fixed network parameters applied to every connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub domain_suffix: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            domain_suffix: config.server_domain_suffix.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// `contoso` becomes `contoso.database.windows.net`; names with a dot are used as given
    pub fn host(&self, target: &DatabaseTarget) -> String {
        let server = target.server_name.trim();
        if server.contains('.') {
            server.to_string()
        } else {
            format!("{}.{}", server, self.domain_suffix.trim_start_matches('.'))
        }
    }

    /// Driver configuration: encryption required, server certificate validated.
    ///
    /// A token is attached as the access token of the login; a SQL login replaces it with
    /// user/password authentication.
    pub fn tds_config(&self, target: &DatabaseTarget, credential: &Credential) -> Config {
        let mut config = Config::new();
        config.host(self.host(target));
        config.port(self.port);
        config.database(target.database_name.trim());
        config.application_name(APPLICATION_NAME);
        config.encryption(EncryptionLevel::Required);

        match credential {
            Credential::Token(token) => {
                config.authentication(AuthMethod::aad_token(token.secret()));
            },
            Credential::SqlPassword(pair) => {
                config.authentication(AuthMethod::sql_server(&pair.username, &pair.password));
            },
        }
        config
    }

    /// Connection string for logs; secrets never appear in it
    pub fn describe(&self, target: &DatabaseTarget, credential: &Credential) -> String {
        let auth = match credential {
            Credential::Token(_) => "Authentication=AccessToken".to_string(),
            Credential::SqlPassword(pair) => format!("User ID={};Password=***", pair.username),
        };
        format!(
            "Server=tcp:{},{};Initial Catalog={};Persist Security Info=False;{};Encrypt=True;TrustServerCertificate=False;Connect Timeout={};",
            self.host(target),
            self.port,
            target.database_name.trim(),
            auth,
            self.connect_timeout.as_secs()
        )
    }
}

/// Runs the fixed analytical statement and materializes its rows
#[async_trait]
pub trait StatsExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &DatabaseTarget,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, SqlError>;
}

/// [`StatsExecutor`] over a TDS connection opened per call
pub struct SqlServerExecutor {
    settings: ConnectionSettings,
}

type TdsClient = Client<Compat<TcpStream>>;

impl SqlServerExecutor {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self, mut config: Config) -> Result<TdsClient, SqlError> {
        let host = config.get_addr();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SqlError::connection(&host, e.into()))?;
        tcp.set_nodelay(true).map_err(|e| SqlError::connection(&host, e.into()))?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL gateways answer with a redirect to the node hosting the database
            Err(tiberius::error::Error::Routing { host: routed, port }) => {
                tracing::debug!("Following SQL gateway redirect to {}:{}", routed, port);
                config.host(&routed);
                config.port(port);
                let tcp = TcpStream::connect(config.get_addr())
                    .await
                    .map_err(|e| SqlError::connection(&routed, e.into()))?;
                tcp.set_nodelay(true).map_err(|e| SqlError::connection(&routed, e.into()))?;
                Client::connect(config, tcp.compat_write())
                    .await
                    .map_err(|e| SqlError::connection(&routed, e))
            },
            Err(e) => Err(SqlError::connection(&host, e)),
        }
    }

    async fn read_records(
        client: &mut TdsClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, SqlError> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SqlError::Cancelled),
            stream = client.simple_query(TOP_CONSUMERS_SQL) => stream.map_err(SqlError::execution)?,
        };
        let mut rows = stream.into_row_stream();
        let mut records = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SqlError::Cancelled),
                next = rows.try_next() => next.map_err(SqlError::execution)?,
            };
            match next {
                Some(row) => records.push(map_row(&row).map_err(SqlError::execution)?),
                None => break,
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl StatsExecutor for SqlServerExecutor {
    async fn execute(
        &self,
        target: &DatabaseTarget,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<PerformanceRecord>, SqlError> {
        let config = self.settings.tds_config(target, credential);
        tracing::info!("Opening SQL connection: {}", self.settings.describe(target, credential));

        let host = self.settings.host(target);
        let mut client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SqlError::Cancelled),
            connected = tokio::time::timeout(self.settings.connect_timeout, self.connect(config)) => {
                connected.map_err(|_| SqlError::ConnectionFailed {
                    host: host.clone(),
                    code: None,
                    message: format!(
                        "connect timed out after {}s",
                        self.settings.connect_timeout.as_secs()
                    ),
                })??
            },
        };
        tracing::info!("SQL connection to {} opened ({})", host, credential.kind());

        // the client owns the socket; every return path below drops and closes it
        let records = Self::read_records(&mut client, cancel).await.inspect_err(|e| {
            tracing::error!("SQL error on {} (code {:?}): {}", host, e.code(), e);
        })?;

        tracing::info!("Fetched {} candidate statements from {}", records.len(), host);
        Ok(records)
    }
}

fn map_row(row: &Row) -> Result<PerformanceRecord, tiberius::error::Error> {
    Ok(PerformanceRecord {
        server_name: text(row, "servername")?,
        database_name: text(row, "database_name")?,
        total_logical_reads: counter(row, "TOTAL_LOGICAL_READS")?,
        total_logical_writes: counter(row, "TOTAL_LOGICAL_WRITES")?,
        execution_count: counter(row, "EXECUTION_COUNT")?,
        io_total: counter(row, "IO_TOTAL")?,
        avg_cpu_time: counter(row, "AvgCPUTime")?,
        statement_text: text(row, "statement_text")?,
        sql_handle: text(row, "sql_handle")?,
        plan_handle: text(row, "plan_handle")?,
        query_plan: text(row, "query_plan")?,
    })
}

// NULL becomes "" rather than failing the row
fn text(row: &Row, column: &str) -> Result<String, tiberius::error::Error> {
    Ok(row.try_get::<&str, _>(column)?.unwrap_or_default().to_string())
}

// NULL becomes 0; the DMV counters are bigint and never legitimately negative
fn counter(row: &Row, column: &str) -> Result<u64, tiberius::error::Error> {
    Ok(clamp_counter(row.try_get::<i64, _>(column)?))
}

fn clamp_counter(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}
