pub mod analysis_service;
pub mod credential;
pub mod plan_filter;
pub mod query_executor;

pub use analysis_service::{AnalysisError, AnalysisService, AnalysisSettings};
pub use credential::{CredentialEnvironment, CredentialResolver, HostEnvironment};
pub use plan_filter::PlanFilter;
pub use query_executor::{ConnectionSettings, SqlServerExecutor, StatsExecutor};
