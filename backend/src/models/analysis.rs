use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

pub const SERVER_NAME_REQUIRED: &str = "A valid database server name must be provided.";
pub const DATABASE_NAME_REQUIRED: &str = "A valid database name must be provided.";

/// One row of the top-consumers report.
///
/// Built by the query executor and never mutated afterwards; the plan filter and the
/// analysis service only move or drop whole records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub server_name: String,
    pub database_name: String,
    pub total_logical_reads: u64,
    pub total_logical_writes: u64,
    pub execution_count: u64,
    /// Reads plus writes
    pub io_total: u64,
    /// Worker time per execution, in microseconds
    pub avg_cpu_time: u64,
    pub statement_text: String,
    /// Hex literal of the statement's sql_handle
    pub sql_handle: String,
    /// Hex literal of the plan_handle
    pub plan_handle: String,
    /// Showplan XML, empty when the engine returned none
    pub query_plan: String,
}

/// Inbound parameters of the analyze-database endpoint
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AnalysisRequest {
    /// Logical server name, e.g. `contoso-sql` for `contoso-sql.database.windows.net`
    #[serde(default)]
    #[validate(custom(function = "validate_server_name"))]
    pub database_server_name: String,
    #[serde(default)]
    #[validate(custom(function = "validate_database_name"))]
    pub database_name: String,
}

impl AnalysisRequest {
    pub fn new(database_server_name: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            database_server_name: database_server_name.into(),
            database_name: database_name.into(),
        }
    }

    /// Validate and return the first failure as a caller-facing message
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|errors| first_message(&errors))
    }
}

fn validate_server_name(value: &str) -> Result<(), ValidationError> {
    not_blank(value, SERVER_NAME_REQUIRED)
}

fn validate_database_name(value: &str) -> Result<(), ValidationError> {
    not_blank(value, DATABASE_NAME_REQUIRED)
}

fn not_blank(value: &str, message: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(message.into()));
    }
    Ok(())
}

// Field errors come back in a hash map; report the server name first.
fn first_message(errors: &ValidationErrors) -> String {
    let fields = errors.field_errors();
    ["database_server_name", "database_name"]
        .iter()
        .filter_map(|field| fields.get(*field))
        .flat_map(|errs| errs.iter())
        .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}
