// Library exports for the database analysis service

// Initialize i18n at crate root (must be before any module that uses t! macro)
rust_i18n::i18n!("locales", fallback = "en");

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

use axum::{Router, response::Redirect, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::services::credential::TokenScope;
use crate::services::{
    AnalysisService, AnalysisSettings, ConnectionSettings, CredentialEnvironment,
    CredentialResolver, PlanFilter, SqlServerExecutor,
};

/// Shared state handed to every handler
pub struct AppState {
    pub analysis_service: Arc<AnalysisService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(handlers::analyze_database, handlers::health),
    components(schemas(models::PerformanceRecord, handlers::HealthResponse)),
    tags(
        (name = "Analysis", description = "Top CPU consumers of an Azure SQL database"),
        (name = "System", description = "Service probes")
    ),
    info(
        title = "Database Analysis API",
        version = "1.0.0",
        description = "Reports the statements that consume the most CPU on an Azure SQL database"
    )
)]
pub struct ApiDoc;

/// Wire the production pipeline from configuration and the startup environment snapshot
pub fn build_app_state(config: &Config, env: CredentialEnvironment) -> anyhow::Result<AppState> {
    let resolver = CredentialResolver::from_environment(
        TokenScope::new(config.analysis.token_scope.clone()),
        &env,
        &config.identity,
    )?;
    let executor = SqlServerExecutor::new(ConnectionSettings::from_config(&config.analysis));
    let settings = AnalysisSettings::new(env.host(), &config.analysis);

    tracing::info!(
        "Analysis pipeline ready: {:?} environment, credential budget {}s, query deadline {}s",
        settings.environment,
        settings.resolution_budget.as_secs(),
        settings.query_timeout.as_secs()
    );

    let analysis_service = AnalysisService::new(
        settings,
        Arc::new(resolver),
        Arc::new(executor),
        PlanFilter::default(),
    );

    Ok(AppState { analysis_service: Arc::new(analysis_service) })
}

pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    let api = Router::new()
        .route("/AnalyzeDatabase/analyze-database", get(handlers::analyze_database))
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(|| async { Redirect::temporary("/swagger-ui") }))
        .merge(api)
        .layer(axum::middleware::from_fn(middleware::locale_middleware))
        .layer(axum::middleware::from_fn(middleware::request_log_middleware))
        .layer(middleware::cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http())
}
