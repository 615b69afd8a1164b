use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use database_analysis::config::{Config, LoggingConfig};
use database_analysis::services::CredentialEnvironment;
use database_analysis::{build_app_state, build_router};

#[derive(Parser, Debug)]
#[command(name = "database-analysis", version, about = "Azure SQL top CPU consumer analysis API")]
struct Args {
    /// Path to config.toml (default: conf/config.toml, then config.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // .env is optional; real environment variables win
    let dotenv = dotenvy::dotenv().ok();

    let config = Config::load(args.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    if let Some(path) = dotenv {
        tracing::info!("Loaded environment from {}", path.display());
    }
    tracing::info!("Starting database-analysis v{}", env!("CARGO_PKG_VERSION"));

    let env = CredentialEnvironment::from_process_env(&config.identity);
    tracing::info!("Credential environment: {:?}", env);

    let state = Arc::new(build_app_state(&config, env)?);
    let app = build_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Swagger UI at http://{}/swagger-ui", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Console output plus an optional daily-rolling file; `RUST_LOG` overrides the configured level
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };
    let console = tracing_subscriber::fmt::layer().with_target(false).with_filter(filter());

    let Some(file) = logging.file.as_deref() else {
        tracing_subscriber::registry().with(console).try_init()?;
        return Ok(None);
    };

    let path = Path::new(file);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database-analysis.log".to_string());
    std::fs::create_dir_all(dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());

    tracing_subscriber::registry().with(console).with(file_layer).try_init()?;
    Ok(Some(guard))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
