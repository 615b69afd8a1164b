use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub analysis: AnalysisConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins, or `scheme://*.domain` to allow every subdomain of `domain`
    pub allowed_origins: Vec<String>,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub max_age_secs: u64,
}

/// Settings injected into the analysis pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Budget for the whole credential strategy chain (default: 120)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub resolution_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for executing the statement and streaming its rows (default: 120)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub query_timeout_secs: u64,
    pub server_domain_suffix: String,
    pub port: u16,
    pub token_scope: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Presence of this variable marks a cloud-hosted instance; its value is ignored
    pub hosted_marker_var: String,
    pub authority_host: String,
    pub imds_endpoint: String,
    pub azure_cli_path: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub http_timeout_secs: u64,
    pub managed_identity_client_id: Option<String>,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from the given path, or the first config.toml found
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load(path: Option<&str>) -> Result<Self, anyhow::Error> {
        let mut config = match path.map(str::to_string).or_else(Self::find_config_file) {
            Some(config_path) => Self::from_toml(&config_path)?,
            None => {
                tracing::warn!("Configuration file not found, using defaults");
                Config::default()
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_LOG_LEVEL / APP_LOG_FILE
    /// - APP_CORS_ALLOWED_ORIGINS: comma separated origin list
    /// - APP_RESOLUTION_TIMEOUT_SECS / APP_CONNECT_TIMEOUT_SECS / APP_QUERY_TIMEOUT_SECS
    ///   (accept "30s", "2m", "1h")
    /// - APP_SQL_DOMAIN_SUFFIX: e.g. "database.windows.net"
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Some(raw) = lookup("APP_SERVER_PORT") {
            match raw.parse() {
                Ok(port) => {
                    self.server.port = port;
                    tracing::info!("Override server.port from env: {}", self.server.port);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SERVER_PORT '{}': {} (keep {})",
                    raw,
                    e,
                    self.server.port
                ),
            }
        }

        if let Some(level) = lookup("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Some(file) = lookup("APP_LOG_FILE") {
            self.logging.file = if file.trim().is_empty() { None } else { Some(file) };
            tracing::info!("Override logging.file from env: {:?}", self.logging.file);
        }

        if let Some(origins) = lookup("APP_CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!("Override cors.allowed_origins from env: {:?}", self.cors.allowed_origins);
        }

        let timeouts = [
            ("APP_RESOLUTION_TIMEOUT_SECS", &mut self.analysis.resolution_timeout_secs),
            ("APP_CONNECT_TIMEOUT_SECS", &mut self.analysis.connect_timeout_secs),
            ("APP_QUERY_TIMEOUT_SECS", &mut self.analysis.query_timeout_secs),
        ];
        for (key, slot) in timeouts {
            if let Some(raw) = lookup(key) {
                match parse_duration_to_secs(&raw) {
                    Ok(val) => {
                        *slot = val;
                        tracing::info!("Override {} from env: {}s", key, val);
                    },
                    Err(e) => tracing::warn!("Invalid {} '{}': {} (keep {}s)", key, raw, e, slot),
                }
            }
        }

        if let Some(suffix) = lookup("APP_SQL_DOMAIN_SUFFIX") {
            self.analysis.server_domain_suffix = suffix;
            tracing::info!(
                "Override analysis.server_domain_suffix from env: {}",
                self.analysis.server_domain_suffix
            );
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.analysis.resolution_timeout_secs == 0 {
            anyhow::bail!("analysis.resolution_timeout_secs must be > 0");
        }
        if self.analysis.connect_timeout_secs == 0 {
            anyhow::bail!("analysis.connect_timeout_secs must be > 0");
        }
        if self.analysis.query_timeout_secs == 0 {
            anyhow::bail!("analysis.query_timeout_secs must be > 0");
        }
        if self.analysis.port == 0 {
            anyhow::bail!("analysis.port cannot be 0");
        }
        if self.analysis.token_scope.trim().is_empty() {
            anyhow::bail!("analysis.token_scope cannot be empty");
        }
        if self.analysis.server_domain_suffix.trim().is_empty() {
            anyhow::bail!("analysis.server_domain_suffix cannot be empty");
        }
        if self.identity.http_timeout_secs == 0 {
            anyhow::bail!("identity.http_timeout_secs must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl AnalysisConfig {
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,database_analysis=debug".to_string(),
            file: Some("logs/database-analysis.log".to_string()),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:4201".to_string(),
                "https://*.azurestaticapps.net".to_string(),
            ],
            max_age_secs: 600,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            resolution_timeout_secs: 120,
            connect_timeout_secs: 30,
            query_timeout_secs: 120,
            server_domain_suffix: "database.windows.net".to_string(),
            port: 1433,
            token_scope: "https://database.windows.net//.default".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hosted_marker_var: "WEBSITE_INSTANCE_ID".to_string(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            imds_endpoint: "http://169.254.169.254/metadata/identity/oauth2/token".to_string(),
            azure_cli_path: "az".to_string(),
            http_timeout_secs: 30,
            managed_identity_client_id: None,
        }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    // Accept plain numbers (treated as seconds)
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

// Accepts numeric seconds or human-friendly strings
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '2m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
