//! Credential resolver unit tests
//!
//! Chain ordering and budget semantics use scripted strategies; the HTTP based strategies are
//! exercised against wiremock identity endpoints.

use super::*;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCOPE: &str = "https://database.windows.net//.default";

enum Behavior {
    Token(&'static str),
    Fail(&'static str),
    Hang,
}

struct Scripted {
    name: &'static str,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(name: &'static str, behavior: Behavior) -> (Arc<dyn CredentialStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Arc::new(Self { name, behavior, calls: calls.clone() }), calls)
    }
}

#[async_trait::async_trait]
impl CredentialStrategy for Scripted {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn acquire(&self, _scope: &TokenScope) -> Result<Credential, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Token(secret) => Ok(Credential::Token(AccessToken::new(
                secret,
                Utc::now() + chrono::Duration::hours(1),
            ))),
            Behavior::Fail(message) => Err(CredentialError::unavailable(message)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }
}

fn sql_login() -> Arc<dyn CredentialStrategy> {
    Arc::new(SqlPasswordCredential::new(Some(SqlCredentialPair {
        username: "report_reader".into(),
        password: "s3cret".into(),
    })))
}

fn no_sql_login() -> Arc<dyn CredentialStrategy> {
    Arc::new(SqlPasswordCredential::new(None))
}

fn token_secret(credential: &Credential) -> &str {
    match credential {
        Credential::Token(token) => token.secret(),
        Credential::SqlPassword(_) => panic!("expected a token credential"),
    }
}

// ========================================================================
// Chain ordering
// ========================================================================

#[tokio::test]
async fn test_hosted_first_success_short_circuits() {
    let (mi, mi_calls) = Scripted::new("mi", Behavior::Token("mi-token"));
    let (default, default_calls) = Scripted::new("default", Behavior::Token("default-token"));
    let resolver =
        CredentialResolver::new(TokenScope::new(SCOPE), vec![mi, default, sql_login()], vec![]);

    let credential =
        resolver.resolve(HostEnvironment::Hosted, Duration::from_secs(5)).await.unwrap();

    assert_eq!(token_secret(&credential), "mi-token");
    assert_eq!(mi_calls.load(Ordering::SeqCst), 1);
    assert_eq!(default_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hosted_falls_back_to_default_credential() {
    let (mi, _) = Scripted::new("mi", Behavior::Fail("no identity assigned"));
    let (default, _) = Scripted::new("default", Behavior::Token("default-token"));
    let resolver =
        CredentialResolver::new(TokenScope::new(SCOPE), vec![mi, default, sql_login()], vec![]);

    let credential =
        resolver.resolve(HostEnvironment::Hosted, Duration::from_secs(5)).await.unwrap();

    assert_eq!(token_secret(&credential), "default-token");
}

#[tokio::test]
async fn test_hosted_falls_back_to_sql_login() {
    let (mi, _) = Scripted::new("mi", Behavior::Fail("no identity"));
    let (default, _) = Scripted::new("default", Behavior::Fail("chain failed"));
    let resolver =
        CredentialResolver::new(TokenScope::new(SCOPE), vec![mi, default, sql_login()], vec![]);

    let credential =
        resolver.resolve(HostEnvironment::Hosted, Duration::from_secs(5)).await.unwrap();

    match credential {
        Credential::SqlPassword(pair) => assert_eq!(pair.username, "report_reader"),
        other => panic!("expected SQL login, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hosted_exhausted_without_sql_login() {
    let (mi, _) = Scripted::new("mi", Behavior::Fail("no identity"));
    let (default, _) = Scripted::new("default", Behavior::Fail("chain failed"));
    let resolver =
        CredentialResolver::new(TokenScope::new(SCOPE), vec![mi, default, no_sql_login()], vec![]);

    let err = resolver.resolve(HostEnvironment::Hosted, Duration::from_secs(5)).await.unwrap_err();

    match &err {
        AuthError::AllMethodsExhausted { attempts, source } => {
            let names: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
            assert_eq!(names, vec!["mi", "default", "SqlPasswordCredential"]);
            assert!(attempts.iter().all(|a| a.kind == "Unavailable"));
            assert!(source.to_string().contains("SQL_USERNAME"));
        },
        other => panic!("expected AllMethodsExhausted, got {:?}", other),
    }
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn test_local_chain_never_touches_hosted_strategies() {
    let (mi, mi_calls) = Scripted::new("mi", Behavior::Token("mi-token"));
    let (dev, _) = Scripted::new("dev", Behavior::Token("dev-token"));
    let resolver = CredentialResolver::new(TokenScope::new(SCOPE), vec![mi], vec![dev, sql_login()]);

    let credential =
        resolver.resolve(HostEnvironment::Local, Duration::from_secs(5)).await.unwrap();

    assert_eq!(token_secret(&credential), "dev-token");
    assert_eq!(mi_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_chain_is_exhausted() {
    let resolver = CredentialResolver::new(TokenScope::new(SCOPE), vec![], vec![]);
    let err = resolver.resolve(HostEnvironment::Local, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, AuthError::AllMethodsExhausted { .. }));
    assert!(err.attempts().is_empty());
}

// ========================================================================
// Budget
// ========================================================================

#[tokio::test]
async fn test_budget_expiry_is_timeout_and_stops_chain() {
    let (mi, _) = Scripted::new("mi", Behavior::Fail("no identity"));
    let (hang, _) = Scripted::new("default", Behavior::Hang);
    let (after, after_calls) = Scripted::new("after", Behavior::Token("late"));
    let resolver = CredentialResolver::new(TokenScope::new(SCOPE), vec![mi, hang, after], vec![]);

    let err =
        resolver.resolve(HostEnvironment::Hosted, Duration::from_millis(50)).await.unwrap_err();

    match &err {
        AuthError::Timeout { budget, attempts } => {
            assert_eq!(*budget, Duration::from_millis(50));
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].strategy, "mi");
        },
        other => panic!("expected Timeout, got {:?}", other),
    }
    // give a stray task a chance to run if one had been spawned
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
}

// ========================================================================
// Environment snapshot
// ========================================================================

#[test]
fn test_environment_snapshot() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("WEBSITE_INSTANCE_ID", "abc123"),
        ("SQL_USERNAME", "reader"),
        ("SQL_PASSWORD", ""),
        ("AZURE_TENANT_ID", "tenant"),
    ]);
    let env = CredentialEnvironment::from_lookup(&crate::config::IdentityConfig::default(), |k| {
        vars.get(k).map(|v| v.to_string())
    });

    assert_eq!(env.host(), HostEnvironment::Hosted);
    // empty password means no SQL login at all
    assert!(env.sql_login.is_none());
    assert_eq!(env.tenant_id.as_deref(), Some("tenant"));
    assert!(env.client_secret.is_none());
}

#[test]
fn test_environment_local_without_marker() {
    let env =
        CredentialEnvironment::from_lookup(&crate::config::IdentityConfig::default(), |_| None);
    assert_eq!(env.host(), HostEnvironment::Local);
}

#[test]
fn test_token_scope_resource() {
    assert_eq!(TokenScope::new(SCOPE).resource(), "https://database.windows.net/");
    assert_eq!(TokenScope::new("https://vault.azure.net/.default").resource(), "https://vault.azure.net/");
}

#[test]
fn test_secrets_are_redacted_in_debug() {
    let token = AccessToken::new("eyJ0eXAi.secret", Utc::now());
    let pair = SqlCredentialPair { username: "u".into(), password: "hunter2".into() };
    assert!(!format!("{:?}", token).contains("eyJ0eXAi"));
    assert!(!format!("{:?}", pair).contains("hunter2"));
}

// ========================================================================
// HTTP strategies
// ========================================================================

#[tokio::test]
async fn test_app_service_managed_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/msi/token"))
        .and(header("X-IDENTITY-HEADER", "identity-secret"))
        .and(query_param("resource", "https://database.windows.net/"))
        .and(query_param("api-version", "2019-08-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "mi-token",
            "expires_on": "1893456000",
            "resource": "https://database.windows.net/",
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    let credential = ManagedIdentityCredential::app_service(
        reqwest::Client::new(),
        format!("{}/msi/token", server.uri()),
        "identity-secret".into(),
    );
    let token = credential.acquire(&TokenScope::new(SCOPE)).await.unwrap();

    match token {
        Credential::Token(t) => {
            assert_eq!(t.secret(), "mi-token");
            assert_eq!(t.expires_on().timestamp(), 1_893_456_000);
        },
        other => panic!("expected token, got {:?}", other),
    }
}

#[tokio::test]
async fn test_imds_rejection_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Metadata", "true"))
        .and(query_param("api-version", "2018-02-01"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Identity not found"))
        .mount(&server)
        .await;

    let credential = ManagedIdentityCredential::imds(reqwest::Client::new(), server.uri());
    let err = credential.acquire(&TokenScope::new(SCOPE)).await.unwrap_err();

    match err {
        CredentialError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "Identity not found");
        },
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_secret_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_secret=shh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "sp-token"
        })))
        .mount(&server)
        .await;

    let credential = ClientSecretCredential::new(
        reqwest::Client::new(),
        server.uri(),
        Some("tenant-1".into()),
        Some("client-1".into()),
        Some("shh".into()),
    );
    let token = credential.acquire(&TokenScope::new(SCOPE)).await.unwrap();

    match token {
        Credential::Token(t) => {
            assert_eq!(t.secret(), "sp-token");
            assert!(t.expires_on() > Utc::now());
        },
        other => panic!("expected token, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_secret_unconfigured_is_unavailable() {
    let credential = ClientSecretCredential::new(
        reqwest::Client::new(),
        "https://login.microsoftonline.com",
        None,
        None,
        None,
    );
    let err = credential.acquire(&TokenScope::new(SCOPE)).await.unwrap_err();
    assert_eq!(err.kind(), "Unavailable");
}

#[tokio::test]
async fn test_workload_identity_reads_assertion_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("client_assertion=federated-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "expires_in": 3600,
            "access_token": "wi-token"
        })))
        .mount(&server)
        .await;

    let token_file = std::env::temp_dir().join(format!("wi-token-{}", uuid::Uuid::new_v4()));
    std::fs::write(&token_file, "federated-jwt\n").unwrap();

    let credential = WorkloadIdentityCredential::new(
        reqwest::Client::new(),
        server.uri(),
        Some("tenant-1".into()),
        Some("client-1".into()),
        Some(token_file.to_string_lossy().into_owned()),
    );
    let result = credential.acquire(&TokenScope::new(SCOPE)).await;
    std::fs::remove_file(&token_file).ok();

    assert_eq!(token_secret(&result.unwrap()), "wi-token");
}

#[tokio::test]
async fn test_default_credential_aggregates_failures() {
    let (a, _) = Scripted::new("first", Behavior::Fail("nope"));
    let (b, _) = Scripted::new("second", Behavior::Fail("also nope"));
    let default = DefaultCredential::new(vec![a, b]);

    let err = default.acquire(&TokenScope::new(SCOPE)).await.unwrap_err();

    assert_eq!(err.kind(), "Chain");
    let message = err.to_string();
    assert!(message.contains("first: nope"));
    assert!(message.contains("second: also nope"));
}

#[test]
fn test_default_options_shape_sources() {
    let http = reqwest::Client::new();
    let env = CredentialEnvironment::default();
    let identity = crate::config::IdentityConfig::default();

    let hosted =
        DefaultCredential::from_environment(&http, &env, &identity, DefaultCredentialOptions::hosted());
    let local =
        DefaultCredential::from_environment(&http, &env, &identity, DefaultCredentialOptions::local());

    assert_eq!(
        hosted.source_names(),
        vec!["EnvironmentCredential", "WorkloadIdentityCredential", "ManagedIdentityCredential"]
    );
    assert_eq!(
        local.source_names(),
        vec!["EnvironmentCredential", "WorkloadIdentityCredential", "AzureCliCredential"]
    );
}
