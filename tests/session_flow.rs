use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use reqwest::Url;
use secrecy::ExposeSecret;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use rca_tracker::{
    AppConfig, ChannelNavigator, DurableStore, IdentityProvider, OidcProvider, SessionManager,
    SessionStatus, TokenSource,
};

const REDIRECT_URI: &str = "http://localhost:1420/callback";

struct Harness {
    store: DurableStore,
    provider: OidcProvider,
    session: SessionManager,
    navigations: UnboundedReceiver<String>,
}

fn config(server: &Server) -> AppConfig {
    AppConfig {
        cluster: Some("test-cluster".into()),
        project: Some("plant-ops".into()),
        client_id: Some("client-123".into()),
        tenant_id: Some("tenant-abc".into()),
        redirect_uri: Some(REDIRECT_URI.into()),
        post_logout_redirect_uri: Some("http://localhost:1420/".into()),
        authority: None,
        authorize_endpoint: Some(server.url_str("/authorize")),
        token_endpoint: Some(server.url_str("/token")),
        logout_endpoint: Some(server.url_str("/logout")),
        api_base_url: Some(server.url_str("/api")),
        http_timeout_secs: 5,
        telemetry_enabled_by_default: false,
        telemetry_batch_size: 1,
        telemetry_buffer_max_bytes: 4096,
    }
}

fn harness(server: &Server) -> Harness {
    harness_over(server, DurableStore::in_memory())
}

/// A fresh provider and session over an existing store, as after a restart.
fn harness_over(server: &Server, store: DurableStore) -> Harness {
    let (navigator, navigations) = ChannelNavigator::new();
    let provider = OidcProvider::maybe_new(&config(server), store.clone(), Arc::new(navigator))
        .unwrap()
        .expect("provider is configured");
    let session = SessionManager::new(Arc::new(provider.clone()), store.clone(), None);
    Harness {
        store,
        provider,
        session,
        navigations,
    }
}

fn id_token() -> String {
    let claims = json!({
        "oid": "oid-42",
        "sub": "subject-42",
        "preferred_username": "investigator@plant.example",
        "name": "Ida Investigator"
    });
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("eyJhbGciOiJub25lIn0.{payload}.signature")
}

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

/// Runs the login redirect and returns the `state` sent to the authorize endpoint.
async fn start_login(harness: &mut Harness) -> String {
    harness.session.login().await.unwrap();
    let authorize = harness.navigations.try_recv().unwrap();
    let params = query(&authorize);
    assert_eq!(params["client_id"], "client-123");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["redirect_uri"], REDIRECT_URI);
    assert!(params["scope"].starts_with("https://test-cluster.cognitedata.com/.default"));
    assert_eq!(params["state"].len(), 24);
    params["state"].clone()
}

fn expect_code_exchange(server: &Server, expires_in: u64) {
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/token"),
            request::body(url_decoded(contains(("grant_type", "authorization_code")))),
            request::body(url_decoded(contains(("code", "auth-code-1"))))
        ))
        .respond_with(json_encoded(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": expires_in,
            "token_type": "Bearer",
            "id_token": id_token()
        }))),
    );
}

#[tokio::test]
async fn redirect_login_round_trip() {
    let server = Server::run();
    expect_code_exchange(&server, 3600);
    let mut harness = harness(&server);

    let session = harness.session.initialize().await.unwrap();
    assert_eq!(session.status, SessionStatus::Unauthenticated);

    let state = start_login(&mut harness).await;
    assert_eq!(harness.session.session().status, SessionStatus::Authenticating);

    harness.provider.deliver_callback(format!(
        "{REDIRECT_URI}?code=auth-code-1&state={state}"
    ));
    let session = harness.session.initialize().await.unwrap();
    assert_eq!(session.status, SessionStatus::Authenticated);
    let account = session.account.unwrap();
    assert_eq!(account.id, "oid-42");
    assert_eq!(
        harness.store.read_string("account").unwrap().as_deref(),
        Some("oid-42")
    );
    assert!(!harness.store.has("pending-auth").unwrap());

    let token = harness.session.bearer_token().await.unwrap();
    assert_eq!(token.expose_secret(), "access-1");
    assert!(harness.session.is_authenticated().await);

    harness.session.logout().await.unwrap();
    let logout = harness.navigations.try_recv().unwrap();
    let params = query(&logout);
    assert_eq!(params["post_logout_redirect_uri"], "http://localhost:1420/");
    assert_eq!(params["logout_hint"], "investigator@plant.example");
    assert_eq!(harness.session.session().status, SessionStatus::Unauthenticated);
    assert!(!harness.store.has("account").unwrap());
    assert_eq!(harness.provider.get_account("oid-42").await.unwrap(), None);
}

#[tokio::test]
async fn expiring_token_is_refreshed_silently() {
    let server = Server::run();
    expect_code_exchange(&server, 60);
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/token"),
            request::body(url_decoded(contains(("grant_type", "refresh_token")))),
            request::body(url_decoded(contains(("refresh_token", "refresh-1"))))
        ))
        .respond_with(json_encoded(json!({
            "access_token": "access-2",
            "expires_in": 3600,
            "token_type": "Bearer"
        }))),
    );
    let mut harness = harness(&server);

    let state = start_login(&mut harness).await;
    harness
        .provider
        .deliver_callback(format!("{REDIRECT_URI}?code=auth-code-1&state={state}"));
    harness.session.initialize().await.unwrap();

    let token = harness.session.bearer_token().await.unwrap();
    assert_eq!(token.expose_secret(), "access-2");
    // The refreshed token is cached and still valid.
    let again = harness.session.bearer_token().await.unwrap();
    assert_eq!(again.expose_secret(), "access-2");
}

#[tokio::test]
async fn rejected_refresh_signs_the_user_out() {
    let server = Server::run();
    expect_code_exchange(&server, 60);
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/token"),
            request::body(url_decoded(contains(("grant_type", "refresh_token"))))
        ))
        .respond_with(status_code(400).body(r#"{"error":"invalid_grant"}"#)),
    );
    let mut harness = harness(&server);

    let state = start_login(&mut harness).await;
    harness
        .provider
        .deliver_callback(format!("{REDIRECT_URI}?code=auth-code-1&state={state}"));
    harness.session.initialize().await.unwrap();

    let err = harness.session.bearer_token().await.unwrap_err();
    assert!(matches!(err, rca_tracker::AppError::AuthRequired));
    assert_eq!(harness.session.session().status, SessionStatus::Unauthenticated);
    assert!(!harness.store.has("account").unwrap());
}

#[tokio::test]
async fn state_mismatch_is_an_error() {
    let server = Server::run();
    let mut harness = harness(&server);

    start_login(&mut harness).await;
    harness
        .provider
        .deliver_callback(format!("{REDIRECT_URI}?code=auth-code-1&state=forged"));

    let err = harness.session.initialize().await.unwrap_err();
    assert!(err.to_string().contains("state verification"));
    let session = harness.session.session();
    assert!(matches!(session.status, SessionStatus::Error(_)));
    assert!(session.last_error.is_some());
}

#[tokio::test]
async fn login_required_callback_leaves_user_signed_out() {
    let server = Server::run();
    let mut harness = harness(&server);

    start_login(&mut harness).await;
    harness
        .provider
        .deliver_callback(format!("{REDIRECT_URI}?error=login_required&state=abc"));

    let session = harness.session.initialize().await.unwrap();
    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert_eq!(session.last_error, None);
    assert!(!harness.store.has("pending-auth").unwrap());
}

#[tokio::test]
async fn replayed_callback_falls_back_to_stored_account() {
    let server = Server::run();
    expect_code_exchange(&server, 3600);
    let mut harness = harness(&server);

    let state = start_login(&mut harness).await;
    let callback = format!("{REDIRECT_URI}?code=auth-code-1&state={state}");
    harness.provider.deliver_callback(callback.clone());
    harness.session.initialize().await.unwrap();

    // The page reloads with the same URL; the code must not be exchanged again.
    let reloaded = harness_over(&server, harness.store.clone());
    reloaded.provider.deliver_callback(callback);
    let session = reloaded.session.initialize().await.unwrap();

    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.last_error, None);
    assert_eq!(session.account.map(|a| a.id).as_deref(), Some("oid-42"));
    assert_eq!(
        reloaded.store.read_string("account").unwrap().as_deref(),
        Some("oid-42")
    );
}

#[tokio::test]
async fn stray_callback_without_stored_account_is_signed_out() {
    let server = Server::run();
    let harness = harness(&server);

    harness
        .provider
        .deliver_callback(format!("{REDIRECT_URI}?code=leftover&state=old"));
    let session = harness.session.initialize().await.unwrap();

    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert_eq!(session.last_error, None);
}
