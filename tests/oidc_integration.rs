//! End-to-end protocol flow tests.
//!
//! These drive the assembled server through the full negotiation: authorize
//! request, login suspension and resumption, consent suspension and
//! resumption, token exchange, and refresh rotation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use oidp::config::Config;
use oidp::oidc::fetch::left_most_hash;
use oidp::oidc::provider::{InteractionKind, mint_round_trip_token};
use oidp::oidc::server::{AuthorizeOutcome, ClientAuthentication, OidcServer};
use oidp::oidc::types::{
    Client, ClientAuthMethod, ClientType, GrantType, Params, ResponseType, SigningAlgorithm,
};
use oidp::oidc::{RedirectSignal, ServerKeySet};
use oidp::storage::traits::{AuthSession, AuthSessionStore, ClientStore};
use oidp::storage::MemoryStorage;

const ISSUER: &str = "https://issuer.example.com";
const REDIRECT_URI: &str = "https://app.example.com/callback";

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "oidp=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

fn registered_client() -> Client {
    let now = Utc::now();
    Client {
        client_id: "foo".to_string(),
        client_secret: Some("correct horse battery staple".to_string()),
        client_name: Some("Foo App".to_string()),
        client_type: ClientType::Confidential,
        redirect_uris: vec![REDIRECT_URI.to_string()],
        grant_types: vec![
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
            GrantType::ClientCredentials,
        ],
        response_types: vec![ResponseType::Code, ResponseType::Token, ResponseType::IdToken],
        scope: Some("foo bar openid offline_access".to_string()),
        token_endpoint_auth_method: ClientAuthMethod::ClientSecretBasic,
        audience: vec![],
        id_token_signed_response_alg: SigningAlgorithm::RS256,
        id_token_encrypted_response_alg: None,
        request_object_signing_alg: None,
        request_object_encryption_alg: None,
        jwks: None,
        request_uris: vec![],
        default_max_age: None,
        created_at: now,
        updated_at: now,
    }
}

async fn setup() -> (Arc<OidcServer>, Arc<MemoryStorage>, Arc<ServerKeySet>, Config) {
    init_tracing();
    let config = Config::with_defaults(ISSUER);
    let storage = Arc::new(MemoryStorage::new());
    storage.store_client(&registered_client()).await.unwrap();
    let keys = Arc::new(ServerKeySet::generate().unwrap());
    let server = Arc::new(OidcServer::new(config.clone(), storage.clone(), keys.clone()));
    (server, storage, keys, config)
}

fn login_response_token(keys: &ServerKeySet, config: &Config, subject: &str) -> String {
    let now = Utc::now();
    mint_round_trip_token(
        keys,
        &json!({
            "iss": config.login_endpoint,
            "aud": config.issuer,
            "sub": subject,
            "auth_time": (now - Duration::seconds(30)).timestamp(),
            "iat": now.timestamp(),
            "exp": (now + Duration::minutes(5)).timestamp(),
        }),
    )
    .unwrap()
}

fn consent_response_token(keys: &ServerKeySet, config: &Config, scope: &str) -> String {
    let now = Utc::now();
    mint_round_trip_token(
        keys,
        &json!({
            "iss": config.consent_endpoint,
            "aud": config.issuer,
            "scope": scope,
            "iat": now.timestamp(),
            "exp": (now + Duration::minutes(5)).timestamp(),
        }),
    )
    .unwrap()
}

fn expect_interaction(outcome: AuthorizeOutcome, kind: InteractionKind) -> RedirectSignal {
    match outcome {
        AuthorizeOutcome::Interaction(signal) => {
            assert_eq!(signal.kind, kind);
            signal
        }
        other => panic!("expected {:?} interaction, got {:?}", kind, other),
    }
}

fn expect_redirect(outcome: AuthorizeOutcome) -> url::Url {
    match outcome {
        AuthorizeOutcome::Redirect(location) => url::Url::parse(&location).unwrap(),
        other => panic!("expected redirect, got {:?}", other),
    }
}

fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.to_string())
}

fn fragment_param(url: &url::Url, name: &str) -> Option<String> {
    let fragment = url.fragment()?;
    url::form_urlencoded::parse(fragment.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.to_string())
}

/// Drive an authorize request through login and consent to the final
/// client redirect
async fn authorize_to_completion(
    server: &OidcServer,
    keys: &ServerKeySet,
    config: &Config,
    initial: Params,
    consent_scope: &str,
) -> url::Url {
    let login = expect_interaction(
        server.authorize(&initial).await.unwrap(),
        InteractionKind::Login,
    );

    let after_login = Params::from_pairs([
        ("resume_id", login.request_id.as_str()),
        ("resume_nonce", login.nonce.as_str()),
        ("login_token", &login_response_token(keys, config, "alice")),
    ]);
    let consent = expect_interaction(
        server.authorize(&after_login).await.unwrap(),
        InteractionKind::Consent,
    );

    let after_consent = Params::from_pairs([
        ("resume_id", consent.request_id.as_str()),
        ("resume_nonce", consent.nonce.as_str()),
        (
            "consent_token",
            &consent_response_token(keys, config, consent_scope),
        ),
    ]);
    expect_redirect(server.authorize(&after_consent).await.unwrap())
}

#[tokio::test]
async fn complete_authorization_code_flow() {
    let (server, _storage, keys, config) = setup().await;

    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("scope", "foo bar"),
        ("state", "12345678"),
    ]);
    let redirect = authorize_to_completion(&server, &keys, &config, params, "foo bar").await;

    assert!(redirect.as_str().starts_with(REDIRECT_URI));
    let code = query_param(&redirect, "code").expect("code in redirect");
    assert!(!code.is_empty());
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("12345678"));

    // exchange the code
    let token_params = Params::from_pairs([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
    ]);
    let auth = Some(ClientAuthentication {
        client_id: "foo".to_string(),
        client_secret: Some("correct horse battery staple".to_string()),
    });
    let response = server.token(&token_params, auth).await.unwrap();

    assert!(!response.get_str("access_token").unwrap().is_empty());
    assert_eq!(response.get_str("token_type"), Some("bearer"));
    assert!(response.get("expires_in").unwrap().as_i64().unwrap() > 0);
    let scope = response.get_str("scope").unwrap();
    assert!(scope.contains("foo"));
    assert!(scope.contains("bar"));
    // no offline_access granted, no refresh token
    assert!(response.get_str("refresh_token").is_none());
}

#[tokio::test]
async fn authorization_code_is_single_use() {
    let (server, _storage, keys, config) = setup().await;

    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("scope", "foo"),
        ("state", "12345678"),
    ]);
    let redirect = authorize_to_completion(&server, &keys, &config, params, "foo").await;
    let code = query_param(&redirect, "code").unwrap();

    let token_params = Params::from_pairs([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
    ]);
    let auth = || {
        Some(ClientAuthentication {
            client_id: "foo".to_string(),
            client_secret: Some("correct horse battery staple".to_string()),
        })
    };

    server.token(&token_params, auth()).await.unwrap();
    let err = server.token(&token_params, auth()).await.unwrap_err();
    assert_eq!(err.code(), "invalid_grant");
}

#[tokio::test]
async fn offline_access_yields_rotating_refresh_tokens() {
    let (server, _storage, keys, config) = setup().await;

    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("scope", "foo offline_access"),
        ("state", "12345678"),
    ]);
    let redirect =
        authorize_to_completion(&server, &keys, &config, params, "foo offline_access").await;
    let code = query_param(&redirect, "code").unwrap();

    let auth = || {
        Some(ClientAuthentication {
            client_id: "foo".to_string(),
            client_secret: Some("correct horse battery staple".to_string()),
        })
    };

    let token_params = Params::from_pairs([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
    ]);
    let first = server.token(&token_params, auth()).await.unwrap();
    let first_access = first.get_str("access_token").unwrap().to_string();
    let first_refresh = first
        .get_str("refresh_token")
        .expect("refresh token for offline_access")
        .to_string();

    // present the refresh token
    let refresh_params = Params::from_pairs([
        ("grant_type", "refresh_token"),
        ("refresh_token", first_refresh.as_str()),
    ]);
    let second = server.token(&refresh_params, auth()).await.unwrap();
    let second_access = second.get_str("access_token").unwrap();
    let second_refresh = second.get_str("refresh_token").unwrap();

    assert_ne!(second_access, first_access);
    assert_ne!(second_refresh, first_refresh);

    // the old refresh token is dead
    let err = server.token(&refresh_params, auth()).await.unwrap_err();
    assert_eq!(err.code(), "invalid_grant");
}

#[tokio::test]
async fn hybrid_flow_binds_code_hash_into_the_id_token() {
    let (server, _storage, keys, config) = setup().await;

    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code id_token"),
        ("redirect_uri", REDIRECT_URI),
        ("scope", "openid"),
        ("state", "12345678"),
        ("nonce", "n-0S6_WzA2Mj"),
    ]);
    let redirect = authorize_to_completion(&server, &keys, &config, params, "openid").await;

    // hybrid responses are delivered in the fragment
    let code = fragment_param(&redirect, "code").expect("code in fragment");
    let id_token = fragment_param(&redirect, "id_token").expect("id_token in fragment");
    assert_eq!(
        fragment_param(&redirect, "state").as_deref(),
        Some("12345678")
    );

    // decode the ID token payload and check the bindings
    use base64::prelude::*;
    let payload = id_token.split('.').nth(1).unwrap();
    let claims: serde_json::Value =
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();

    assert_eq!(claims["c_hash"], left_most_hash(&code));
    assert_eq!(claims["nonce"], "n-0S6_WzA2Mj");
    assert_eq!(claims["sub"], "alice");
    assert_eq!(claims["aud"], "foo");
}

#[tokio::test]
async fn prompt_none_contract() {
    let (server, storage, _keys, _config) = setup().await;

    // remembered session authenticated an hour ago
    storage
        .create_auth_session(
            "sess-past",
            &AuthSession {
                subject: "alice".to_string(),
                auth_time: Utc::now() - Duration::hours(1),
                acr: None,
                expires_at: Utc::now() + Duration::hours(8),
            },
        )
        .await
        .unwrap();
    // session whose authentication postdates any incoming request
    storage
        .create_auth_session(
            "sess-future",
            &AuthSession {
                subject: "alice".to_string(),
                auth_time: Utc::now() + Duration::hours(1),
                acr: None,
                expires_at: Utc::now() + Duration::hours(8),
            },
        )
        .await
        .unwrap();

    // authenticated before the request: proceeds to a code
    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("state", "12345678"),
        ("prompt", "none"),
        ("session_id", "sess-past"),
    ]);
    let redirect = expect_redirect(server.authorize(&params).await.unwrap());
    assert!(query_param(&redirect, "code").is_some());

    // authentication fresher than the request: access_denied
    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("state", "12345678"),
        ("prompt", "none"),
        ("session_id", "sess-future"),
    ]);
    let redirect = expect_redirect(server.authorize(&params).await.unwrap());
    assert_eq!(
        query_param(&redirect, "error").as_deref(),
        Some("access_denied")
    );

    // unauthenticated: login_required
    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", REDIRECT_URI),
        ("state", "12345678"),
        ("prompt", "none"),
    ]);
    let redirect = expect_redirect(server.authorize(&params).await.unwrap());
    assert_eq!(
        query_param(&redirect, "error").as_deref(),
        Some("login_required")
    );
}

#[tokio::test]
async fn token_endpoint_rejects_bad_client_secrets() {
    let (server, _storage, _keys, _config) = setup().await;

    let params = Params::from_pairs([("grant_type", "client_credentials"), ("scope", "foo")]);
    let err = server
        .token(
            &params,
            Some(ClientAuthentication {
                client_id: "foo".to_string(),
                client_secret: Some("wrong".to_string()),
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_client");
}

#[tokio::test]
async fn errors_before_redirect_validation_are_not_redirected() {
    let (server, _storage, _keys, _config) = setup().await;

    let params = Params::from_pairs([
        ("client_id", "foo"),
        ("response_type", "code"),
        ("redirect_uri", "https://evil.example.com/phish"),
        ("state", "12345678"),
    ]);
    let err = server.authorize(&params).await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");
}

#[tokio::test]
async fn http_token_endpoint_with_basic_auth() {
    use base64::prelude::*;

    let (server, _storage, _keys, _config) = setup().await;
    let app = oidp::http::router(server);
    let test_server = axum_test::TestServer::new(app).unwrap();

    let authorization = http::HeaderValue::from_str(&format!(
        "Basic {}",
        BASE64_STANDARD.encode("foo:correct horse battery staple")
    ))
    .unwrap();
    let response = test_server
        .post("/oauth/token")
        .add_header(http::header::AUTHORIZATION, authorization.clone())
        .form(&[("grant_type", "client_credentials"), ("scope", "foo bar")])
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert_eq!(body["token_type"], "bearer");
    assert!(body["expires_in"].as_i64().unwrap() > 0);

    // and a failure shape: unknown grant type
    let response = test_server
        .post("/oauth/token")
        .add_header(http::header::AUTHORIZATION, authorization)
        .form(&[("grant_type", "password")])
        .await;
    response.assert_status(http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}
