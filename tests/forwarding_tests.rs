//! Forwarding client tests
//!
//! Drives the outbound client against a wiremock provider and upstream:
//! token acquisition and caching, bearer injection, the password grant, and
//! the UMA challenge retry that moves a target from the access token to an
//! RPT.

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header as header_match, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_gateway::config::{Config, GrantType};
use oidc_gateway::discovery::Discovery;
use oidc_gateway::forwarding::{ForwardingClient, TargetAuth};

use common::{CLIENT_ID, MockIdp};

fn forwarding_config(idp: &MockIdp) -> Config {
    Config {
        discovery_url: idp.discovery_url(),
        client_id: CLIENT_ID.to_string(),
        client_secret: "secret".to_string(),
        enable_forwarding: true,
        forwarding_token_margin: 10,
        ..Config::default()
    }
}

async fn client_for(idp: &MockIdp, config: Config) -> ForwardingClient {
    let http = reqwest::Client::new();
    let discovery = Arc::new(
        Discovery::bootstrap(http.clone(), &idp.discovery_url(), 0)
            .await
            .unwrap(),
    );
    ForwardingClient::new(http, Arc::new(config), discovery)
}

#[tokio::test]
async fn token_is_acquired_once_and_cached() {
    let idp = MockIdp::start().await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "sa-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let client = client_for(&idp, forwarding_config(&idp)).await;
    assert_eq!(client.access_token().await.unwrap(), "sa-token");
    assert_eq!(client.access_token().await.unwrap(), "sa-token");
}

#[tokio::test]
async fn password_grant_sends_credentials() {
    let idp = MockIdp::start().await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=myuser"))
        .and(body_string_contains("password=baba1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "user-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let mut config = forwarding_config(&idp);
    config.forwarding_grant_type = GrantType::Password;
    config.forwarding_username = Some("myuser".to_string());
    config.forwarding_password = Some("baba1234".to_string());

    let client = client_for(&idp, config).await;
    assert_eq!(client.access_token().await.unwrap(), "user-token");
}

#[tokio::test]
async fn forward_injects_bearer_token() {
    let idp = MockIdp::start().await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "sa-token",
            "expires_in": 3600,
        })))
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_match("authorization", "Bearer sa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&upstream)
        .await;

    let client = client_for(&idp, forwarding_config(&idp)).await;
    let url = format!("{}/api", upstream.uri());
    let response = client
        .forward(
            reqwest::Method::GET,
            &url,
            reqwest::header::HeaderMap::new(),
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let key = format!("GET {url}");
    assert_eq!(client.target_state(&key), TargetAuth::AccessToken);
}

#[tokio::test]
async fn uma_challenge_exchanges_ticket_and_retries() {
    let idp = MockIdp::start().await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "sa-token",
            "expires_in": 3600,
        })))
        .mount(&idp.server)
        .await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("uma-ticket"))
        .and(body_string_contains("ticket=t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rpt-1",
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    // the access token draws a UMA challenge, the RPT succeeds
    Mock::given(method("GET"))
        .and(header_match("authorization", "Bearer sa-token"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "UMA realm=\"test\", ticket=\"t1\""),
        )
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(header_match("authorization", "Bearer rpt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("granted"))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = forwarding_config(&idp);
    config.enable_uma = true;
    let client = client_for(&idp, config).await;

    let url = format!("{}/pets", upstream.uri());
    let response = client
        .forward(
            reqwest::Method::GET,
            &url,
            reqwest::header::HeaderMap::new(),
            Vec::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "granted");

    let key = format!("GET {url}");
    assert_eq!(client.target_state(&key), TargetAuth::Rpt("rpt-1".to_string()));
}

#[tokio::test]
async fn challenge_without_uma_disabled_passes_through() {
    let idp = MockIdp::start().await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "sa-token",
            "expires_in": 3600,
        })))
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", "UMA realm=\"test\", ticket=\"t1\""),
        )
        .mount(&upstream)
        .await;

    let client = client_for(&idp, forwarding_config(&idp)).await;
    let url = format!("{}/pets", upstream.uri());
    let response = client
        .forward(
            reqwest::Method::GET,
            &url,
            reqwest::header::HeaderMap::new(),
            Vec::new(),
        )
        .await
        .unwrap();

    // UMA forwarding disabled: the 401 is returned to the caller untouched
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
