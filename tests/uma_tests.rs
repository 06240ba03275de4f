//! UMA ticket-to-RPT exchange tests
//!
//! Exercises the full exchange against a wiremock provider: resource
//! registry probe, permission ticket, RPT grant, RPT cookie caching (no
//! second exchange), and the denial paths with and without a surfaced
//! ticket.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_gateway::config::Config;
use oidc_gateway::gateway::Gateway;

use common::{CLIENT_ID, MockIdp, access_token, rpt_token};

fn uma_config(idp: &MockIdp, upstream_uri: String) -> Config {
    Config {
        discovery_url: idp.discovery_url(),
        client_id: CLIENT_ID.to_string(),
        client_secret: "secret".to_string(),
        redirection_url: "http://localhost:3000".to_string(),
        upstream_url: Some(upstream_uri),
        secure_cookie: false,
        no_redirects: true,
        enable_uma: true,
        cookies: oidc_gateway::config::CookieNames {
            uma: "TESTUMACOOKIE".to_string(),
            ..Default::default()
        },
        resources: vec!["uri=/*".to_string()],
        ..Config::default()
    }
}

async fn mount_pat(idp: &MockIdp) {
    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "pat-token",
            "expires_in": 300,
        })))
        .mount(&idp.server)
        .await;
}

async fn mount_registry(idp: &MockIdp, uri: &str, ids: Vec<&str>) {
    Mock::given(method("GET"))
        .and(path("/realms/test/authz/protection/resource_set"))
        .and(query_param("uri", uri))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(ids)))
        .mount(&idp.server)
        .await;
}

async fn mount_resource_detail(idp: &MockIdp, id: &str, scopes: Vec<&str>) {
    let scope_objects: Vec<_> = scopes.iter().map(|s| json!({"name": s})).collect();
    Mock::given(method("GET"))
        .and(path(format!("/realms/test/authz/protection/resource_set/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": id,
            "name": "pets",
            "resource_scopes": scope_objects,
        })))
        .mount(&idp.server)
        .await;
}

fn bearer_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn granted_permission_sets_rpt_cookie_and_caches_it() {
    let idp = MockIdp::start().await;
    mount_pat(&idp).await;
    mount_registry(&idp, "/pets", vec!["res-1"]).await;
    mount_resource_detail(&idp, "res-1", vec!["GET"]).await;

    // one ticket exchange for two requests: the second reuses the cookie
    Mock::given(method("POST"))
        .and(path("/realms/test/authz/protection/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": "ticket-1"})))
        .expect(1)
        .mount(&idp.server)
        .await;

    let rpt = rpt_token(&idp.issuer(), "user-1", "res-1", &["GET"]);
    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("uma-ticket"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": rpt})),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Proxy-Accepted", "true")
                .set_body_string("pets"),
        )
        .mount(&upstream)
        .await;

    let app = Gateway::new(uma_config(&idp, upstream.uri()))
        .await
        .unwrap()
        .router();

    let token = access_token(&idp.issuer(), "user-1", &["user"], 300);

    let response = app
        .clone()
        .oneshot(bearer_request("/pets", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let uma_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|c| c.starts_with("TESTUMACOOKIE="))
        .expect("uma cookie missing")
        .split(';')
        .next()
        .unwrap()
        .trim_start_matches("TESTUMACOOKIE=")
        .to_string();
    assert!(!uma_cookie.is_empty());

    // replaying with the cached RPT must not trigger another exchange
    let request = Request::builder()
        .uri("/pets")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::COOKIE, format!("TESTUMACOOKIE={uma_cookie}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rpt_for_one_resource_does_not_grant_another() {
    let idp = MockIdp::start().await;
    mount_pat(&idp).await;
    mount_registry(&idp, "/pets", vec!["res-1"]).await;
    mount_registry(&idp, "/pets/2", vec!["res-2"]).await;
    mount_resource_detail(&idp, "res-1", vec!["GET"]).await;
    mount_resource_detail(&idp, "res-2", vec!["GET"]).await;

    Mock::given(method("POST"))
        .and(path("/realms/test/authz/protection/permission"))
        .and(body_string_contains("res-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": "ticket-1"})))
        .expect(1)
        .mount(&idp.server)
        .await;

    let rpt = rpt_token(&idp.issuer(), "user-1", "res-1", &["GET"]);
    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("uma-ticket"))
        .and(body_string_contains("ticket=ticket-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": rpt})),
        )
        .mount(&idp.server)
        .await;

    // the second resource draws its own ticket and the grant is refused
    Mock::given(method("POST"))
        .and(path("/realms/test/authz/protection/permission"))
        .and(body_string_contains("res-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": "ticket-2"})))
        .expect(1)
        .mount(&idp.server)
        .await;
    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("uma-ticket"))
        .and(body_string_contains("ticket=ticket-2"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied"
        })))
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pets"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pets"))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/pets/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = Gateway::new(uma_config(&idp, upstream.uri()))
        .await
        .unwrap()
        .router();

    let token = access_token(&idp.issuer(), "user-1", &["user"], 300);

    // legitimately obtain an RPT for /pets
    let response = app
        .clone()
        .oneshot(bearer_request("/pets", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let uma_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|c| c.starts_with("TESTUMACOOKIE="))
        .expect("uma cookie missing")
        .split(';')
        .next()
        .unwrap()
        .trim_start_matches("TESTUMACOOKIE=")
        .to_string();

    // replaying that RPT against a different resource must not short-circuit
    let request = Request::builder()
        .uri("/pets/2")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::COOKIE, format!("TESTUMACOOKIE={uma_cookie}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.contains("ticket=\"ticket-2\""));
}

#[tokio::test]
async fn unknown_resource_is_403_without_cookie() {
    let idp = MockIdp::start().await;
    mount_pat(&idp).await;
    mount_registry(&idp, "/pets/1", vec![]).await;

    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = Gateway::new(uma_config(&idp, upstream.uri()))
        .await
        .unwrap()
        .router();

    let token = access_token(&idp.issuer(), "user-1", &["user"], 300);
    let response = app.oneshot(bearer_request("/pets/1", &token)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let has_uma_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|c| c.starts_with("TESTUMACOOKIE="));
    assert!(!has_uma_cookie);
}

#[tokio::test]
async fn refused_rpt_exchange_surfaces_the_ticket() {
    let idp = MockIdp::start().await;
    mount_pat(&idp).await;
    mount_registry(&idp, "/pets", vec!["res-1"]).await;
    mount_resource_detail(&idp, "res-1", vec!["GET"]).await;

    Mock::given(method("POST"))
        .and(path("/realms/test/authz/protection/permission"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ticket": "ticket-9"})))
        .mount(&idp.server)
        .await;

    Mock::given(method("POST"))
        .and(path(MockIdp::token_path()))
        .and(body_string_contains("uma-ticket"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied"
        })))
        .mount(&idp.server)
        .await;

    let upstream = MockServer::start().await;
    let app = Gateway::new(uma_config(&idp, upstream.uri()))
        .await
        .unwrap()
        .router();

    let token = access_token(&idp.issuer(), "user-1", &["user"], 300);
    let response = app.oneshot(bearer_request("/pets", &token)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let challenge = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.starts_with("UMA "));
    assert!(challenge.contains("ticket=\"ticket-9\""));
}

#[tokio::test]
async fn method_scope_denies_methods_without_a_scope() {
    let idp = MockIdp::start().await;
    mount_pat(&idp).await;
    mount_registry(&idp, "/pets", vec!["res-1"]).await;
    mount_resource_detail(&idp, "res-1", vec!["GET"]).await;

    let upstream = MockServer::start().await;
    let mut config = uma_config(&idp, upstream.uri());
    config.enable_uma_method_scope = true;
    let app = Gateway::new(config).await.unwrap().router();

    let token = access_token(&idp.issuer(), "user-1", &["user"], 300);
    let request = Request::builder()
        .method("POST")
        .uri("/pets")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
