//! Shared test harness: a wiremock identity provider and token signing
//! helpers reusing the suite's RSA key pair.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_RSA_PRIVATE: &str = include_str!("../../src/token/testdata/rsa_private.pem");
pub const TEST_JWKS: &str = include_str!("../../src/token/testdata/jwks.json");

pub const CLIENT_ID: &str = "test-client";

/// Mock identity provider serving discovery, JWKS and a token endpoint
pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base = server.uri();

        let discovery = json!({
            "issuer": format!("{base}/realms/test"),
            "authorization_endpoint": format!("{base}/realms/test/auth"),
            "token_endpoint": format!("{base}/realms/test/token"),
            "jwks_uri": format!("{base}/realms/test/certs"),
            "end_session_endpoint": format!("{base}/realms/test/logout"),
        });

        Mock::given(method("GET"))
            .and(path("/realms/test/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(discovery))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/realms/test/certs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::from_str::<Value>(TEST_JWKS).unwrap()),
            )
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/realms/test/.well-known/openid-configuration", self.server.uri())
    }

    pub fn issuer(&self) -> String {
        format!("{}/realms/test", self.server.uri())
    }

    pub fn token_path() -> &'static str {
        "/realms/test/token"
    }
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Sign claims with the suite key under kid `test-key`
pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key".to_string());
    let key = EncodingKey::from_rsa_pem(TEST_RSA_PRIVATE.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// A standard access token for `sub` with the given roles
pub fn access_token(issuer: &str, sub: &str, roles: &[&str], exp_offset: i64) -> String {
    sign(&json!({
        "sub": sub,
        "iss": issuer,
        "aud": CLIENT_ID,
        "exp": (unix_now() as i64 + exp_offset) as u64,
        "preferred_username": "myuser",
        "email": "myuser@example.com",
        "realm_access": {"roles": roles},
        "groups": ["/users"],
    }))
}

/// An RPT carrying one UMA permission
pub fn rpt_token(issuer: &str, sub: &str, rsid: &str, scopes: &[&str]) -> String {
    sign(&json!({
        "sub": sub,
        "iss": issuer,
        "exp": unix_now() + 300,
        "authorization": {"permissions": [
            {"rsid": rsid, "rsname": "pets", "scopes": scopes}
        ]},
    }))
}
