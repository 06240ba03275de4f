//! Session management
//!
//! A session is whatever can be reconstructed from the request's cookie jar:
//! access token, optional refresh token, PKCE verifier and UMA RPT. The
//! server holds no per-session memory unless a refresh-token store is
//! configured.
//!
//! Refresh is serialized per `sha256(access_token)`: the first arriver holds
//! a per-key mutex and calls the token endpoint, waiters block and then
//! reuse the published result, so one refresh window produces at most one
//! IdP call no matter how many requests share the token. Lock entries are
//! removed after release to bound the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::cookies::CookieWriter;
use crate::oauth::TokenResponse;
use crate::store::{Store, StoreBackend, hash_key};
use crate::token::CookieCipher;
use crate::{Error, Result};

/// How long a completed refresh is replayed to waiters instead of
/// re-calling the IdP
const REFRESH_REUSE_WINDOW: Duration = Duration::from_secs(10);

/// Session manager shared across requests
pub struct SessionManager {
    config: Arc<Config>,
    /// Cookie factory
    pub cookies: CookieWriter,
    cipher: Option<Arc<CookieCipher>>,
    store: Option<Arc<Store>>,
    http: reqwest::Client,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    recent_refreshes: DashMap<String, (TokenResponse, Instant)>,
}

impl SessionManager {
    /// Build the manager; the cipher is present iff cookie encryption is on
    pub fn new(
        config: Arc<Config>,
        cipher: Option<Arc<CookieCipher>>,
        store: Option<Arc<Store>>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            cookies: CookieWriter::new(&config),
            config,
            cipher,
            store,
            http,
            refresh_locks: DashMap::new(),
            recent_refreshes: DashMap::new(),
        }
    }

    // ── token extraction ───────────────────────────────────────────────

    /// Extract the raw access token: Authorization header first, then the
    /// access cookie, then the `token` query parameter when enabled.
    ///
    /// A present Authorization header always wins; an invalid one is an
    /// authentication failure even when a valid cookie exists.
    pub fn extract_access_token(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
        query: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        if let Some(header) = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            let token = header
                .strip_prefix("Bearer ")
                .or_else(|| header.strip_prefix("bearer "))
                .ok_or(Error::TokenVerificationFailure)?;
            if token.is_empty() {
                return Err(Error::ZeroLengthToken);
            }
            return Ok(Some(token.to_string()));
        }

        if let Some(sealed) = self.cookies.read(jar, &self.config.cookies.access) {
            return Ok(Some(self.unseal(&sealed)?));
        }

        if self.config.enable_token_query_param {
            if let Some(token) = query.get("token") {
                if token.is_empty() {
                    return Err(Error::ZeroLengthToken);
                }
                return Ok(Some(token.clone()));
            }
        }

        Ok(None)
    }

    /// Retrieve the refresh token for an access token, from the store when
    /// configured, the refresh cookie otherwise
    pub async fn refresh_token_for(
        &self,
        jar: &CookieJar,
        access_token: &str,
    ) -> Result<Option<String>> {
        if let Some(ref store) = self.store {
            return match store.get(&hash_key(access_token)).await {
                Ok(token) => Ok(Some(self.unseal(&token)?)),
                Err(Error::NoSessionStateFound) => Ok(None),
                Err(err) => {
                    // degrade to cookie-only operation
                    warn!(error = %err, "store read failed, falling back to cookie");
                    Ok(self
                        .cookies
                        .read(jar, &self.config.cookies.refresh)
                        .map(|sealed| self.unseal(&sealed))
                        .transpose()?)
                }
            };
        }

        self.cookies
            .read(jar, &self.config.cookies.refresh)
            .map(|sealed| self.unseal(&sealed))
            .transpose()
    }

    // ── sealing ────────────────────────────────────────────────────────

    /// Seal a cookie value when encryption is configured
    pub fn seal(&self, value: &str) -> Result<String> {
        match self.cipher {
            Some(ref cipher) => cipher.encrypt(value),
            None => Ok(value.to_string()),
        }
    }

    /// Open a cookie value when encryption is configured
    pub fn unseal(&self, value: &str) -> Result<String> {
        match self.cipher {
            Some(ref cipher) => cipher.decrypt(value),
            None => Ok(value.to_string()),
        }
    }

    // ── session lifecycle ──────────────────────────────────────────────

    /// Write the session cookies (and store entry) for a token response
    pub async fn establish(&self, jar: CookieJar, tokens: &TokenResponse) -> Result<CookieJar> {
        let access_age = i64::try_from(tokens.expires_in.unwrap_or(3600)).unwrap_or(3600);
        let sealed_access = self.seal(&tokens.access_token)?;
        let mut jar = self
            .cookies
            .write(jar, &self.config.cookies.access, &sealed_access, access_age);

        if let Some(ref refresh) = tokens.refresh_token {
            if self.config.enable_refresh_tokens {
                let refresh_age =
                    i64::try_from(tokens.refresh_expires_in.unwrap_or(1800)).unwrap_or(1800);
                let sealed_refresh = self.seal(refresh)?;
                if let Some(ref store) = self.store {
                    let ttl = Duration::from_secs(tokens.refresh_expires_in.unwrap_or(1800));
                    if let Err(err) = store
                        .set(&hash_key(&tokens.access_token), &sealed_refresh, ttl)
                        .await
                    {
                        warn!(error = %err, "store write failed, keeping refresh token in cookie");
                        jar = self.cookies.write(
                            jar,
                            &self.config.cookies.refresh,
                            &sealed_refresh,
                            refresh_age,
                        );
                    }
                } else {
                    jar = self.cookies.write(
                        jar,
                        &self.config.cookies.refresh,
                        &sealed_refresh,
                        refresh_age,
                    );
                }
            }
        }

        Ok(jar)
    }

    /// Delete every session cookie and the store entry if any
    pub async fn clear(&self, jar: CookieJar, access_token: Option<&str>) -> CookieJar {
        if let (Some(store), Some(token)) = (self.store.as_ref(), access_token) {
            if let Err(err) = store.delete(&hash_key(token)).await {
                warn!(error = %err, "store delete failed");
            }
        }

        let names = &self.config.cookies;
        let mut jar = jar;
        for name in [
            names.access.as_str(),
            names.refresh.as_str(),
            names.request_state.as_str(),
            names.pkce.as_str(),
            names.uma.as_str(),
        ] {
            jar = self.cookies.clear(jar, name);
        }
        jar
    }

    // ── refresh ────────────────────────────────────────────────────────

    /// Refresh an access token, at most once per key within the reuse
    /// window: concurrent holders of the same token block on the first
    /// arriver and then reuse its result.
    pub async fn refresh_coordinated(
        &self,
        token_endpoint: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let key = hash_key(access_token);

        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // the first arriver may have completed the refresh while we waited
        if let Some(entry) = self.recent_refreshes.get(&key) {
            if entry.1.elapsed() < REFRESH_REUSE_WINDOW {
                debug!("reusing refresh performed by a concurrent request");
                return Ok(entry.0.clone());
            }
        }

        let result = self.refresh(token_endpoint, refresh_token).await;

        if let Ok(ref tokens) = result {
            self.prune_recent();
            self.recent_refreshes
                .insert(key.clone(), (tokens.clone(), Instant::now()));
        }

        drop(guard);
        self.refresh_locks.remove(&key);
        result
    }

    /// One refresh-grant call against the token endpoint
    async fn refresh(&self, token_endpoint: &str, refresh_token: &str) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        if !self.config.client_secret.is_empty() {
            form.push(("client_secret", self.config.client_secret.clone()));
        }

        let response = self
            .http
            .post(token_endpoint)
            .form(&form)
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("refresh request failed: {e}")))?;

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| Error::Idp(format!("invalid refresh response: {e}"))),
            400 | 401 => {
                debug!("identity provider rejected the refresh token");
                Err(Error::RefreshTokenExpired)
            }
            status => Err(Error::Idp(format!("refresh failed: HTTP {status}"))),
        }
    }

    fn prune_recent(&self) {
        self.recent_refreshes
            .retain(|_, entry| entry.1.elapsed() < REFRESH_REUSE_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn manager(config: Config) -> SessionManager {
        SessionManager::new(Arc::new(config), None, None, reqwest::Client::new())
    }

    fn encrypted_manager() -> SessionManager {
        let config = Config {
            enable_encrypted_token: true,
            encryption_key: "ZSeCYDUxIlhDrmPpa1Ldc7il384esSF2".to_string(),
            ..Config::default()
        };
        let cipher = Arc::new(CookieCipher::new(&config.encryption_key).unwrap());
        SessionManager::new(Arc::new(config), Some(cipher), None, reqwest::Client::new())
    }

    // ── extraction ─────────────────────────────────────────────────────

    #[test]
    fn authorization_header_wins_over_cookie() {
        let m = manager(Config::default());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer header-token".parse().unwrap());
        let jar = m
            .cookies
            .write(CookieJar::new(), "kc-access", "cookie-token", 60);

        let token = m
            .extract_access_token(&headers, &jar, &HashMap::new())
            .unwrap();
        assert_eq!(token.as_deref(), Some("header-token"));
    }

    #[test]
    fn cookie_used_when_no_header() {
        let m = manager(Config::default());
        let jar = m
            .cookies
            .write(CookieJar::new(), "kc-access", "cookie-token", 60);
        let token = m
            .extract_access_token(&HeaderMap::new(), &jar, &HashMap::new())
            .unwrap();
        assert_eq!(token.as_deref(), Some("cookie-token"));
    }

    #[test]
    fn malformed_authorization_header_is_an_error() {
        let m = manager(Config::default());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(
            m.extract_access_token(&headers, &CookieJar::new(), &HashMap::new())
                .is_err()
        );
    }

    #[test]
    fn empty_bearer_is_zero_length() {
        let m = manager(Config::default());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(matches!(
            m.extract_access_token(&headers, &CookieJar::new(), &HashMap::new()),
            Err(Error::ZeroLengthToken)
        ));
    }

    #[test]
    fn query_param_requires_opt_in() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "query-token".to_string());

        let m = manager(Config::default());
        assert_eq!(
            m.extract_access_token(&HeaderMap::new(), &CookieJar::new(), &query)
                .unwrap(),
            None
        );

        let m = manager(Config {
            enable_token_query_param: true,
            ..Config::default()
        });
        assert_eq!(
            m.extract_access_token(&HeaderMap::new(), &CookieJar::new(), &query)
                .unwrap()
                .as_deref(),
            Some("query-token")
        );
    }

    #[test]
    fn encrypted_cookie_round_trip() {
        let m = encrypted_manager();
        let sealed = m.seal("raw-token").unwrap();
        assert_ne!(sealed, "raw-token");
        let jar = m.cookies.write(CookieJar::new(), "kc-access", &sealed, 60);
        let token = m
            .extract_access_token(&HeaderMap::new(), &jar, &HashMap::new())
            .unwrap();
        assert_eq!(token.as_deref(), Some("raw-token"));
    }

    #[test]
    fn tampered_cookie_fails_decryption() {
        let m = encrypted_manager();
        let jar = m
            .cookies
            .write(CookieJar::new(), "kc-access", "not-a-sealed-value", 60);
        assert!(matches!(
            m.extract_access_token(&HeaderMap::new(), &jar, &HashMap::new()),
            Err(Error::Decryption)
        ));
    }

    // ── session lifecycle ──────────────────────────────────────────────

    #[tokio::test]
    async fn establish_writes_access_and_refresh_cookies() {
        let m = manager(Config {
            enable_refresh_tokens: true,
            ..Config::default()
        });
        let tokens = TokenResponse {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            token_type: None,
            expires_in: Some(300),
            refresh_expires_in: Some(1800),
        };
        let jar = m.establish(CookieJar::new(), &tokens).await.unwrap();
        assert_eq!(jar.get("kc-access").unwrap().value(), "at");
        assert_eq!(jar.get("kc-state").unwrap().value(), "rt");
    }

    #[tokio::test]
    async fn refresh_cookie_skipped_when_disabled() {
        let m = manager(Config::default());
        let tokens = TokenResponse {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            token_type: None,
            expires_in: Some(300),
            refresh_expires_in: None,
        };
        let jar = m.establish(CookieJar::new(), &tokens).await.unwrap();
        assert!(jar.get("kc-state").is_none());
    }

    #[tokio::test]
    async fn store_backed_session_skips_refresh_cookie() {
        let config = Config {
            enable_refresh_tokens: true,
            ..Config::default()
        };
        let store = Arc::new(Store::from_url("memory://").await.unwrap());
        let m = SessionManager::new(
            Arc::new(config),
            None,
            Some(Arc::clone(&store)),
            reqwest::Client::new(),
        );
        let tokens = TokenResponse {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            token_type: None,
            expires_in: Some(300),
            refresh_expires_in: Some(1800),
        };
        let jar = m.establish(CookieJar::new(), &tokens).await.unwrap();
        assert!(jar.get("kc-state").is_none());
        assert_eq!(store.get(&hash_key("at")).await.unwrap(), "rt");

        let fetched = m.refresh_token_for(&jar, "at").await.unwrap();
        assert_eq!(fetched.as_deref(), Some("rt"));

        let cleared = m.clear(jar, Some("at")).await;
        assert!(store.get(&hash_key("at")).await.is_err());
        assert!(cleared.get("kc-access").unwrap().value().is_empty());
    }

    #[tokio::test]
    async fn clear_expires_every_session_cookie() {
        let m = manager(Config::default());
        let mut jar = CookieJar::new();
        for name in ["kc-access", "kc-state", "OAuth_Token_Request_State", "pkce", "uma_token"] {
            jar = m.cookies.write(jar, name, "v", 60);
        }
        let cleared = m.clear(jar, None).await;
        for name in ["kc-access", "kc-state", "OAuth_Token_Request_State", "pkce", "uma_token"] {
            assert!(cleared.get(name).unwrap().value().is_empty(), "{name}");
        }
    }
}
