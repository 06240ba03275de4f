//! Authorization Code flow handlers
//!
//! `GET /oauth/authorize` sends the client to the provider with fresh
//! state/nonce (and a PKCE challenge when enabled); `GET /oauth/callback`
//! validates state, exchanges the code, validates the ID token and
//! establishes the session; `GET /oauth/logout` revokes and clears it.
//!
//! The request-state cookie carries `state|nonce|return-target` between the
//! two redirects and exists only inside that window.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{TokenResponse, generate_pkce, generate_state};
use crate::gateway::{AppState, error_response, redirect_see_other};
use crate::token::{TokenCodec, VerifyPolicy};
use crate::{Error, Result};

/// Lifetime of the state and PKCE cookies, seconds
const REQUEST_STATE_MAX_AGE: i64 = 600;

#[derive(Debug, Deserialize)]
pub(crate) struct AuthorizeQuery {
    /// Original request URI, percent-encoded by the entrypoint redirect
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogoutQuery {
    #[serde(default)]
    redirect: Option<String>,
}

/// GET /oauth/authorize
pub async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    if state.config.no_redirects {
        return error_response(StatusCode::UNAUTHORIZED, "interactive login is disabled");
    }

    let return_target = query
        .state
        .as_deref()
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .filter(|s| s.starts_with('/') && !s.starts_with("//"))
        .unwrap_or_else(|| "/".to_string());

    let oauth_state = generate_state();
    let nonce = generate_state();

    let snapshot = state.discovery.snapshot();
    let mut auth_url = match Url::parse(&snapshot.document.authorization_endpoint) {
        Ok(url) => url,
        Err(err) => {
            warn!(error = %err, "invalid authorization endpoint");
            return error_response(StatusCode::BAD_GATEWAY, "identity provider unavailable");
        }
    };

    {
        let mut params = auth_url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &state.config.client_id);
        params.append_pair("redirect_uri", &state.config.redirect_uri());
        params.append_pair("scope", "openid email profile");
        params.append_pair("state", &oauth_state);
        params.append_pair("nonce", &nonce);
    }

    let mut jar = jar;

    if state.config.enable_pkce {
        let (verifier, challenge) = generate_pkce();
        auth_url
            .query_pairs_mut()
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        let sealed = match state.sessions.seal(&verifier) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(error = %err, "failed to seal pkce verifier");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        };
        jar = state.sessions.cookies.write(
            jar,
            &state.config.cookies.pkce,
            &sealed,
            REQUEST_STATE_MAX_AGE,
        );
    }

    let request_state = format!("{oauth_state}|{nonce}|{return_target}");
    let sealed_state = match state.sessions.seal(&request_state) {
        Ok(sealed) => sealed,
        Err(err) => {
            warn!(error = %err, "failed to seal request state");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    jar = state.sessions.cookies.write(
        jar,
        &state.config.cookies.request_state,
        &sealed_state,
        REQUEST_STATE_MAX_AGE,
    );

    debug!(target = %return_target, "redirecting to identity provider");
    (jar, redirect_see_other(auth_url.as_str())).into_response()
}

/// GET /oauth/callback
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(ref error) = query.error {
        warn!(error = %error, description = ?query.error_description, "provider returned an error");
        return error_response(StatusCode::FORBIDDEN, "authorization rejected");
    }

    match complete_callback(&state, jar, &query).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "callback failed");
            error_response(err.status_code(), "authentication failed")
        }
    }
}

async fn complete_callback(
    state: &Arc<AppState>,
    jar: CookieJar,
    query: &CallbackQuery,
) -> Result<Response> {
    let code = query.code.as_deref().ok_or(Error::SessionNotFound)?;
    let query_state = query.state.as_deref().unwrap_or_default();

    let sealed_state = state
        .sessions
        .cookies
        .read(&jar, &state.config.cookies.request_state)
        .ok_or(Error::SessionNotFound)?;
    let request_state = state.sessions.unseal(&sealed_state)?;

    let mut parts = request_state.splitn(3, '|');
    let expected_state = parts.next().unwrap_or_default();
    let expected_nonce = parts.next().unwrap_or_default();
    let return_target = parts.next().filter(|t| t.starts_with('/')).unwrap_or("/");

    if expected_state.is_empty() || expected_state != query_state {
        return Err(Error::StateMismatch);
    }

    let verifier = if state.config.enable_pkce {
        let sealed = state
            .sessions
            .cookies
            .read(&jar, &state.config.cookies.pkce)
            .ok_or(Error::PkceCookieEmpty)?;
        let verifier = state.sessions.unseal(&sealed)?;
        if verifier.is_empty() {
            return Err(Error::PkceCookieEmpty);
        }
        Some(verifier)
    } else {
        None
    };

    let snapshot = state.discovery.snapshot();
    let tokens = exchange_code(state, &snapshot.document.token_endpoint, code, verifier).await?;

    // the ID token binds the session to this flow via the nonce
    if let Some(ref id_token) = tokens.id_token {
        let policy = VerifyPolicy {
            issuer: snapshot.document.issuer.clone(),
            client_id: state.config.client_id.clone(),
            skip_issuer_check: state.config.skip_access_token_issuer_check,
            skip_client_id_check: false,
        };
        let id_claims = TokenCodec::verify(id_token, &snapshot.keys, &policy)?;
        match id_claims.nonce.as_deref() {
            Some(nonce) if nonce == expected_nonce => {}
            _ => return Err(Error::StateMismatch),
        }
    }

    let mut jar = state.sessions.establish(jar, &tokens).await?;
    jar = state
        .sessions
        .cookies
        .clear(jar, &state.config.cookies.request_state);
    if state.config.enable_pkce {
        jar = state.sessions.cookies.clear(jar, &state.config.cookies.pkce);
    }

    info!(target = %return_target, "session established");
    Ok((jar, redirect_see_other(return_target)).into_response())
}

async fn exchange_code(
    state: &Arc<AppState>,
    token_endpoint: &str,
    code: &str,
    verifier: Option<String>,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", state.config.redirect_uri()),
        ("client_id", state.config.client_id.clone()),
    ];
    if !state.config.client_secret.is_empty() {
        form.push(("client_secret", state.config.client_secret.clone()));
    }
    if let Some(verifier) = verifier {
        form.push(("code_verifier", verifier));
    }

    let response = state
        .http
        .post(token_endpoint)
        .form(&form)
        .timeout(state.config.idp_timeout())
        .send()
        .await
        .map_err(|e| Error::Idp(format!("code exchange failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        debug!(status = %status, "code exchange refused");
        return Err(Error::Idp(format!("code exchange failed: HTTP {status}")));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Idp(format!("invalid token response: {e}")))
}

/// GET /oauth/logout
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let access_token = state
        .sessions
        .extract_access_token(&axum::http::HeaderMap::new(), &jar, &HashMap::new())
        .ok()
        .flatten();

    if let Some(ref token) = access_token {
        if let Ok(Some(refresh_token)) = state.sessions.refresh_token_for(&jar, token).await {
            revoke_refresh_token(&state, &refresh_token).await;
        }
    }

    let jar = state.sessions.clear(jar, access_token.as_deref()).await;

    let redirect = query
        .redirect
        .or_else(|| state.config.post_logout_redirect_uri.clone());

    match redirect {
        Some(target) => {
            let snapshot = state.discovery.snapshot();
            let location = match snapshot.document.end_session_endpoint {
                Some(ref end_session) => {
                    format!("{end_session}?post_logout_redirect_uri={target}")
                }
                None => target,
            };
            (jar, redirect_see_other(&location)).into_response()
        }
        None => (jar, (StatusCode::OK, "OK")).into_response(),
    }
}

async fn revoke_refresh_token(state: &Arc<AppState>, refresh_token: &str) {
    let snapshot = state.discovery.snapshot();
    let Some(ref revocation) = snapshot.document.revocation_endpoint else {
        return;
    };

    let result = state
        .http
        .post(revocation)
        .form(&[
            ("token", refresh_token),
            ("token_type_hint", "refresh_token"),
            ("client_id", state.config.client_id.as_str()),
            ("client_secret", state.config.client_secret.as_str()),
        ])
        .timeout(state.config.idp_timeout())
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!("refresh token revoked");
        }
        Ok(response) => {
            warn!(status = %response.status(), "revocation refused");
        }
        Err(err) => {
            warn!(error = %err, "revocation request failed");
        }
    }
}
