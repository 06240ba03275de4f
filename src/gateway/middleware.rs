//! Middleware stages
//!
//! Stages communicate through request extensions ([`RequestTarget`],
//! [`MatchedResource`], [`Identity`]) and each one either writes a response
//! and halts the chain or calls the next stage.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use metrics::counter;
use tracing::{debug, warn};

use super::{
    AppState, Identity, MatchedResource, RequestTarget, error_response, forward_auth,
    redirect_see_other, unauthenticated_response,
};
use crate::authz::AuthzDecision;
use crate::resource::{is_suspicious_path, normalize_path};
use crate::token::{TokenCodec, VerifyPolicy};
use crate::uma::{UmaVerdict, www_authenticate};
use crate::Error;

/// Entrypoint: derive the target, refuse suspicious paths, match a resource
pub async fn entrypoint_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let target = if state.config.no_proxy {
        match forward_auth::target(request.headers()) {
            Ok(target) => {
                // UMA method scopes need the real method, not the default
                if state.config.enable_uma_method_scope
                    && !forward_auth::has_forwarded_method(request.headers())
                {
                    counter!("gateway_requests_denied_total", "reason" => "forward_headers")
                        .increment(1);
                    return error_response(StatusCode::FORBIDDEN, "missing forwarded method");
                }
                target
            }
            Err(err) => {
                warn!(error = %err, "forward-auth headers missing");
                counter!("gateway_requests_denied_total", "reason" => "forward_headers").increment(1);
                return error_response(err.status_code(), "missing forwarded headers");
            }
        }
    } else {
        RequestTarget {
            path: request.uri().path().to_string(),
            method: request.method().as_str().to_string(),
        }
    };

    if is_suspicious_path(&target.path) {
        let normalized = normalize_path(&target.path);
        debug!(path = %target.path, normalized = %normalized, "suspicious path");
        counter!("gateway_requests_denied_total", "reason" => "suspicious_path").increment(1);
        if state.config.no_redirects {
            return error_response(StatusCode::UNAUTHORIZED, "authentication required");
        }
        return redirect_see_other(&normalized);
    }

    let matched = state
        .resources
        .matching(&target.path, &target.method)
        .cloned();

    request.extensions_mut().insert(target);
    request.extensions_mut().insert(MatchedResource(matched));
    next.run(request).await
}

/// Session: extract the token, refresh it transparently, verify it
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(MatchedResource(matched)) = request.extensions().get::<MatchedResource>().cloned()
    else {
        return next.run(request).await;
    };

    match matched {
        // white-listed resources bypass the session entirely
        Some(ref resource) if resource.white_listed => return next.run(request).await,
        Some(_) => {}
        // no rule and no default-deny: the default policy allows anonymously
        None => return next.run(request).await,
    }

    let query: HashMap<String, String> = request
        .uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let raw = match state
        .sessions
        .extract_access_token(request.headers(), &jar, &query)
    {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            counter!("gateway_requests_denied_total", "reason" => "no_token").increment(1);
            return unauthenticated_response(&state.config, request.uri());
        }
        Err(err) => {
            debug!(error = %err, "token extraction failed");
            counter!("gateway_requests_denied_total", "reason" => "bad_token").increment(1);
            let jar = state.sessions.clear(jar, None).await;
            return (jar, unauthenticated_response(&state.config, request.uri())).into_response();
        }
    };

    // peek at the expiry without verifying; a refreshable token gets renewed
    // before verification rejects it
    let (raw, refreshed_jar) = match TokenCodec::parse(&raw) {
        Ok(peek) if peek.is_expired_within(state.config.token_refresh_skew) => {
            match try_refresh(&state, &jar, &raw).await {
                Some((new_raw, new_jar)) => (new_raw, Some(new_jar)),
                None => {
                    counter!("gateway_requests_denied_total", "reason" => "expired").increment(1);
                    let jar = state.sessions.clear(jar, Some(&raw)).await;
                    return (jar, unauthenticated_response(&state.config, request.uri()))
                        .into_response();
                }
            }
        }
        Ok(_) => (raw, None),
        Err(err) => {
            debug!(error = %err, "unparseable token");
            counter!("gateway_requests_denied_total", "reason" => "bad_token").increment(1);
            return error_response(StatusCode::UNAUTHORIZED, "invalid token");
        }
    };

    let snapshot = state.discovery.snapshot();
    let policy = VerifyPolicy {
        issuer: snapshot.document.issuer.clone(),
        client_id: state.config.client_id.clone(),
        skip_issuer_check: state.config.skip_access_token_issuer_check,
        skip_client_id_check: state.config.skip_access_token_clientid_check,
    };

    let claims = match TokenCodec::verify(&raw, &snapshot.keys, &policy) {
        Ok(claims) => claims,
        Err(_) => {
            // the provider may have rotated its keys; refresh once and retry
            let retried = match state.discovery.refresh().await {
                Ok(()) => {
                    let snapshot = state.discovery.snapshot();
                    TokenCodec::verify(&raw, &snapshot.keys, &policy)
                }
                Err(err) => {
                    warn!(error = %err, "discovery refresh failed");
                    Err(Error::TokenVerificationFailure)
                }
            };
            match retried {
                Ok(claims) => claims,
                Err(err) => {
                    debug!(error = %err, "token verification failed");
                    counter!("gateway_requests_denied_total", "reason" => "verification").increment(1);
                    return error_response(StatusCode::UNAUTHORIZED, "invalid token");
                }
            }
        }
    };

    request.extensions_mut().insert(Identity {
        raw,
        claims: Arc::new(claims),
    });

    let response = next.run(request).await;
    match refreshed_jar {
        Some(jar) => (jar, response).into_response(),
        None => response,
    }
}

/// One coordinated refresh attempt; `None` clears the session upstream
async fn try_refresh(
    state: &Arc<AppState>,
    jar: &CookieJar,
    raw: &str,
) -> Option<(String, CookieJar)> {
    if !state.config.enable_refresh_tokens {
        return None;
    }
    let refresh_token = match state.sessions.refresh_token_for(jar, raw).await {
        Ok(Some(token)) => token,
        Ok(None) => return None,
        Err(err) => {
            debug!(error = %err, "refresh token unavailable");
            return None;
        }
    };

    let snapshot = state.discovery.snapshot();
    match state
        .sessions
        .refresh_coordinated(&snapshot.document.token_endpoint, raw, &refresh_token)
        .await
    {
        Ok(tokens) => {
            counter!("gateway_token_refresh_total", "outcome" => "success").increment(1);
            let new_jar = state
                .sessions
                .establish(jar.clone(), &tokens)
                .await
                .ok()?;
            Some((tokens.access_token, new_jar))
        }
        Err(err) => {
            debug!(error = %err, "refresh failed");
            counter!("gateway_token_refresh_total", "outcome" => "failure").increment(1);
            None
        }
    }
}

/// Admission: roles, groups, claim predicates, required headers, method
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(MatchedResource(Some(resource))) =
        request.extensions().get::<MatchedResource>().cloned()
    else {
        return next.run(request).await;
    };
    if resource.white_listed {
        return next.run(request).await;
    }
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return next.run(request).await;
    };
    let Some(target) = request.extensions().get::<RequestTarget>().cloned() else {
        return next.run(request).await;
    };

    let decision = state.authz.evaluate(
        &resource,
        &identity.claims,
        &target.method,
        request.headers(),
    );

    match decision {
        AuthzDecision::Allowed => next.run(request).await,
        AuthzDecision::Denied | AuthzDecision::Undefined => {
            debug!(resource = %resource.url, decision = %decision, sub = %identity.claims.sub, "admission denied");
            counter!("gateway_requests_denied_total", "reason" => "admission").increment(1);
            error_response(StatusCode::FORBIDDEN, "access denied")
        }
    }
}

/// UMA: honor a cached RPT or run the ticket-to-RPT exchange
pub async fn uma_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ref uma) = state.uma else {
        return next.run(request).await;
    };
    let Some(MatchedResource(Some(resource))) =
        request.extensions().get::<MatchedResource>().cloned()
    else {
        return next.run(request).await;
    };
    if resource.white_listed {
        return next.run(request).await;
    }
    // evaluated globally or per resource
    if !state.config.enable_uma && !resource.uma_enabled {
        return next.run(request).await;
    }
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return next.run(request).await;
    };
    let Some(target) = request.extensions().get::<RequestTarget>().cloned() else {
        return next.run(request).await;
    };

    let snapshot = state.discovery.snapshot();

    // a cached RPT covering this resource and its scopes short-circuits the
    // ticket exchange; anything less falls through to the full evaluation
    if let Some(sealed) = state.sessions.cookies.read(&jar, &state.config.cookies.uma) {
        if let Ok(rpt_raw) = state.sessions.unseal(&sealed) {
            let rpt_policy = VerifyPolicy {
                issuer: snapshot.document.issuer.clone(),
                client_id: state.config.client_id.clone(),
                skip_issuer_check: state.config.skip_access_token_issuer_check,
                skip_client_id_check: true,
            };
            if let Ok(rpt_claims) = TokenCodec::verify(&rpt_raw, &snapshot.keys, &rpt_policy) {
                if uma
                    .cached_rpt_grants(
                        &snapshot,
                        &rpt_claims,
                        &identity.claims.sub,
                        &target.path,
                        &target.method,
                    )
                    .await
                {
                    debug!(path = %target.path, "cached rpt grants access");
                    counter!("gateway_uma_decisions_total", "outcome" => "cached").increment(1);
                    return next.run(request).await;
                }
            }
        }
    }

    let verdict = uma
        .evaluate(
            &snapshot,
            &identity.raw,
            &identity.claims.sub,
            &target.path,
            &target.method,
        )
        .await;

    match verdict {
        UmaVerdict::Granted { rpt, .. } => {
            counter!("gateway_uma_decisions_total", "outcome" => "granted").increment(1);
            let sealed = match state.sessions.seal(&rpt) {
                Ok(sealed) => sealed,
                Err(err) => {
                    warn!(error = %err, "failed to seal rpt");
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
                }
            };
            let jar = state.sessions.cookies.write(
                CookieJar::new(),
                &state.config.cookies.uma,
                &sealed,
                300,
            );
            let response = next.run(request).await;
            (jar, response).into_response()
        }
        UmaVerdict::Denied { ticket, reason } => {
            debug!(error = %reason, path = %target.path, "uma denied");
            counter!("gateway_uma_decisions_total", "outcome" => "denied").increment(1);
            let mut response = error_response(StatusCode::FORBIDDEN, "access denied");
            if let Some(ticket) = ticket {
                let value = www_authenticate(&state.config.client_id, &ticket);
                if let Ok(header_value) = header::HeaderValue::from_str(&value) {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, header_value);
                }
            }
            response
        }
    }
}
