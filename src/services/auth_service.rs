use async_trait::async_trait;
use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::future::Cache;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity bound to a channel at the time it was resolved
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthContext {
    pub logged_in: bool,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

impl AuthContext {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            logged_in: true,
            user_id: Some(user_id.into()),
            display_name: Some(display_name.into()),
        }
    }
}

/// Resolves channel credentials into an identity. Never fails: anything that
/// does not check out is a guest.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, credentials: Option<&str>, force_refresh: bool) -> AuthContext;
}

// Get the auth token from the handshake headers
pub fn get_auth_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = headers
            .get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for cookie in cookie::Cookie::split_parse(cookie_header).flatten() {
            if cookie.name() == cookie_name {
                return Ok(cookie.value().to_string());
            }
        }
        Err(format!("{} cookie not found", cookie_name))
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

fn context_from_claims(claims: &serde_json::Value) -> Option<AuthContext> {
    let uid = claims.get("sub").and_then(|v| v.as_str())?;
    let name = ["name", "preferred_username"]
        .iter()
        .find_map(|key| claims.get(*key).and_then(|v| v.as_str()))
        .filter(|name| !name.is_empty())
        .unwrap_or(uid);
    Some(AuthContext::user(uid, name))
}

/// Session tokens signed with the shared service secret
pub struct JwtIdentityProvider {
    secret: Option<String>,
    cache: Cache<String, AuthContext>,
}

impl JwtIdentityProvider {
    pub fn new(secret: Option<String>) -> Self {
        if secret.is_none() {
            warn!("No JWT secret configured - every channel will join as a guest");
        }
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();
        info!("Identity cache initialized");
        Self { secret, cache }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, credentials: Option<&str>, force_refresh: bool) -> AuthContext {
        let Some(token) = credentials.filter(|t| !t.is_empty()) else {
            return AuthContext::guest();
        };
        let Some(secret) = &self.secret else {
            return AuthContext::guest();
        };

        if !force_refresh {
            if let Some(ctx) = self.cache.get(token).await {
                return ctx;
            }
        }

        match validate_jwt(token, secret) {
            Ok(token_data) => match context_from_claims(&token_data.claims) {
                Some(ctx) => {
                    debug!("JWT token validated for user {:?}", ctx.user_id);
                    self.cache.insert(token.to_string(), ctx.clone()).await;
                    ctx
                }
                None => {
                    warn!("JWT token does not contain 'sub' claim");
                    AuthContext::guest()
                }
            },
            Err(e) => {
                debug!("JWT validation failed: {}", e);
                self.cache.invalidate(token).await;
                AuthContext::guest()
            }
        }
    }
}
