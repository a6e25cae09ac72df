//! Request authentication middleware.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

use super::claims::{Claims, Principal};
use super::config::AuthConfig;
use super::error::AuthError;
use super::jwks::JwksCache;

struct AuthInner {
    config: AuthConfig,
    jwks: Option<JwksCache>,
}

/// Shared authentication state, injectable into any router.
#[derive(Clone)]
pub struct AuthState {
    inner: Arc<AuthInner>,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        let jwks = config
            .oidc
            .as_ref()
            .map(|oidc| JwksCache::new(oidc.jwks_url()));
        Self {
            inner: Arc::new(AuthInner { config, jwks }),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.config.disabled
    }

    /// Verify a bearer token: static admin key first, then OIDC JWT.
    pub async fn verify_token(&self, token: &str) -> Result<Principal, AuthError> {
        if let Some(admin_key) = self.inner.config.admin_api_key.as_deref() {
            if !admin_key.is_empty() && token == admin_key {
                return Ok(Principal::api_key());
            }
        }

        if looks_like_jwt(token) {
            if let (Some(oidc), Some(jwks)) =
                (self.inner.config.oidc.as_ref(), self.inner.jwks.as_ref())
            {
                return self.verify_jwt(token, oidc, jwks).await;
            }
        }

        Err(AuthError::InvalidCredentials)
    }

    async fn verify_jwt(
        &self,
        token: &str,
        oidc: &super::config::OidcConfig,
        jwks: &JwksCache,
    ) -> Result<Principal, AuthError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing kid in JWT header".to_string()))?;

        let key = jwks.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&oidc.audience]);
        validation.set_issuer(&[&oidc.issuer]);

        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        debug!(sub = %data.claims.sub, "JWT validated");
        Ok(Principal::from_claims(&data.claims))
    }
}

/// A token looks like a JWT when it has three dot-separated parts.
fn looks_like_jwt(token: &str) -> bool {
    token.chars().filter(|c| *c == '.').count() == 2
}

/// Extract the token from the Authorization header, falling back to the
/// `api_key` query parameter (EventSource clients cannot set headers).
fn extract_token(request: &Request) -> Result<Option<String>, AuthError> {
    if let Some(header) = request.headers().get(axum::http::header::AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        let mut parts = value.split_whitespace();
        return match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                Ok(Some(token.to_string()))
            }
            _ => Err(AuthError::InvalidAuthHeader),
        };
    }

    let token = request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("api_key=")
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    });
    Ok(token)
}

/// Axum middleware enforcing authentication and attaching the [`Principal`].
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, crate::api::ApiError> {
    if auth.is_disabled() {
        request.extensions_mut().insert(Principal::dev());
        return Ok(next.run(request).await);
    }

    let token = extract_token(&request)?.ok_or(AuthError::MissingCredentials)?;
    let principal = auth.verify_token(&token).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_jwt() {
        assert!(looks_like_jwt("aaa.bbb.ccc"));
        assert!(!looks_like_jwt("plain-api-key"));
        assert!(!looks_like_jwt("a.b"));
    }

    #[tokio::test]
    async fn test_admin_key_accepted() {
        let auth = AuthState::new(AuthConfig {
            disabled: false,
            admin_api_key: Some("s3cret".to_string()),
            oidc: None,
        });

        let principal = auth.verify_token("s3cret").await.unwrap();
        assert_eq!(principal.auth_type, "api_key");

        assert!(matches!(
            auth.verify_token("wrong").await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn test_jwt_without_oidc_config_rejected() {
        let auth = AuthState::new(AuthConfig {
            disabled: false,
            admin_api_key: Some("s3cret".to_string()),
            oidc: None,
        });

        assert!(matches!(
            auth.verify_token("aaa.bbb.ccc").await.unwrap_err(),
            AuthError::InvalidCredentials
        ));
    }
}
