//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// OIDC settings: tokens are validated against the issuer's JWKS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL, e.g. `https://your-org.auth0.com/`.
    pub issuer: String,
    /// Audience the token must carry.
    pub audience: String,
}

impl OidcConfig {
    /// JWKS document URL derived from the issuer.
    pub fn jwks_url(&self) -> String {
        format!(
            "{}/.well-known/jwks.json",
            self.issuer.trim_end_matches('/')
        )
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Skip all verification (development only).
    pub disabled: bool,
    /// Static admin API key.
    pub admin_api_key: Option<String>,
    /// OIDC validation settings.
    pub oidc: Option<OidcConfig>,
}

impl AuthConfig {
    /// Validate the configuration at startup: when auth is enabled, at
    /// least one method must be configured.
    pub fn validate(&self) -> Result<(), String> {
        if self.disabled {
            return Ok(());
        }

        let has_api_key = self
            .admin_api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty());
        if !has_api_key && self.oidc.is_none() {
            return Err(
                "authentication is enabled but no auth method is configured; \
                 set an admin API key, configure OIDC, or disable auth for development"
                    .to_string(),
            );
        }
        Ok(())
    }
}
