//! JWT claims and the resolved request principal.

use serde::{Deserialize, Serialize};

/// Principal roles, derived from token permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access.
    Admin,
    /// Runner-facing endpoints.
    Runner,
    /// Run and session management.
    User,
    /// Valid token without specific permissions.
    #[default]
    Authenticated,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Runner => write!(f, "runner"),
            Role::User => write!(f, "user"),
            Role::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// OIDC JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller identity).
    pub sub: String,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Expiration time (Unix timestamp). Checked by the validator.
    pub exp: i64,

    /// Issued at.
    #[serde(default)]
    pub iat: Option<i64>,

    /// Caller's email.
    #[serde(default)]
    pub email: Option<String>,

    /// Permission strings granted to the token.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Claims {
    /// Map token permissions onto a coordinator role.
    pub fn effective_role(&self) -> Role {
        let has = |p: &str| self.permissions.iter().any(|x| x == p);

        if has("admin:full") {
            Role::Admin
        } else if has("runner:execute") {
            Role::Runner
        } else if has("user:runs") || has("user:sessions") {
            Role::User
        } else {
            Role::Authenticated
        }
    }
}

/// The authenticated caller attached to each request.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub role: Role,
    pub auth_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Principal {
    /// Principal used when authentication is disabled.
    pub fn dev() -> Self {
        Self {
            role: Role::Admin,
            auth_type: "disabled",
            subject: None,
            email: None,
        }
    }

    /// Principal for the static admin API key.
    pub fn api_key() -> Self {
        Self {
            role: Role::Admin,
            auth_type: "api_key",
            subject: None,
            email: None,
        }
    }

    /// Principal derived from validated OIDC claims.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            role: claims.effective_role(),
            auth_type: "oidc",
            subject: Some(claims.sub.clone()),
            email: claims.email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(permissions: &[&str]) -> Claims {
        Claims {
            sub: "caller-1".to_string(),
            iss: None,
            exp: 0,
            iat: None,
            email: None,
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_role_mapping() {
        assert_eq!(claims(&["admin:full"]).effective_role(), Role::Admin);
        assert_eq!(claims(&["runner:execute"]).effective_role(), Role::Runner);
        assert_eq!(claims(&["user:runs"]).effective_role(), Role::User);
        assert_eq!(claims(&["user:sessions"]).effective_role(), Role::User);
        assert_eq!(claims(&[]).effective_role(), Role::Authenticated);
    }

    #[test]
    fn test_admin_outranks_other_permissions() {
        assert_eq!(
            claims(&["user:runs", "admin:full"]).effective_role(),
            Role::Admin
        );
    }
}
