//! Bearer-token authentication for the front door, scoped to what a route
//! is allowed to do: read-only routes (task/tree status, `/active`) accept
//! either token, mutating routes (submit, step, cancel, settings) require
//! the full one.

use crate::config::{AuthConfig, AuthMode};
use crate::error::GatewayError;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenScope {
    Read,
    Write,
}

#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    pub mode: AuthMode,
    token: Option<String>,
    read_only_token: Option<String>,
}

impl ResolvedAuth {
    pub fn from_config(config: &AuthConfig, env_token: Option<String>) -> Self {
        let token = config.token.clone().or(env_token);
        Self {
            mode: config.mode,
            token,
            read_only_token: config.read_only_token.clone(),
        }
    }

    /// Checks `provided` against the token(s) that satisfy `scope`. A
    /// `Write`-scoped route only accepts the full token; a `Read`-scoped
    /// route also accepts the read-only token when one is configured.
    pub fn verify_token(&self, provided: Option<&str>, scope: TokenScope) -> Result<(), GatewayError> {
        match self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Token => {
                let provided = provided.ok_or_else(|| GatewayError::auth_failed("token required"))?;
                let full = self.token.as_deref().ok_or_else(|| GatewayError::auth_failed("no token configured"))?;
                if constant_time_eq(full.as_bytes(), provided.as_bytes()) {
                    return Ok(());
                }
                if scope == TokenScope::Read {
                    if let Some(read_only) = self.read_only_token.as_deref() {
                        if constant_time_eq(read_only.as_bytes(), provided.as_bytes()) {
                            return Ok(());
                        }
                    }
                }
                Err(GatewayError::auth_failed("invalid token"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(token: &str, read_only: Option<&str>) -> ResolvedAuth {
        ResolvedAuth {
            mode: AuthMode::Token,
            token: Some(token.into()),
            read_only_token: read_only.map(Into::into),
        }
    }

    #[test]
    fn full_token_satisfies_both_scopes() {
        let a = auth("full-token", None);
        assert!(a.verify_token(Some("full-token"), TokenScope::Write).is_ok());
        assert!(a.verify_token(Some("full-token"), TokenScope::Read).is_ok());
    }

    #[test]
    fn read_only_token_cannot_reach_write_routes() {
        let a = auth("full-token", Some("viewer-token"));
        assert!(a.verify_token(Some("viewer-token"), TokenScope::Read).is_ok());
        assert!(a.verify_token(Some("viewer-token"), TokenScope::Write).is_err());
    }

    #[test]
    fn wrong_token_is_rejected_on_every_scope() {
        let a = auth("full-token", Some("viewer-token"));
        assert!(a.verify_token(Some("nope"), TokenScope::Read).is_err());
        assert!(a.verify_token(Some("nope"), TokenScope::Write).is_err());
        assert!(a.verify_token(None, TokenScope::Read).is_err());
    }

    #[test]
    fn no_auth_accepts_anything() {
        let a = ResolvedAuth { mode: AuthMode::None, token: None, read_only_token: None };
        assert!(a.verify_token(None, TokenScope::Write).is_ok());
        assert!(a.verify_token(Some("anything"), TokenScope::Read).is_ok());
    }
}
