//! Caller identity.
//!
//! The backend does not authorize anything; it only decides whether a bearer
//! token belongs to a known caller when guest access is turned off.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::TokenConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn get_identity(&self, token: Option<&str>) -> Option<Identity>;
}

/// Accepts the tokens listed under `auth.tokens` in the configuration file.
#[derive(Clone, Default)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: &[TokenConfig]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| (t.token.clone(), t.subject.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityApi for StaticTokenIdentity {
    async fn get_identity(&self, token: Option<&str>) -> Option<Identity> {
        let subject = self.tokens.get(token?)?;
        Some(Identity {
            subject: subject.clone(),
        })
    }
}

/// Extracts `<token>` from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
