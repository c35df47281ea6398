use crate::domain_model::UserId;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(..{})", tail(&self.0))
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshToken(..{})", tail(&self.0))
    }
}

fn tail(token: &str) -> &str {
    let start = token
        .char_indices()
        .rev()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &token[start..]
}

/// Claims carried by an access token, decoded for display only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

impl AccessToken {
    /// Reads the JWT payload without checking the signature. The server stays
    /// the only authority on whether the token is valid.
    pub fn claims(&self) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<TokenClaims>(&self.0, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }
}

/// Token pair handed out by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

/// The one set of credentials a client instance holds.
///
/// `epoch` moves forward whenever the session is replaced or destroyed, so a
/// refresh that started under an older session can tell it has been overtaken.
#[derive(Debug, Clone, Default)]
pub struct Session {
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
    epoch: u64,
}

impl Session {
    pub fn new(access: Option<AccessToken>, refresh: Option<RefreshToken>) -> Self {
        Session {
            access,
            refresh,
            epoch: 0,
        }
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }

    pub fn set(&mut self, pair: TokenPair) {
        self.access = Some(pair.access);
        self.refresh = Some(pair.refresh);
        self.epoch += 1;
    }

    /// Applies a refresh result. The refresh token is kept when the server
    /// does not rotate it.
    pub fn rotate(&mut self, access: AccessToken, refresh: Option<RefreshToken>) {
        self.access = Some(access);
        if let Some(refresh) = refresh {
            self.refresh = Some(refresh);
        }
    }

    pub fn clear(&mut self) {
        self.access = None;
        self.refresh = None;
        self.epoch += 1;
    }
}
