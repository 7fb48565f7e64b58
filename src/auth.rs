//
// Token Service (C4)
//
// Two token families, both built on `jsonwebtoken`: internal session
// tokens (HS256, §4.2a) and OIDC tokens (RS256/ES256 via C3, §4.2b).
//
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::error::Error;
use crate::keys::KEYS;
use crate::util::get_uuid;
use crate::CONFIG;

const INTERNAL_ALGORITHM: Algorithm = Algorithm::HS256;

//
// Internal session tokens
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub username: Option<String>,
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Shares the access claim shape; distinguished from a normal access
/// token only by its short TTL (§4.2a) — callers must not accept one
/// where an access token is expected.
pub type TwoFactorClaims = AccessClaims;

fn now_parts(ttl: Duration) -> (i64, i64, i64) {
    let now = Utc::now();
    (now.timestamp(), now.timestamp(), (now + ttl).timestamp())
}

fn encode_internal<T: Serialize>(claims: &T, secret: &str) -> Result<String, Error> {
    jsonwebtoken::encode(&Header::new(INTERNAL_ALGORITHM), claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(Error::from)
}

fn decode_internal<T: serde::de::DeserializeOwned>(token: &str, secret: &str) -> Result<T, Error> {
    let mut validation = Validation::new(INTERNAL_ALGORITHM);
    validation.validate_aud = false;
    validation.leeway = 0;
    jsonwebtoken::decode::<T>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::token_expired(),
            _ => Error::from(e).with_msg("invalid_token"),
        })
}

pub fn encode_access_token(user: &User, roles: &[String]) -> Result<(String, String), Error> {
    let jti = get_uuid();
    let (iat, nbf, exp) = now_parts(Duration::seconds(CONFIG.jwt_access_expires_secs()));
    let claims = AccessClaims {
        sub: user.id.clone(),
        email: user.email.clone(),
        username: user.username.clone(),
        roles: roles.to_vec(),
        jti: jti.clone(),
        iat,
        nbf,
        exp,
    };
    let token = encode_internal(&claims, &CONFIG.jwt_access_secret())?;
    Ok((token, jti))
}

pub fn encode_two_factor_token(user: &User, roles: &[String]) -> Result<(String, String), Error> {
    let jti = get_uuid();
    let (iat, nbf, exp) = now_parts(Duration::seconds(CONFIG.two_factor_token_expires_secs()));
    let claims: TwoFactorClaims = AccessClaims {
        sub: user.id.clone(),
        email: user.email.clone(),
        username: user.username.clone(),
        roles: roles.to_vec(),
        jti: jti.clone(),
        iat,
        nbf,
        exp,
    };
    // Signed with the access secret, not the refresh secret — a two-factor
    // token is never eligible for rotation.
    let token = encode_internal(&claims, &CONFIG.jwt_access_secret())?;
    Ok((token, jti))
}

/// Returns the encoded refresh JWT, its jti, and its expiry — callers
/// persist the jti/expiry pair as a `RefreshToken` record (C1).
pub fn encode_refresh_token(user_id: &str) -> Result<(String, String, chrono::NaiveDateTime), Error> {
    let jti = get_uuid();
    let ttl = Duration::seconds(CONFIG.jwt_refresh_expires_secs());
    let (iat, nbf, exp) = now_parts(ttl);
    let claims = RefreshClaims {
        sub: user_id.to_string(),
        jti: jti.clone(),
        iat,
        nbf,
        exp,
    };
    let token = encode_internal(&claims, &CONFIG.jwt_refresh_secret())?;
    let expires_at = (Utc::now() + ttl).naive_utc();
    Ok((token, jti, expires_at))
}

pub fn decode_access_token(token: &str) -> Result<AccessClaims, Error> {
    decode_internal(token, &CONFIG.jwt_access_secret())
}

pub fn decode_two_factor_token(token: &str) -> Result<TwoFactorClaims, Error> {
    decode_internal(token, &CONFIG.jwt_access_secret())
}

pub fn decode_refresh_token(token: &str) -> Result<RefreshClaims, Error> {
    decode_internal(token, &CONFIG.jwt_refresh_secret())
}

//
// OIDC tokens (RS256/ES256, signed and verified by C3)
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub auth_time: i64,
    pub azp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcAccessClaims {
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub aud: String,
    pub client_id: String,
    pub scope: String,
    pub roles: Vec<String>,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub token_type: String,
}

pub fn encode_oidc_id_token(claims: &IdTokenClaims) -> Result<String, Error> {
    KEYS.sign(claims).map(|(token, _kid)| token)
}

pub fn encode_oidc_access_token(claims: &OidcAccessClaims) -> Result<String, Error> {
    KEYS.sign(claims).map(|(token, _kid)| token)
}

pub fn decode_oidc_access_token(token: &str, issuer: &str) -> Result<OidcAccessClaims, Error> {
    KEYS.verify(token, None, issuer)
}

/// An OIDC refresh token carries the issuing client and granted scope
/// alongside `sub` so rotation (§4.4) can check "client owns it" and
/// reissue the same scope without a schema change to `refresh_tokens`
/// — the jti is still the primary key there, shared with the internal-
/// token family's rotation/blacklist path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcRefreshClaims {
    pub sub: String,
    pub client_id: String,
    pub scope: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

pub fn encode_oidc_refresh_token(user_id: &str, client_id: &str, scope: &str) -> Result<(String, String, chrono::NaiveDateTime), Error> {
    let jti = get_uuid();
    let ttl = Duration::seconds(CONFIG.oidc_refresh_token_ttl_secs());
    let (iat, nbf, exp) = now_parts(ttl);
    let claims = OidcRefreshClaims {
        sub: user_id.to_string(),
        client_id: client_id.to_string(),
        scope: scope.to_string(),
        jti: jti.clone(),
        iat,
        nbf,
        exp,
    };
    let token = encode_internal(&claims, &CONFIG.jwt_refresh_secret())?;
    let expires_at = (Utc::now() + ttl).naive_utc();
    Ok((token, jti, expires_at))
}

pub fn decode_oidc_refresh_token(token: &str) -> Result<OidcRefreshClaims, Error> {
    decode_internal(token, &CONFIG.jwt_refresh_secret())
}

//
// Credential shape resolved by the enforcement pipeline's credential
// resolver (C9) and handed to the RBAC check.
//
#[derive(Debug, Clone)]
pub enum Credential {
    User { user_id: String, roles: Vec<String>, jti: String },
    ApiKey { user_id: String, scopes: Vec<String>, key_id: String },
    Application { application_id: String },
}

impl Credential {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Credential::User { user_id, .. } | Credential::ApiKey { user_id, .. } => Some(user_id),
            Credential::Application { .. } => None,
        }
    }
}

pub fn parse_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn expired_internal_token_is_rejected() {
        let claims = Claims {
            sub: "user-1".into(),
            exp: (Utc::now() - Duration::seconds(60)).timestamp(),
        };
        let token = encode_internal(&claims, "test-secret-at-least-32-bytes!!").unwrap();
        let err = decode_internal::<Claims>(&token, "test-secret-at-least-32-bytes!!").unwrap_err();
        assert!(matches!(err, Error::TokenExpiredError(..)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = Claims {
            sub: "user-1".into(),
            exp: (Utc::now() + Duration::seconds(60)).timestamp(),
        };
        let token = encode_internal(&claims, "test-secret-at-least-32-bytes!!").unwrap();
        let err = decode_internal::<Claims>(&token, "a-completely-different-secret!!").unwrap_err();
        assert!(matches!(err, Error::JwtError(..)));
    }

    #[test]
    fn parse_bearer_strips_prefix() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("abc.def.ghi"), None);
    }
}
