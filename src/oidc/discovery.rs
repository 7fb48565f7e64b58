//
// `/.well-known/openid-configuration` and `/.well-known/jwks.json` (§4.4)
//
// Both are static documents: discovery is assembled once per request
// from config and the fixed endpoint map, JWKS is a passthrough to C3.
//
use serde::Serialize;

use super::issuer;
use crate::keys::{JwkSet, KEYS};
use crate::CONFIG;

#[derive(Debug, Serialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub device_authorization_endpoint: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub claims_supported: Vec<&'static str>,
}

pub fn metadata() -> ProviderMetadata {
    let issuer = issuer();
    ProviderMetadata {
        authorization_endpoint: format!("{issuer}/oidc/authorize"),
        token_endpoint: format!("{issuer}/oidc/token"),
        userinfo_endpoint: format!("{issuer}/oidc/userinfo"),
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        introspection_endpoint: format!("{issuer}/oidc/introspect"),
        revocation_endpoint: format!("{issuer}/oidc/revoke"),
        device_authorization_endpoint: format!("{issuer}/oidc/device/code"),
        issuer,
        response_types_supported: vec!["code"],
        grant_types_supported: vec![
            "authorization_code",
            "refresh_token",
            "client_credentials",
            "urn:ietf:params:oauth:grant-type:device_code",
        ],
        subject_types_supported: vec!["public"],
        id_token_signing_alg_values_supported: vec![CONFIG.oidc_signing_algorithm()],
        scopes_supported: vec!["openid", "profile", "email", "phone", "offline_access"],
        token_endpoint_auth_methods_supported: vec!["client_secret_basic", "client_secret_post", "none"],
        code_challenge_methods_supported: vec!["S256", "plain"],
        claims_supported: vec![
            "sub",
            "preferred_username",
            "updated_at",
            "email",
            "email_verified",
            "phone_number",
            "phone_number_verified",
        ],
    }
}

pub fn jwks() -> JwkSet {
    KEYS.jwks()
}
