//
// OAuth/OIDC Authorization Server (C8)
//
// Implements the RFC 6749 / OIDC Core server role: `/authorize` issues
// codes, `/token` multiplexes grant types, `/introspect` and `/revoke`
// operate on any token shape, the device flow is a separate poll loop,
// and discovery/JWKS are static documents assembled from C3 and config.
//
pub mod authorize;
pub mod consent;
pub mod device;
pub mod discovery;
pub mod introspect;
pub mod token;
pub mod userinfo;

use crate::crypto;
use crate::db::models::OAuthClient;
use crate::db::DbConn;
use crate::error::Error;
use crate::CONFIG;

pub(crate) fn split_scopes(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

pub(crate) fn issuer() -> String {
    CONFIG.oidc_issuer().unwrap_or_default()
}

pub(crate) async fn resolve_client(client_id: &str, conn: &DbConn) -> Result<OAuthClient, Error> {
    OAuthClient::find_by_client_id(client_id, conn).await.ok_or_else(|| Error::validation("unknown client"))
}

/// Checks a client_secret against the stored hash. Public clients (no
/// stored secret) always fail this — they authenticate by PKCE alone.
pub(crate) fn authenticate_client(client: &OAuthClient, client_secret: Option<&str>) -> bool {
    match (&client.client_secret_hash, client_secret) {
        (Some(hash), Some(secret)) => crypto::ct_eq(crypto::sha256_hex(secret.as_bytes()), hash),
        (None, _) if client.is_public => true,
        _ => false,
    }
}

/// RFC 7636 §4.6: `S256` compares the base64url-SHA256 of the verifier
/// against the captured challenge; `plain` (or any other captured
/// method — `/authorize` only ever persists one of the two) compares
/// the verifier directly.
pub(crate) fn verify_pkce(verifier: &str, challenge: &str, method: &str) -> bool {
    if method == "S256" {
        crypto::ct_eq(crypto::sha256_base64url(verifier.as_bytes()), challenge)
    } else {
        crypto::ct_eq(verifier, challenge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_scopes_collapses_whitespace() {
        assert_eq!(split_scopes("openid  profile\temail"), vec!["openid", "profile", "email"]);
        assert_eq!(split_scopes(""), Vec::<&str>::new());
    }

    #[test]
    fn s256_pkce_matches_correct_verifier_only() {
        let challenge = crypto::sha256_base64url(b"the-verifier");
        assert!(verify_pkce("the-verifier", &challenge, "S256"));
        assert!(!verify_pkce("wrong-verifier", &challenge, "S256"));
    }

    #[test]
    fn plain_pkce_compares_verifier_directly() {
        assert!(verify_pkce("abc123", "abc123", "plain"));
        assert!(!verify_pkce("abc123", "xyz789", "plain"));
    }

    fn client(secret_hash: Option<&str>, is_public: bool) -> OAuthClient {
        OAuthClient {
            id: "client-row-1".into(),
            client_id: "client-1".into(),
            client_secret_hash: secret_hash.map(str::to_string),
            redirect_uris: "https://example.com/cb".into(),
            grant_types: "authorization_code".into(),
            allowed_scopes: "openid".into(),
            pkce_required: false,
            is_public,
            consent_required: true,
            owner_user_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn confidential_client_needs_matching_secret() {
        let hash = crypto::sha256_hex(b"s3cret");
        let c = client(Some(&hash), false);
        assert!(authenticate_client(&c, Some("s3cret")));
        assert!(!authenticate_client(&c, Some("wrong")));
        assert!(!authenticate_client(&c, None));
    }

    #[test]
    fn public_client_authenticates_without_a_secret() {
        let c = client(None, true);
        assert!(authenticate_client(&c, None));
    }

    #[test]
    fn confidential_client_without_stored_hash_never_authenticates() {
        let c = client(None, false);
        assert!(!authenticate_client(&c, None));
        assert!(!authenticate_client(&c, Some("anything")));
    }
}
