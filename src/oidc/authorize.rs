//
// `/authorize` (§4.4)
//
use chrono::Duration;

use super::{resolve_client, split_scopes};
use crate::crypto;
use crate::db::models::{AuthorizationCode, Consent};
use crate::db::DbConn;
use crate::error::Error;
use crate::CONFIG;

pub struct AuthorizeRequest<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub response_type: &'a str,
    pub scope: &'a str,
    pub state: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub code_challenge: Option<&'a str>,
    pub code_challenge_method: Option<&'a str>,
}

pub enum AuthorizeOutcome {
    Redirect { redirect_uri: String, code: String, state: Option<String> },
    /// The caller must present a consent page; once the user decides,
    /// `consent::record` persists the grant and the client re-submits
    /// `/authorize` itself to get a code.
    ConsentRequired { client_id: String, scopes: Vec<String> },
}

/// `user_id` is resolved out-of-band by an interactive login the caller
/// performs before reaching this point (§4.4: "an interactive login is
/// performed out-of-band... control returns with the user id").
pub async fn authorize(req: &AuthorizeRequest<'_>, user_id: &str, conn: &DbConn) -> Result<AuthorizeOutcome, Error> {
    if req.response_type != "code" {
        return Err(Error::validation("unsupported response_type"));
    }

    let client = resolve_client(req.client_id, conn).await?;
    if !client.supports_redirect_uri(req.redirect_uri) {
        return Err(Error::validation("redirect_uri not registered for this client"));
    }

    let requested = split_scopes(req.scope);
    if !client.allows_scopes(&requested) {
        return Err(Error::validation("requested scope exceeds what this client is allowed"));
    }

    if client.pkce_required && req.code_challenge.is_none() {
        return Err(Error::validation("this client requires PKCE"));
    }
    if let Some(method) = req.code_challenge_method {
        if method != "S256" && method != "plain" {
            return Err(Error::validation("unsupported code_challenge_method"));
        }
    }

    if client.consent_required {
        let covered = Consent::find(user_id, &client.id, conn).await.is_some_and(|c| c.covers(&requested));
        if !covered {
            return Ok(AuthorizeOutcome::ConsentRequired {
                client_id: client.client_id.clone(),
                scopes: requested.into_iter().map(String::from).collect(),
            });
        }
    }

    issue_code(&client.client_id, user_id, req, conn).await
}

async fn issue_code(client_id: &str, user_id: &str, req: &AuthorizeRequest<'_>, conn: &DbConn) -> Result<AuthorizeOutcome, Error> {
    // 16 bytes of entropy, base64url-encoded — comfortably over the
    // RFC 6749 "at least 128 bits" floor named in §4.4.
    let code = crypto::generate_token(16);
    AuthorizationCode::insert(
        &code,
        client_id,
        user_id,
        req.redirect_uri,
        req.scope,
        req.nonce,
        req.code_challenge,
        req.code_challenge_method,
        Duration::seconds(CONFIG.oidc_auth_code_ttl_secs()),
        conn,
    )
    .await?;

    Ok(AuthorizeOutcome::Redirect { redirect_uri: req.redirect_uri.to_string(), code, state: req.state.map(String::from) })
}
