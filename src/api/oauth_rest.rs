//
// /.well-known/*, /oidc/* (§6, C8 OAuth/OIDC Authorization Server)
//
// `openid_configuration`/`jwks` are mounted at the root via
// `discovery_routes()`; everything else mounts under `/oidc` via
// `oauth_routes()`, matching the endpoint URLs `oidc::discovery`'s
// metadata hardcodes.
//
use std::io::Cursor;

use rocket::form::{Form, FromForm};
use rocket::http::{ContentType, Status};
use rocket::response::{self, Redirect, Responder, Response};
use rocket::serde::json::Json;
use rocket::{get, post, Request, State};
use serde::{Deserialize, Serialize};

use super::{Auth, RawBearer};
use crate::db::DbConn;
use crate::error::Error;
use crate::keys::JwkSet;
use crate::oidc::authorize::{self as authorize_mod, AuthorizeOutcome, AuthorizeRequest};
use crate::oidc::discovery::ProviderMetadata;
use crate::oidc::token::{OAuthError, OAuthErrorCode, TokenResponse};
use crate::oidc::{consent, device, discovery, introspect, token, userinfo};
use crate::redis_store::RedisStore;

impl<'r> Responder<'r, 'static> for OAuthError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = match self.error {
            "invalid_client" => Status::Unauthorized,
            _ => Status::BadRequest,
        };
        let body = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());
        Response::build().status(status).header(ContentType::JSON).sized_body(body.len(), Cursor::new(body)).ok()
    }
}

#[get("/.well-known/openid-configuration")]
pub fn openid_configuration() -> Json<ProviderMetadata> {
    Json(discovery::metadata())
}

#[get("/.well-known/jwks.json")]
pub fn jwks() -> Json<JwkSet> {
    Json(discovery::jwks())
}

#[derive(Debug, FromForm)]
pub struct AuthorizeQuery<'a> {
    client_id: &'a str,
    redirect_uri: &'a str,
    response_type: &'a str,
    scope: &'a str,
    state: Option<&'a str>,
    nonce: Option<&'a str>,
    code_challenge: Option<&'a str>,
    code_challenge_method: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ConsentRequiredResponse {
    pub consent_required: bool,
    pub client_id: String,
    pub scopes: Vec<String>,
}

/// Either a redirect carrying the issued code, or a 200 telling the
/// caller to collect consent first (§4.4).
pub enum AuthorizeResult {
    Redirect(Redirect),
    ConsentRequired(ConsentRequiredResponse),
}

impl<'r> Responder<'r, 'static> for AuthorizeResult {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        match self {
            AuthorizeResult::Redirect(r) => r.respond_to(request),
            AuthorizeResult::ConsentRequired(body) => Json(body).respond_to(request),
        }
    }
}

/// The caller is expected to have already authenticated (§4.4: "an
/// interactive login is performed out-of-band"); this gateway has no
/// browser UI of its own, so the same bearer access token every other
/// endpoint accepts stands in for that out-of-band login.
#[get("/authorize?<query..>")]
pub async fn authorize(query: AuthorizeQuery<'_>, auth: Auth, conn: DbConn) -> Result<AuthorizeResult, Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential cannot authorize"))?;
    let req = AuthorizeRequest {
        client_id: query.client_id,
        redirect_uri: query.redirect_uri,
        response_type: query.response_type,
        scope: query.scope,
        state: query.state,
        nonce: query.nonce,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
    };

    match authorize_mod::authorize(&req, user_id, &conn).await? {
        AuthorizeOutcome::Redirect { redirect_uri, code, state } => {
            let mut target = format!("{redirect_uri}?code={code}");
            if let Some(state) = state {
                target.push_str(&format!("&state={state}"));
            }
            Ok(AuthorizeResult::Redirect(Redirect::to(target)))
        }
        AuthorizeOutcome::ConsentRequired { client_id, scopes } => Ok(AuthorizeResult::ConsentRequired(ConsentRequiredResponse { consent_required: true, client_id, scopes })),
    }
}

#[derive(Debug, FromForm)]
pub struct TokenRequest<'a> {
    grant_type: &'a str,
    code: Option<&'a str>,
    redirect_uri: Option<&'a str>,
    client_id: &'a str,
    client_secret: Option<&'a str>,
    code_verifier: Option<&'a str>,
    refresh_token: Option<&'a str>,
    scope: Option<&'a str>,
    device_code: Option<&'a str>,
}

#[post("/token", data = "<form>")]
pub async fn token(form: Form<TokenRequest<'_>>, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<TokenResponse>, OAuthError> {
    let resp = match form.grant_type {
        "authorization_code" => {
            let code = form.code.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidRequest, "code is required"))?;
            let redirect_uri = form.redirect_uri.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidRequest, "redirect_uri is required"))?;
            token::authorization_code_grant(code, redirect_uri, form.client_id, form.client_secret, form.code_verifier, &conn).await?
        }
        "refresh_token" => {
            let refresh_token = form.refresh_token.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidRequest, "refresh_token is required"))?;
            token::refresh_token_grant(refresh_token, form.client_id, form.client_secret, redis.inner(), &conn).await?
        }
        "client_credentials" => token::client_credentials_grant(form.client_id, form.client_secret, form.scope, &conn).await?,
        "urn:ietf:params:oauth:grant-type:device_code" => {
            let device_code = form.device_code.ok_or_else(|| OAuthError::new(OAuthErrorCode::InvalidRequest, "device_code is required"))?;
            token::device_code_grant(device_code, form.client_id, &conn).await?
        }
        _ => return Err(OAuthError::new(OAuthErrorCode::UnsupportedGrantType, form.grant_type.to_string())),
    };
    Ok(Json(resp))
}

#[derive(Debug, FromForm)]
pub struct IntrospectRequest<'a> {
    token: &'a str,
    client_id: &'a str,
    client_secret: Option<&'a str>,
}

#[post("/introspect", data = "<form>")]
pub async fn introspect(form: Form<IntrospectRequest<'_>>, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<introspect::IntrospectionResponse>, Error> {
    let resp = introspect::introspect(form.token, form.client_id, form.client_secret, redis.inner(), &conn).await?;
    Ok(Json(resp))
}

#[derive(Debug, FromForm)]
pub struct RevokeRequest<'a> {
    token: &'a str,
    token_type_hint: Option<&'a str>,
    client_id: &'a str,
    client_secret: Option<&'a str>,
}

#[post("/revoke", data = "<form>")]
pub async fn revoke(form: Form<RevokeRequest<'_>>, redis: &State<RedisStore>, conn: DbConn) -> Result<(), Error> {
    introspect::revoke(form.token, form.token_type_hint, form.client_id, form.client_secret, redis.inner(), &conn).await
}

#[get("/userinfo")]
pub async fn userinfo(token: RawBearer, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<userinfo::UserInfo>, Error> {
    let info = userinfo::userinfo(&token.0, redis.inner(), &conn).await?;
    Ok(Json(info))
}

#[derive(Debug, FromForm)]
pub struct DeviceCodeRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub interval: i64,
    pub expires_in: i64,
}

#[post("/device/code", data = "<form>")]
pub async fn device_code(form: Form<DeviceCodeRequest<'_>>, conn: DbConn) -> Result<Json<DeviceCodeResponse>, Error> {
    let issue = device::request_code(form.client_id, form.scope, &conn).await?;
    Ok(Json(DeviceCodeResponse { device_code: issue.device_code, user_code: issue.user_code, interval: issue.interval_secs, expires_in: issue.expires_in }))
}

#[derive(Debug, FromForm)]
pub struct DeviceTokenRequest<'a> {
    device_code: &'a str,
    client_id: &'a str,
}

#[post("/device/token", data = "<form>")]
pub async fn device_token(form: Form<DeviceTokenRequest<'_>>, conn: DbConn) -> Result<Json<TokenResponse>, OAuthError> {
    let resp = token::device_code_grant(form.device_code, form.client_id, &conn).await?;
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct DeviceApproveRequest {
    pub user_code: String,
    pub approve: bool,
}

#[post("/device/approve", data = "<body>")]
pub async fn device_approve(body: Json<DeviceApproveRequest>, auth: Auth, conn: DbConn) -> Result<(), Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential cannot approve a device"))?;
    if body.approve {
        device::approve(&body.user_code, user_id, &conn).await?;
    } else {
        device::deny(&body.user_code, &conn).await?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ConsentDecisionRequest {
    pub client_id: String,
    pub scope: String,
    pub approve: bool,
}

/// Records the grant so the client's next `/authorize` call proceeds
/// straight to code issuance; a denial is simply not recorded, leaving
/// the next `/authorize` to ask again.
#[post("/consent", data = "<body>")]
pub async fn consent_decision(body: Json<ConsentDecisionRequest>, auth: Auth, conn: DbConn) -> Result<(), Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential cannot grant consent"))?;
    if body.approve {
        consent::record(user_id, &body.client_id, &body.scope, &conn).await?;
    }
    Ok(())
}
