//
// /auth/* (§6, C7 Auth State Machine)
//
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, put, State};
use serde::{Deserialize, Serialize};

use super::{Auth, PipelineCheck, RawBearer, RequestMeta};
use crate::db::models::User;
use crate::db::DbConn;
use crate::enforcement::{self, EndpointClass};
use crate::error::Error;
use crate::mail;
use crate::redis_store::RedisStore;
use crate::state_machine::{self, RequestContext, SignInOutcome, TokenPair};
use crate::util::format_date;

#[derive(Debug, Serialize)]
pub struct TokenPairDto {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl From<TokenPair> for TokenPairDto {
    fn from(p: TokenPair) -> Self {
        Self { access_token: p.access_token, refresh_token: p.refresh_token, token_type: "Bearer", expires_in: p.expires_in }
    }
}

#[derive(Debug, Serialize)]
pub struct TwoFactorChallenge {
    pub requires_2fa: bool,
    pub two_factor_token: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SignInResponse {
    Granted(TokenPairDto),
    TwoFactor(TwoFactorChallenge),
}

impl From<SignInOutcome> for SignInResponse {
    fn from(o: SignInOutcome) -> Self {
        match o {
            SignInOutcome::AccessGranted(pair) => Self::Granted(pair.into()),
            SignInOutcome::RequiresTwoFactor { two_factor_token } => Self::TwoFactor(TwoFactorChallenge { requires_2fa: true, two_factor_token }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub account_type: &'static str,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub totp_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserDto {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            username: u.username,
            phone: u.phone,
            account_type: u.account_type().as_str(),
            is_active: u.is_active,
            email_verified: u.email_verified,
            phone_verified: u.phone_verified,
            totp_enabled: u.totp_secret.is_some(),
            created_at: format_date(&u.created_at),
            updated_at: format_date(&u.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[post("/signup", data = "<body>")]
pub async fn signup(
    body: Json<SignUpRequest>,
    _pipeline: PipelineCheck,
    meta: RequestMeta,
    redis: &State<RedisStore>,
    conn: DbConn,
) -> Result<(Status, Json<TokenPairDto>), Error> {
    let key = body.email.to_lowercase();
    enforcement::check_rate_limit(redis.inner(), EndpointClass::SignUp, &key).await?;

    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: body.device_name.as_deref() };
    let pair = state_machine::sign_up(&body.email, &body.password, &ctx, redis.inner(), &conn).await?;
    Ok((Status::Created, Json(pair.into())))
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub identifier: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[post("/signin", data = "<body>")]
pub async fn signin(body: Json<SignInRequest>, _pipeline: PipelineCheck, meta: RequestMeta, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<SignInResponse>, Error> {
    let key = body.identifier.to_lowercase();
    enforcement::check_rate_limit(redis.inner(), EndpointClass::SignIn, &key).await?;

    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: body.device_name.as_deref() };
    let outcome = state_machine::sign_in(&body.identifier, &body.password, &ctx, redis.inner(), &conn).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct SamlSignInRequest {
    pub assertion: String,
}

/// Accepts an already-issued SAML assertion in place of a password
/// (A4); the identity provider did the authenticating.
#[post("/signin/saml", data = "<body>")]
pub async fn saml_signin(body: Json<SamlSignInRequest>, _pipeline: PipelineCheck, meta: RequestMeta, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<SignInResponse>, Error> {
    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: None };
    let outcome = state_machine::sign_in_with_saml_assertion(&body.assertion, &ctx, redis.inner(), &conn).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[post("/refresh", data = "<body>")]
pub async fn refresh(body: Json<RefreshRequest>, _pipeline: PipelineCheck, meta: RequestMeta, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<TokenPairDto>, Error> {
    enforcement::check_rate_limit(redis.inner(), EndpointClass::Refresh, &body.refresh_token).await?;

    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: None };
    let pair = state_machine::refresh(&body.refresh_token, &ctx, redis.inner(), &conn).await?;
    Ok(Json(pair.into()))
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[post("/logout", data = "<body>")]
pub async fn logout(body: Json<LogoutRequest>, token: RawBearer, redis: &State<RedisStore>, conn: DbConn) -> Result<(), Error> {
    state_machine::logout(&token.0, &body.refresh_token, redis.inner(), &conn).await
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[post("/change-password", data = "<body>")]
pub async fn change_password(body: Json<ChangePasswordRequest>, auth: Auth, redis: &State<RedisStore>, conn: DbConn) -> Result<(), Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential cannot change a password"))?;
    state_machine::change_password(user_id, &body.old_password, &body.new_password, None, redis.inner(), &conn).await
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequestBody {
    pub email: String,
}

/// Always 200 regardless of whether `email` is known (§6 enumeration
/// defense); the plaintext code is handed to the mailer when an account
/// was in fact found.
#[post("/password/reset/request", data = "<body>")]
pub async fn password_reset_request(body: Json<PasswordResetRequestBody>, conn: DbConn) -> Result<(), Error> {
    if let Some(code) = state_machine::password_reset_request(&body.email, &conn).await? {
        if let Err(e) = mail::notifier().send_password_reset_code(&body.email, &code).await {
            warn!("Failed to deliver password reset code: {:?}", e);
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetCompleteRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[post("/password/reset/complete", data = "<body>")]
pub async fn password_reset_complete(body: Json<PasswordResetCompleteRequest>, redis: &State<RedisStore>, conn: DbConn) -> Result<(), Error> {
    state_machine::password_reset_complete(&body.email, &body.code, &body.new_password, redis.inner(), &conn).await
}

#[derive(Debug, Deserialize)]
pub struct PasswordlessRequestBody {
    pub identifier: String,
}

#[post("/passwordless/request", data = "<body>")]
pub async fn passwordless_request(body: Json<PasswordlessRequestBody>, conn: DbConn) -> Result<(), Error> {
    let code = state_machine::passwordless_request(&body.identifier, &conn).await?;
    if let Err(e) = mail::notifier().send_passwordless_code(&body.identifier, &code).await {
        warn!("Failed to deliver passwordless code: {:?}", e);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PasswordlessVerifyRequest {
    pub identifier: String,
    pub code: String,
    pub device_name: Option<String>,
}

#[post("/passwordless/verify", data = "<body>")]
pub async fn passwordless_verify(body: Json<PasswordlessVerifyRequest>, meta: RequestMeta, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<TokenPairDto>, Error> {
    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: body.device_name.as_deref() };
    let pair = state_machine::passwordless_verify(&body.identifier, &body.code, &ctx, redis.inner(), &conn).await?;
    Ok(Json(pair.into()))
}

#[derive(Debug, Serialize)]
pub struct TotpSetupResponse {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

#[post("/2fa/setup")]
pub async fn two_factor_setup(auth: Auth, conn: DbConn) -> Result<Json<TotpSetupResponse>, Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no 2fa"))?;
    let user = User::find_by_id(user_id, &conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    let setup = state_machine::totp_setup(&user);
    Ok(Json(TotpSetupResponse { secret_base32: setup.secret_base32, otpauth_uri: setup.otpauth_uri }))
}

#[derive(Debug, Deserialize)]
pub struct TotpVerifyRequest {
    pub secret_base32: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TotpVerifyResponse {
    pub backup_codes: Vec<String>,
}

#[post("/2fa/verify", data = "<body>")]
pub async fn two_factor_verify(body: Json<TotpVerifyRequest>, auth: Auth, conn: DbConn) -> Result<Json<TotpVerifyResponse>, Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no 2fa"))?;
    let backup_codes = state_machine::totp_confirm(user_id, &body.secret_base32, &body.code, &conn).await?;
    Ok(Json(TotpVerifyResponse { backup_codes }))
}

#[derive(Debug, Deserialize)]
pub struct TotpDisableRequest {
    pub password: String,
}

#[post("/2fa/disable", data = "<body>")]
pub async fn two_factor_disable(body: Json<TotpDisableRequest>, auth: Auth, conn: DbConn) -> Result<(), Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no 2fa"))?;
    state_machine::totp_disable(user_id, &body.password, &conn).await
}

#[derive(Debug, Deserialize)]
pub struct TotpLoginVerifyRequest {
    pub two_factor_token: String,
    pub code: String,
    pub device_name: Option<String>,
}

#[post("/2fa/login/verify", data = "<body>")]
pub async fn two_factor_login_verify(body: Json<TotpLoginVerifyRequest>, meta: RequestMeta, redis: &State<RedisStore>, conn: DbConn) -> Result<Json<TokenPairDto>, Error> {
    let ctx = RequestContext { ip: meta.ip.as_deref(), user_agent: meta.user_agent.as_deref(), device_name: body.device_name.as_deref() };
    let pair = state_machine::verify_two_factor(&body.two_factor_token, &body.code, &ctx, redis.inner(), &conn).await?;
    Ok(Json(pair.into()))
}

#[get("/profile")]
pub async fn get_profile(auth: Auth, conn: DbConn) -> Result<Json<UserDto>, Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no profile"))?;
    let user = User::find_by_id(user_id, &conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct PutProfileRequest {
    pub username: Option<String>,
    pub phone: Option<String>,
}

#[put("/profile", data = "<body>")]
pub async fn put_profile(body: Json<PutProfileRequest>, auth: Auth, conn: DbConn) -> Result<Json<UserDto>, Error> {
    let user_id = auth.0.user_id().ok_or_else(|| Error::forbidden("this credential has no profile"))?;
    let mut user = User::find_by_id(user_id, &conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    if let Some(username) = &body.username {
        user.username = Some(username.clone());
    }
    if let Some(phone) = &body.phone {
        user.phone = Some(phone.clone());
    }
    user.save(&conn).await?;
    Ok(Json(user.into()))
}
