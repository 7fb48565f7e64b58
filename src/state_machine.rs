//
// Auth State Machine (C7)
//
// Sign-up, sign-in, 2FA challenge, passwordless OTP, refresh rotation,
// logout, and password change/reset — the transitions from Anonymous
// to AccessGranted/Rejected. Every failure collapses to a single
// `unauthenticated` client-facing outcome; the distinct cause is only
// ever visible in the audit log.
//
use chrono::Duration;

use crate::auth;
use crate::blacklist;
use crate::crypto;
use crate::db::models::{AccountType, AuditEntry, BackupCode, Otp, RefreshToken, Role, Session, User};
use crate::db::DbConn;
use crate::error::Error;
use crate::ldap::{self, AssertionVerifier, DirectoryBind};
use crate::redis_store::RedisStore;
use crate::session;
use crate::totp;
use crate::CONFIG;

const DEFAULT_ROLE: &str = "user";
const PURPOSE_PASSWORDLESS: &str = "passwordless";
const PURPOSE_PASSWORD_RESET: &str = "password_reset";

pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub enum SignInOutcome {
    AccessGranted(TokenPair),
    RequiresTwoFactor { two_factor_token: String },
}

/// Request-scoped metadata attached to the issued refresh-token record
/// and session (§3), and compared against on a strict-binding refresh.
pub struct RequestContext<'a> {
    pub ip: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub device_name: Option<&'a str>,
}

pub struct TotpSetup {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

fn check_password_policy(password: &str) -> Result<(), Error> {
    if password.len() < CONFIG.password_min_length() {
        return Err(Error::validation(format!("password must be at least {} characters", CONFIG.password_min_length())));
    }
    if !password.chars().any(|c| c.is_alphabetic()) || !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::validation("password must contain at least one letter and one digit"));
    }
    Ok(())
}

fn totp_encryption_key() -> Result<[u8; 32], Error> {
    let raw = data_encoding::BASE64
        .decode(CONFIG.totp_encryption_key().as_bytes())
        .map_err(|e| Error::new(format!("invalid TOTP_ENCRYPTION_KEY: {e}")))?;
    raw.try_into().map_err(|_| Error::new("TOTP_ENCRYPTION_KEY must decode to 32 bytes"))
}

async fn assign_default_role(user_id: &str, conn: &DbConn) -> Result<Vec<String>, Error> {
    if let Some(role) = Role::find_by_name(DEFAULT_ROLE, conn).await {
        Role::assign_to_user(&role.id, user_id, conn).await?;
    }
    Role::names_for_user(user_id, conn).await
}

/// Mints an access/refresh pair, persists the refresh-token record and
/// its paired session, and enforces `max_active_sessions` (§4.6).
async fn issue_token_pair(
    user: &User,
    roles: &[String],
    ip: Option<&str>,
    user_agent: Option<&str>,
    device_name: Option<&str>,
    redis: &RedisStore,
    conn: &DbConn,
) -> Result<TokenPair, Error> {
    let (access_token, _access_jti) = auth::encode_access_token(user, roles)?;
    let (refresh_token, jti, expires_at) = auth::encode_refresh_token(&user.id)?;
    let token_hash = crypto::sha256_hex(refresh_token.as_bytes());

    let mut record = RefreshToken::new(
        &jti,
        &user.id,
        &token_hash,
        ip.map(String::from),
        user_agent.map(String::from),
        Duration::seconds(CONFIG.jwt_refresh_expires_secs()),
    );
    record.expires_at = expires_at;
    record.insert(conn).await?;

    Session::insert(&user.id, &jti, device_name, ip, user_agent, conn).await?;
    session::trim_to_cap(redis, &user.id, conn).await?;

    Ok(TokenPair { access_token, refresh_token, expires_in: CONFIG.jwt_access_expires_secs() })
}

pub async fn sign_up(email: &str, password: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<TokenPair, Error> {
    if !email_address::EmailAddress::is_valid(email) {
        return Err(Error::validation("not a valid email address"));
    }
    check_password_policy(password)?;
    if User::find_by_email(email, conn).await.is_some() {
        return Err(Error::conflict("an account with this email already exists"));
    }

    let password_hash = crypto::hash_password(password, CONFIG.bcrypt_cost())?;
    let user = User::new(email, &password_hash, AccountType::Human);
    user.insert(conn).await?;

    let roles = assign_default_role(&user.id, conn).await?;
    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, ctx.device_name, redis, conn).await?;
    AuditEntry::record(Some(&user.id), "sign_up", "success", ctx.ip, None, conn).await.ok();
    Ok(pair)
}

pub async fn sign_in(identifier: &str, password: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<SignInOutcome, Error> {
    let user = match User::find_by_identifier(identifier, conn).await {
        Some(u) => u,
        None => {
            // No user to compare against — run the same bcrypt work anyway so
            // a lookup miss costs about what a wrong-password hit costs.
            crypto::dummy_password_check(CONFIG.bcrypt_cost());
            AuditEntry::record(None, "sign_in", "unknown_identifier", ctx.ip, None, conn).await.ok();
            err_unauthenticated!("invalid credentials");
        }
    };

    let password_ok = crypto::verify_password(password, &user.password_hash) || (CONFIG.ldap_enabled() && ldap_bind_matches(identifier, password, &user).await);

    if !password_ok {
        AuditEntry::record(Some(&user.id), "sign_in", "bad_password", ctx.ip, None, conn).await.ok();
        err_unauthenticated!("invalid credentials");
    }

    if !user.is_active {
        AuditEntry::record(Some(&user.id), "sign_in", "inactive_account", ctx.ip, None, conn).await.ok();
        err_unauthenticated!("invalid credentials");
    }

    let roles = Role::names_for_user(&user.id, conn).await?;

    if user.totp_enabled() {
        let (two_factor_token, _jti) = auth::encode_two_factor_token(&user, &roles)?;
        AuditEntry::record(Some(&user.id), "sign_in", "requires_2fa", ctx.ip, None, conn).await.ok();
        return Ok(SignInOutcome::RequiresTwoFactor { two_factor_token });
    }

    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, ctx.device_name, redis, conn).await?;
    AuditEntry::record(Some(&user.id), "sign_in", "success", ctx.ip, None, conn).await.ok();
    Ok(SignInOutcome::AccessGranted(pair))
}

/// SAML-asserted identity (A4): the identity provider has already proven
/// the credential, so this skips the password check entirely but still
/// applies the same active-account and 2FA gates `sign_in` does.
pub async fn sign_in_with_saml_assertion(assertion_xml: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<SignInOutcome, Error> {
    let identity = ldap::SamlAssertionVerifier.verify(assertion_xml)?;
    let user = User::find_by_email(&identity.email, conn).await.ok_or_else(|| Error::unauthenticated("no local account for this assertion"))?;

    if !user.is_active {
        AuditEntry::record(Some(&user.id), "sign_in", "inactive_account", ctx.ip, None, conn).await.ok();
        err_unauthenticated!("invalid credentials");
    }

    let roles = Role::names_for_user(&user.id, conn).await?;

    if user.totp_enabled() {
        let (two_factor_token, _jti) = auth::encode_two_factor_token(&user, &roles)?;
        AuditEntry::record(Some(&user.id), "sign_in", "requires_2fa", ctx.ip, None, conn).await.ok();
        return Ok(SignInOutcome::RequiresTwoFactor { two_factor_token });
    }

    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, ctx.device_name, redis, conn).await?;
    AuditEntry::record(Some(&user.id), "sign_in", "success", ctx.ip, None, conn).await.ok();
    Ok(SignInOutcome::AccessGranted(pair))
}

/// A directory-backed shadow account has no usable local password, so a
/// local bcrypt mismatch falls through here before being treated as a
/// rejection. Only consulted for identifiers that already resolved to a
/// local user, so a wrong identifier never leaks into an LDAP bind
/// attempt.
async fn ldap_bind_matches(identifier: &str, password: &str, user: &User) -> bool {
    match ldap::LdapBind.bind(identifier, password).await {
        Ok(identity) => identity.email.eq_ignore_ascii_case(&user.email),
        Err(_) => false,
    }
}

/// Accepts either a live TOTP code (window ±1 step) or an unused backup
/// code, consumed atomically with the authentication (§4.3).
pub async fn verify_two_factor(two_factor_token: &str, code: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<TokenPair, Error> {
    let claims = auth::decode_two_factor_token(two_factor_token)?;
    let user = User::find_by_id(&claims.sub, conn).await.ok_or_else(|| Error::unauthenticated("invalid two-factor token"))?;

    let matched_step = match &user.totp_secret {
        Some(sealed) => totp_encryption_key().ok().and_then(|key| crypto::decrypt_secret(sealed, &key).ok()).and_then(|secret| totp::matching_step(&secret, code)),
        None => None,
    };
    let totp_ok = match matched_step {
        Some(step) => User::try_consume_totp_step(&user.id, step, conn).await?,
        None => false,
    };

    let backup_ok = if totp_ok {
        false
    } else {
        let presented_hash = crypto::sha256_hex(code.as_bytes());
        let mut consumed = false;
        for backup in BackupCode::unused_for_user(&user.id, conn).await? {
            if crypto::ct_eq(&backup.code_hash, &presented_hash) && BackupCode::try_consume(&backup.id, conn).await? {
                consumed = true;
                break;
            }
        }
        consumed
    };

    if !totp_ok && !backup_ok {
        AuditEntry::record(Some(&user.id), "verify_2fa", "rejected", ctx.ip, None, conn).await.ok();
        err_unauthenticated!("invalid two-factor code");
    }

    let roles = Role::names_for_user(&user.id, conn).await?;
    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, ctx.device_name, redis, conn).await?;
    AuditEntry::record(Some(&user.id), "verify_2fa", "success", ctx.ip, None, conn).await.ok();
    Ok(pair)
}

/// Refresh rotation (§5 ordering): validate, blacklist the presented
/// token (persistent write mandatory, ephemeral best-effort), then mint
/// a fresh pair. The old refresh record and its session are revoked
/// before the new pair is issued, so a failure past this point still
/// leaves a consistent, if less convenient, outcome: re-authenticate.
pub async fn refresh(presented_refresh_token: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<TokenPair, Error> {
    let claims = auth::decode_refresh_token(presented_refresh_token)?;

    if blacklist::is_revoked(redis, &claims.jti, conn).await? {
        err_unauthenticated!("refresh token revoked");
    }

    let record = RefreshToken::find_by_id(&claims.jti, conn).await.ok_or_else(|| Error::unauthenticated("refresh token not recognized"))?;
    let presented_hash = crypto::sha256_hex(presented_refresh_token.as_bytes());
    if !record.is_valid(&presented_hash) {
        err_unauthenticated!("refresh token invalid");
    }

    if CONFIG.strict_token_binding() && (record.ip.as_deref() != ctx.ip || record.user_agent.as_deref() != ctx.user_agent) {
        AuditEntry::record(Some(&record.user_id), "refresh", "rejected_binding_mismatch", ctx.ip, None, conn).await.ok();
        err_unauthenticated!("refresh token binding mismatch");
    }

    blacklist::revoke(redis, &record.id, Some(&record.user_id), record.expires_at, conn).await?;
    RefreshToken::revoke(&record.id, conn).await?;

    let old_session = Session::find_by_refresh_token_id(&record.id, conn).await;
    if let Some(s) = &old_session {
        Session::revoke(&s.id, conn).await?;
    }
    let device_name = ctx.device_name.or_else(|| old_session.as_ref().and_then(|s| s.device_name.as_deref()));

    let user = User::find_by_id(&record.user_id, conn).await.ok_or_else(|| Error::unauthenticated("user not found"))?;
    let roles = Role::names_for_user(&user.id, conn).await?;
    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, device_name, redis, conn).await?;

    AuditEntry::record(Some(&user.id), "refresh", "success", ctx.ip, None, conn).await.ok();
    Ok(pair)
}

/// Idempotent: tokens that fail to decode are silently skipped rather
/// than rejected, since a client logging out with an already-expired
/// token is still a successful logout from its point of view.
pub async fn logout(access_token: &str, refresh_token: &str, redis: &RedisStore, conn: &DbConn) -> Result<(), Error> {
    if let Ok(claims) = auth::decode_access_token(access_token) {
        let exp = chrono::DateTime::from_timestamp(claims.exp, 0).map(|d| d.naive_utc()).unwrap_or_else(|| chrono::Utc::now().naive_utc());
        blacklist::revoke(redis, &claims.jti, Some(&claims.sub), exp, conn).await?;
    }

    if let Ok(rclaims) = auth::decode_refresh_token(refresh_token) {
        if let Some(record) = RefreshToken::find_by_id(&rclaims.jti, conn).await {
            blacklist::revoke(redis, &record.id, Some(&record.user_id), record.expires_at, conn).await?;
            RefreshToken::revoke(&record.id, conn).await?;
            if let Some(s) = Session::find_by_refresh_token_id(&record.id, conn).await {
                Session::revoke(&s.id, conn).await?;
            }
        }
    }

    Ok(())
}

/// Revokes every other session for the user, per the state diagram's
/// "revoke all sessions save current".
pub async fn change_password(user_id: &str, old_password: &str, new_password: &str, current_session_id: Option<&str>, redis: &RedisStore, conn: &DbConn) -> Result<(), Error> {
    let mut user = User::find_by_id(user_id, conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    if !crypto::verify_password(old_password, &user.password_hash) {
        err_unauthenticated!("incorrect password");
    }
    check_password_policy(new_password)?;

    user.password_hash = crypto::hash_password(new_password, CONFIG.bcrypt_cost())?;
    user.security_stamp = crate::util::get_uuid();
    user.save(conn).await?;

    session::revoke_all_for_user(redis, user_id, current_session_id, conn).await?;
    AuditEntry::record(Some(user_id), "change_password", "success", None, None, conn).await.ok();
    Ok(())
}

/// Always succeeds regardless of whether `email` belongs to an account
/// (enumeration defense, §6). Returns the plaintext code for the caller
/// to deliver by mail when, and only when, an account was found —
/// the uniform response to the client is the caller's responsibility.
pub async fn password_reset_request(email: &str, conn: &DbConn) -> Result<Option<String>, Error> {
    if User::find_by_email(email, conn).await.is_none() {
        return Ok(None);
    }
    let code = crypto::generate_otp(CONFIG.otp_digits())?;
    let code_hash = crypto::hmac_sign(CONFIG.otp_hmac_secret().as_bytes(), &code);
    Otp::insert(email, PURPOSE_PASSWORD_RESET, &code_hash, Duration::seconds(CONFIG.otp_ttl_secs()), conn).await?;
    Ok(Some(code))
}

pub async fn password_reset_complete(email: &str, code: &str, new_password: &str, redis: &RedisStore, conn: &DbConn) -> Result<(), Error> {
    let otp = Otp::find_active(email, PURPOSE_PASSWORD_RESET, conn).await.ok_or_else(|| Error::unauthenticated("invalid or expired code"))?;
    let presented_hash = crypto::hmac_sign(CONFIG.otp_hmac_secret().as_bytes(), code);
    if !crypto::ct_eq(&otp.code_hash, &presented_hash) || !Otp::try_consume(&otp.id, conn).await? {
        err_unauthenticated!("invalid or expired code");
    }

    check_password_policy(new_password)?;
    let mut user = User::find_by_email(email, conn).await.ok_or_else(|| Error::unauthenticated("invalid or expired code"))?;
    user.password_hash = crypto::hash_password(new_password, CONFIG.bcrypt_cost())?;
    user.security_stamp = crate::util::get_uuid();
    user.save(conn).await?;

    session::revoke_all_for_user(redis, &user.id, None, conn).await?;
    AuditEntry::record(Some(&user.id), "password_reset_complete", "success", None, None, conn).await.ok();
    Ok(())
}

/// Issues a passwordless OTP unconditionally — unlike password reset,
/// the state diagram doesn't call for hiding whether `identifier` has
/// an account at this step; `passwordless_verify` is where a miss ends
/// up indistinguishable from a wrong code.
pub async fn passwordless_request(identifier: &str, conn: &DbConn) -> Result<String, Error> {
    let code = crypto::generate_otp(CONFIG.otp_digits())?;
    let code_hash = crypto::hmac_sign(CONFIG.otp_hmac_secret().as_bytes(), &code);
    Otp::insert(identifier, PURPOSE_PASSWORDLESS, &code_hash, Duration::seconds(CONFIG.otp_ttl_secs()), conn).await?;
    Ok(code)
}

pub async fn passwordless_verify(identifier: &str, code: &str, ctx: &RequestContext<'_>, redis: &RedisStore, conn: &DbConn) -> Result<TokenPair, Error> {
    let otp = Otp::find_active(identifier, PURPOSE_PASSWORDLESS, conn).await.ok_or_else(|| Error::unauthenticated("invalid or expired code"))?;
    let presented_hash = crypto::hmac_sign(CONFIG.otp_hmac_secret().as_bytes(), code);
    if !crypto::ct_eq(&otp.code_hash, &presented_hash) || !Otp::try_consume(&otp.id, conn).await? {
        err_unauthenticated!("invalid or expired code");
    }

    let user = User::find_by_identifier(identifier, conn).await.ok_or_else(|| Error::unauthenticated("invalid or expired code"))?;
    if !user.is_active {
        err_unauthenticated!("invalid or expired code");
    }

    let roles = Role::names_for_user(&user.id, conn).await?;
    let pair = issue_token_pair(&user, &roles, ctx.ip, ctx.user_agent, ctx.device_name, redis, conn).await?;
    AuditEntry::record(Some(&user.id), "passwordless_verify", "success", ctx.ip, None, conn).await.ok();
    Ok(pair)
}

/// Generates a fresh secret for the caller to display as a QR code.
/// Nothing is persisted until `totp_confirm` proves the user can
/// actually produce a code from it.
pub fn totp_setup(user: &User) -> TotpSetup {
    let secret = totp::generate_secret();
    let secret_base32 = totp::secret_to_base32(&secret);
    let label = user.username.as_deref().unwrap_or(&user.email);
    let otpauth_uri = format!("otpauth://totp/authd:{label}?secret={secret_base32}&issuer=authd&algorithm=SHA1&digits=6&period=30");
    TotpSetup { secret_base32, otpauth_uri }
}

/// Proves possession of `secret_base32` with one live code, then seals
/// and persists it and issues a batch of backup codes (returned once,
/// in plaintext — only their hashes are stored).
pub async fn totp_confirm(user_id: &str, secret_base32: &str, code: &str, conn: &DbConn) -> Result<Vec<String>, Error> {
    let secret = totp::base32_to_secret(secret_base32)?;
    let Some(step) = totp::matching_step(&secret, code) else {
        err_unauthenticated!("invalid code");
    };

    let mut user = User::find_by_id(user_id, conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    let key = totp_encryption_key()?;
    user.totp_secret = Some(crypto::encrypt_secret(&secret, &key)?);
    user.last_totp_step = Some(step);
    user.save(conn).await?;

    let codes: Vec<String> = (0..CONFIG.backup_code_count()).map(|_| crypto::generate_user_code()).collect();
    let hashes: Vec<String> = codes.iter().map(|c| crypto::sha256_hex(c.as_bytes())).collect();
    BackupCode::insert_batch(user_id, &hashes, conn).await?;

    AuditEntry::record(Some(user_id), "totp_confirm", "success", None, None, conn).await.ok();
    Ok(codes)
}

pub async fn totp_disable(user_id: &str, password: &str, conn: &DbConn) -> Result<(), Error> {
    let mut user = User::find_by_id(user_id, conn).await.ok_or_else(|| Error::not_found("user not found"))?;
    if !crypto::verify_password(password, &user.password_hash) {
        err_unauthenticated!("incorrect password");
    }

    user.totp_secret = None;
    user.save(conn).await?;
    BackupCode::delete_all_for_user(user_id, conn).await?;
    AuditEntry::record(Some(user_id), "totp_disable", "success", None, None, conn).await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy_rejects_too_short() {
        let err = check_password_policy("ab1").unwrap_err();
        assert_eq!(err.kind().as_str(), "validation_failed");
    }

    #[test]
    fn password_policy_rejects_letters_only() {
        assert!(check_password_policy("abcdefghij").is_err());
    }

    #[test]
    fn password_policy_rejects_digits_only() {
        assert!(check_password_policy("1234567890").is_err());
    }

    #[test]
    fn password_policy_accepts_a_mixed_password() {
        assert!(check_password_policy("correcthorse1").is_ok());
    }
}
