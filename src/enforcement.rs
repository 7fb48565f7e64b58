//
// Enforcement Layer (C9, §4.7)
//
// The pipeline every inbound request not explicitly exempted runs
// through, in order: maintenance gate, IP filter, rate limiter,
// credential resolver, RBAC/scope check. Each stage is a free function
// so the API layer (Rocket request guards / Tonic interceptors) can
// compose them per-route rather than this module owning routing.
//
use crate::auth::{parse_bearer, Credential};
use crate::blacklist;
use crate::crypto;
use crate::db::models::{ApiKey, Application, Permission, Role};
use crate::db::DbConn;
use crate::error::Error;
use crate::ipfilter;
use crate::redis_store::{fail_open_on_outage, RedisStore};
use crate::{auth, CONFIG};

/// The rate-limit buckets named in §4.7; each has its own configured
/// window/ceiling so login attempts and routine traffic don't share a
/// budget.
#[derive(Debug, Clone, Copy)]
pub enum EndpointClass {
    SignIn,
    SignUp,
    Refresh,
    Default,
}

impl EndpointClass {
    fn bucket(self) -> &'static str {
        match self {
            Self::SignIn => "signin",
            Self::SignUp => "signup",
            Self::Refresh => "refresh",
            Self::Default => "default",
        }
    }

    fn window_and_max(self) -> (u64, u32) {
        match self {
            Self::SignIn => (CONFIG.rate_limit_signin_window_secs(), CONFIG.rate_limit_signin_max_attempts()),
            Self::SignUp => (CONFIG.rate_limit_signup_window_secs(), CONFIG.rate_limit_signup_max_attempts()),
            Self::Refresh => (CONFIG.rate_limit_refresh_window_secs(), CONFIG.rate_limit_refresh_max_attempts()),
            Self::Default => (CONFIG.rate_limit_default_window_secs(), CONFIG.rate_limit_default_max_attempts()),
        }
    }
}

/// Stage 1: §4.7's maintenance gate. Checked first so a flipped flag
/// short-circuits everything downstream, including the rate limiter.
pub fn check_maintenance() -> Result<(), Error> {
    if CONFIG.maintenance_mode() {
        return Err(Error::service_unavailable("service is in maintenance"));
    }
    Ok(())
}

/// Stage 2: deny/allow CIDR filtering (ipfilter.rs).
pub fn check_ip(remote_ip: Option<&str>) -> Result<(), Error> {
    ipfilter::check(remote_ip)
}

/// Stage 3: sliding-window counter over C2, keyed by principal-or-IP and
/// endpoint class. A store outage is fail-open/fail-closed per the same
/// policy the blacklist query path uses (§4.7, §4.5).
pub async fn check_rate_limit(redis: &RedisStore, class: EndpointClass, key: &str) -> Result<(), Error> {
    let (window_secs, max_attempts) = class.window_and_max();
    let redis_key = format!("ratelimit:{}:{key}", class.bucket());

    let count = match redis.incr_with_window(&redis_key, window_secs).await {
        Ok(count) => count,
        Err(e) if fail_open_on_outage() => {
            warn!("Rate limit store unavailable, failing open per configuration: {:?}", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if count > max_attempts as u64 {
        let retry_after = redis.ttl(&redis_key).await.ok().flatten().unwrap_or(window_secs);
        return Err(Error::rate_limited(format!("too many requests, retry after {retry_after}s")));
    }

    Ok(())
}

/// Stage 4: resolves whatever credential shape the request carries.
/// Three shapes are recognized, each routed by its literal prefix so a
/// bearer JWT, an API key, and an application secret can share the same
/// `Authorization` header without ambiguity; anything else is denied by
/// default (§4.7). `Authorization: Bearer ...` is the primary carrier;
/// `X-API-Key`/`X-App-Secret` are accepted unwrapped, so the API layer
/// passes whichever header it found straight through.
pub async fn resolve_credential(authorization: Option<&str>, redis: &RedisStore, conn: &DbConn) -> Result<Credential, Error> {
    let presented = authorization.and_then(parse_bearer).ok_or_else(|| Error::unauthenticated("missing bearer credential"))?;
    resolve_credential_str(presented, redis, conn).await
}

pub async fn resolve_credential_str(presented: &str, redis: &RedisStore, conn: &DbConn) -> Result<Credential, Error> {
    if let Some(rest) = presented.strip_prefix("agw_") {
        return resolve_api_key(rest, conn).await;
    }
    if let Some(rest) = presented.strip_prefix("app_") {
        return resolve_application(rest, conn).await;
    }
    resolve_user_jwt(presented, redis, conn).await
}

async fn resolve_user_jwt(token: &str, redis: &RedisStore, conn: &DbConn) -> Result<Credential, Error> {
    let claims = auth::decode_access_token(token)?;
    if blacklist::is_revoked(redis, &claims.jti, conn).await? {
        return Err(Error::unauthenticated("token revoked"));
    }
    Ok(Credential::User { user_id: claims.sub, roles: claims.roles, jti: claims.jti })
}

/// API keys are `agw_<prefix><secret>`: `prefix` is the plaintext
/// lookup key stored on the record, `secret`'s SHA-256 is compared
/// against the stored hash so the raw key is never persisted (§3, §6).
async fn resolve_api_key(rest: &str, conn: &DbConn) -> Result<Credential, Error> {
    const PREFIX_LEN: usize = 8;
    if rest.len() <= PREFIX_LEN {
        return Err(Error::unauthenticated("malformed api key"));
    }
    let (prefix, secret) = rest.split_at(PREFIX_LEN);

    let key = ApiKey::find_by_prefix(prefix, conn).await.ok_or_else(|| Error::unauthenticated("invalid api key"))?;
    if !key.is_valid() || !crypto::ct_eq(crypto::sha256_hex(secret.as_bytes()), &key.secret_hash) {
        return Err(Error::unauthenticated("invalid api key"));
    }
    ApiKey::touch_last_used(&key.id, conn).await?;

    Ok(Credential::ApiKey {
        user_id: key.user_id.clone(),
        scopes: key.scope_set().into_iter().map(String::from).collect(),
        key_id: key.id,
    })
}

/// Application secrets are `app_<prefix><secret>`, the same shape as an
/// API key but scoped to a service identity with no per-scope gating
/// (§4.7: "applications bypass the scope check").
async fn resolve_application(rest: &str, conn: &DbConn) -> Result<Credential, Error> {
    const PREFIX_LEN: usize = 8;
    if rest.len() <= PREFIX_LEN {
        return Err(Error::unauthenticated("malformed application secret"));
    }
    let (prefix, secret) = rest.split_at(PREFIX_LEN);

    let app = Application::find_by_prefix(prefix, conn).await.ok_or_else(|| Error::unauthenticated("invalid application secret"))?;
    if !app.is_active || !crypto::ct_eq(crypto::sha256_hex(secret.as_bytes()), &app.secret_hash) {
        return Err(Error::unauthenticated("invalid application secret"));
    }

    Ok(Credential::Application { application_id: app.id })
}

/// Stage 5: the endpoint-declared permission set a credential must
/// satisfy. Applications bypass entirely; API keys must hold every
/// required scope; a user JWT's roles are resolved to their full
/// permission set and checked the same way (§4.7).
pub async fn check_permissions(credential: &Credential, required: &[&str], conn: &DbConn) -> Result<(), Error> {
    if required.is_empty() {
        return Ok(());
    }

    match credential {
        Credential::Application { .. } => Ok(()),
        Credential::ApiKey { scopes, .. } => {
            let held: Vec<&str> = scopes.iter().map(String::as_str).collect();
            if required.iter().all(|perm| held.contains(perm)) {
                Ok(())
            } else {
                Err(Error::forbidden("api key is missing a required scope"))
            }
        }
        Credential::User { user_id, .. } => {
            let permissions = Role::permissions_for_user(user_id, conn).await?;
            let held: Vec<String> = permissions.iter().map(Permission::key).collect();
            if required.iter().all(|perm| held.iter().any(|h| h == perm)) {
                Ok(())
            } else {
                Err(Error::forbidden("user is missing a required permission"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_endpoint_class_gets_its_own_bucket() {
        assert_eq!(EndpointClass::SignIn.bucket(), "signin");
        assert_eq!(EndpointClass::SignUp.bucket(), "signup");
        assert_eq!(EndpointClass::Refresh.bucket(), "refresh");
        assert_eq!(EndpointClass::Default.bucket(), "default");
    }

    #[test]
    fn maintenance_mode_off_by_default_lets_requests_through() {
        assert!(check_maintenance().is_ok());
    }
}
