//
// REST surface (§6)
//
// Routes are grouped by area and mounted under their own base path from
// `rocket()`. Every handler takes its credentials through the `Auth`
// request guard (stage 4/5 of the enforcement pipeline); stages 1-3
// (maintenance, IP filter, rate limit) run in `EnforcementFairing` so
// they apply uniformly before a route is even matched.
//
pub mod apikeys_rest;
pub mod auth_rest;
pub mod health;
pub mod oauth_rest;
pub mod sessions_rest;

use std::io::Cursor;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{ContentType, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::{self, Responder, Response};
use rocket::{Data, Request};

use crate::auth::Credential;
use crate::db::DbConn;
use crate::enforcement::{self, EndpointClass};
use crate::error::Error;
use crate::redis_store::RedisStore;

/// A pipeline-stage rejection, carried through `Request::local_cache`
/// (which requires `Clone`) rather than the full `Error` type, whose
/// DB/Redis/JWT variants aren't `Clone`.
#[derive(Debug, Clone)]
pub struct Rejected {
    status: Status,
    kind: &'static str,
    message: String,
}

impl<'r> Responder<'r, 'static> for Rejected {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = serde_json::json!({ "error": self.kind, "code": self.status.code, "details": self.message });
        let body = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
        Response::build().status(self.status).header(ContentType::JSON).sized_body(body.len(), Cursor::new(body)).ok()
    }
}

impl From<Error> for Rejected {
    fn from(e: Error) -> Self {
        let status = e.kind().status();
        let kind = e.kind().as_str();
        let message = e.client_message();
        Self { status, kind, message }
    }
}

pub(crate) fn client_ip(request: &Request<'_>) -> Option<String> {
    request.headers().get_one("X-Forwarded-For").and_then(|v| v.split(',').next()).map(str::trim).map(String::from).or_else(|| request.client_ip().map(|ip| ip.to_string()))
}

/// `/health`, `/ready`, `/live` must stay reachable during maintenance
/// mode (§4.7) — they're mounted at the root alongside everything else,
/// so the maintenance gate special-cases their exact paths rather than
/// relying on route placement.
fn is_health_route(request: &Request<'_>) -> bool {
    matches!(request.uri().path().as_str(), "/health" | "/ready" | "/live")
}

fn presented_credential(request: &Request<'_>) -> Option<String> {
    if let Some(auth) = request.headers().get_one("Authorization") {
        if let Some(rest) = auth.strip_prefix("Bearer ") {
            return Some(rest.to_string());
        }
    }
    if let Some(key) = request.headers().get_one("X-API-Key") {
        return Some(key.to_string());
    }
    if let Some(secret) = request.headers().get_one("X-App-Secret") {
        return Some(secret.to_string());
    }
    None
}

/// Request guard resolving stage 4/5's credential. Routes that need no
/// particular permission just destructure `Auth(credential)`; routes
/// gated on a scope call `enforcement::check_permissions` themselves.
pub struct Auth(pub Credential);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Auth {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let presented = match presented_credential(request) {
            Some(p) => p,
            None => return Outcome::Error((Status::Unauthorized, Error::unauthenticated("missing credential"))),
        };

        let redis = match request.rocket().state::<RedisStore>() {
            Some(r) => r,
            None => return Outcome::Error((Status::InternalServerError, Error::new("redis store not managed"))),
        };
        let conn = match DbConn::from_request(request).await {
            Outcome::Success(c) => c,
            _ => return Outcome::Error((Status::ServiceUnavailable, Error::service_unavailable("database unavailable"))),
        };

        match enforcement::resolve_credential_str(&presented, redis, &conn).await {
            Ok(cred) => Outcome::Success(Auth(cred)),
            Err(e) => {
                let status = e.kind().status();
                let rejected = Rejected { status, kind: e.kind().as_str(), message: e.client_message() };
                request.local_cache(|| Some(rejected));
                Outcome::Error((status, e))
            }
        }
    }
}

/// The raw bearer token string, for the handful of endpoints (logout)
/// that need to decode it themselves rather than go through `Auth`'s
/// credential resolution.
pub struct RawBearer(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RawBearer {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.headers().get_one("Authorization").and_then(|v| v.strip_prefix("Bearer ")) {
            Some(t) => Outcome::Success(RawBearer(t.to_string())),
            None => Outcome::Error((Status::Unauthorized, Error::unauthenticated("missing bearer token"))),
        }
    }
}

/// Client IP and user agent, threaded into `state_machine::RequestContext`
/// for sign-in/sign-up/refresh (§3: every issued session records them).
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestMeta {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = client_ip(request);
        let user_agent = request.headers().get_one("User-Agent").map(String::from);
        Outcome::Success(RequestMeta { ip, user_agent })
    }
}

/// Stages 1-3 of §4.7: maintenance gate, IP filter, and a default-bucket
/// rate limit applied to every request before routing. Endpoint classes
/// with a tighter budget (sign-in, sign-up, refresh) apply their own
/// `check_rate_limit` call inside the handler in addition to this one.
pub struct EnforcementFairing;

#[rocket::async_trait]
impl Fairing for EnforcementFairing {
    fn info(&self) -> Info {
        Info {
            name: "Enforcement Pipeline",
            kind: Kind::Request,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _data: &mut Data<'_>) {
        if !is_health_route(request) {
            if let Err(e) = enforcement::check_maintenance() {
                request.local_cache(|| Some(Rejected::from(e)));
                return;
            }
        }
        let ip = client_ip(request);
        if let Err(e) = enforcement::check_ip(ip.as_deref()) {
            request.local_cache(|| Some(Rejected::from(e)));
            return;
        }
        if let Some(redis) = request.rocket().state::<RedisStore>() {
            let key = ip.clone().unwrap_or_else(|| "unknown".to_string());
            if let Err(e) = enforcement::check_rate_limit(redis, EndpointClass::Default, &key).await {
                request.local_cache(|| Some(Rejected::from(e)));
            }
        }
    }
}

/// Read by a route-independent request guard so a fairing-stage
/// rejection surfaces as the same typed response every other failure
/// does, rather than a raw status code with no body.
pub struct PipelineCheck;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PipelineCheck {
    type Error = Rejected;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match request.local_cache(|| Option::<Rejected>::None).clone() {
            Some(rejected) => Outcome::Error((rejected.status, rejected)),
            None => Outcome::Success(PipelineCheck),
        }
    }
}

/// A generic fallback body for the statuses this gateway actually
/// produces, used when a rejection reaches a catcher without a cached
/// `Rejected` to hand back verbatim (e.g. a guard error with no prior
/// fairing involvement).
#[rocket::catch(default)]
fn default_catcher(status: Status, request: &Request<'_>) -> Rejected {
    if let Some(rejected) = request.local_cache(|| Option::<Rejected>::None).clone() {
        return rejected;
    }
    let kind = match status.code {
        400 => "validation_failed",
        401 => "unauthenticated",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        429 => "rate_limited",
        503 => "service_unavailable",
        _ => "internal_error",
    };
    Rejected { status, kind, message: status.reason().unwrap_or("request failed").to_string() }
}

pub fn catchers() -> Vec<rocket::Catcher> {
    rocket::catchers![default_catcher]
}

pub fn auth_routes() -> Vec<rocket::Route> {
    rocket::routes![
        auth_rest::signup,
        auth_rest::signin,
        auth_rest::saml_signin,
        auth_rest::refresh,
        auth_rest::logout,
        auth_rest::change_password,
        auth_rest::password_reset_request,
        auth_rest::password_reset_complete,
        auth_rest::passwordless_request,
        auth_rest::passwordless_verify,
        auth_rest::two_factor_setup,
        auth_rest::two_factor_verify,
        auth_rest::two_factor_disable,
        auth_rest::two_factor_login_verify,
        auth_rest::get_profile,
        auth_rest::put_profile,
    ]
}

pub fn session_routes() -> Vec<rocket::Route> {
    rocket::routes![sessions_rest::list_sessions, sessions_rest::delete_session, sessions_rest::revoke_all,]
}

pub fn apikey_routes() -> Vec<rocket::Route> {
    rocket::routes![apikeys_rest::list_keys, apikeys_rest::create_key, apikeys_rest::revoke_key,]
}

/// `oidc::discovery`'s metadata hardcodes its endpoint URLs under `/oidc`,
/// but the two well-known documents themselves must live at the root —
/// mount this group at `"/"` and [`oauth_routes`] at `"/oidc"`.
pub fn discovery_routes() -> Vec<rocket::Route> {
    rocket::routes![oauth_rest::openid_configuration, oauth_rest::jwks]
}

pub fn oauth_routes() -> Vec<rocket::Route> {
    rocket::routes![
        oauth_rest::authorize,
        oauth_rest::token,
        oauth_rest::introspect,
        oauth_rest::revoke,
        oauth_rest::userinfo,
        oauth_rest::device_code,
        oauth_rest::device_token,
        oauth_rest::device_approve,
        oauth_rest::consent_decision,
    ]
}

pub fn health_routes() -> Vec<rocket::Route> {
    rocket::routes![health::health, health::ready, health::live]
}
