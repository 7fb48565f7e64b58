//
// Error generator macro
//
macro_rules! make_error {
    ( $struct:ident; $( $name:ident ( $ty:ty, _): $show_cause:expr, $kind:expr ),+ $(,)* ) => {
        #[derive(Debug)]
        #[allow(dead_code)]
        pub enum $struct {
            $($name( $ty, String )),+
        }
        $(impl From<$ty> for $struct {
            fn from(err: $ty) -> Self {
                $struct::$name(err, String::from(stringify!($name)))
            }
        })+
        impl $struct {
            pub fn with_msg<M: Into<String>>(self, msg: M) -> Self {
                match self {$(
                   $struct::$name(e, _) => $struct::$name(e, msg.into()),
                )+}
            }

            /// The error kind exposed to clients (§7 of the design).
            pub fn kind(&self) -> ErrorKind {
                match self {$(
                    $struct::$name(..) => $kind,
                )+}
            }

            pub fn log(&self) {
                match self {$(
                   $struct::$name(e, s) => {
                       error!("{}: {:?}", s, e);
                       if $show_cause {
                           error!("[CAUSE] {:?}", e);
                       }
                   },
                )+}
            }
        }
    };
}

use diesel::result::Error as DieselError;
use serde_json::Error as SerError;

/// The abstract, client-visible error kinds from §7 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailed,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    ServiceUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Internal => "internal_error",
        }
    }

    pub fn status(self) -> rocket::http::Status {
        use rocket::http::Status;
        match self {
            ErrorKind::ValidationFailed => Status::BadRequest,
            ErrorKind::Unauthenticated => Status::Unauthorized,
            ErrorKind::Forbidden => Status::Forbidden,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::Conflict => Status::Conflict,
            ErrorKind::RateLimited => Status::TooManyRequests,
            ErrorKind::ServiceUnavailable => Status::ServiceUnavailable,
            ErrorKind::Internal => Status::InternalServerError,
        }
    }
}

make_error! {
    Error;
    // Raised through the err! / err_unauthenticated! / err_validation! macros below.
    SimpleError(String, _): false, ErrorKind::Internal,
    ValidationError(String, _): false, ErrorKind::ValidationFailed,
    UnauthenticatedError(String, _): false, ErrorKind::Unauthenticated,
    ForbiddenError(String, _): false, ErrorKind::Forbidden,
    NotFoundError(String, _): false, ErrorKind::NotFound,
    ConflictError(String, _): false, ErrorKind::Conflict,
    RateLimitedError(String, _): false, ErrorKind::RateLimited,
    ServiceUnavailableError(String, _): false, ErrorKind::ServiceUnavailable,
    TokenExpiredError(String, _): false, ErrorKind::Unauthenticated,
    DbError(DieselError, _): true, ErrorKind::Internal,
    SerdeError(SerError, _): true, ErrorKind::Internal,
    IoError(std::io::Error, _): true, ErrorKind::Internal,
    RedisError(redis::RedisError, _): true, ErrorKind::ServiceUnavailable,
    JwtError(jsonwebtoken::errors::Error, _): false, ErrorKind::Unauthenticated,
}

impl Error {
    pub fn new<M: Into<String>>(log_msg: M) -> Self {
        Error::SimpleError(log_msg.into(), String::new())
    }

    pub fn validation<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::ValidationError(m.clone(), m)
    }

    pub fn unauthenticated<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::UnauthenticatedError(m.clone(), m)
    }

    pub fn token_expired() -> Self {
        Error::TokenExpiredError("token_expired".into(), "token_expired".into())
    }

    pub fn forbidden<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::ForbiddenError(m.clone(), m)
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::NotFoundError(m.clone(), m)
    }

    pub fn conflict<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::ConflictError(m.clone(), m)
    }

    pub fn rate_limited<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::RateLimitedError(m.clone(), m)
    }

    pub fn service_unavailable<M: Into<String>>(msg: M) -> Self {
        let m = msg.into();
        Error::ServiceUnavailableError(m.clone(), m)
    }

    /// The message returned to the client. Uniform for unauthenticated
    /// errors regardless of sub-cause, per §4.3.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unauthenticated => "unauthenticated".to_string(),
            ErrorKind::Internal => "internal_error".to_string(),
            _ => match self {
                Error::ValidationError(_, m)
                | Error::ForbiddenError(_, m)
                | Error::NotFoundError(_, m)
                | Error::ConflictError(_, m)
                | Error::RateLimitedError(_, m)
                | Error::ServiceUnavailableError(_, m) => m.clone(),
                _ => self.kind().as_str().to_string(),
            },
        }
    }
}

pub trait MapResult<T> {
    fn map_res(self, msg: &str) -> Result<T, Error>;
}

impl<T> MapResult<T> for Result<T, DieselError> {
    fn map_res(self, msg: &str) -> Result<T, Error> {
        self.map_err(Error::from).map_err(|e| e.with_msg(msg))
    }
}

impl<T> MapResult<T> for Option<T> {
    fn map_res(self, msg: &str) -> Result<T, Error> {
        self.ok_or_else(|| Error::not_found(msg.to_string()))
    }
}

//
// Rocket responder impl — maps every Error to the client exactly once.
//
use rocket::http::ContentType;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        self.log();
        let kind = self.kind();
        let body = serde_json::json!({
            "error": kind.as_str(),
            "code": kind.status().code,
            "details": self.client_message(),
        });
        let body = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());

        Response::build()
            .status(kind.status())
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

//
// gRPC status mapping (A5)
//
impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        let kind = e.kind();
        let msg = e.client_message();
        e.log();
        match kind {
            ErrorKind::ValidationFailed => tonic::Status::invalid_argument(msg),
            ErrorKind::Unauthenticated => tonic::Status::unauthenticated(msg),
            ErrorKind::Forbidden => tonic::Status::permission_denied(msg),
            ErrorKind::NotFound => tonic::Status::not_found(msg),
            ErrorKind::Conflict => tonic::Status::already_exists(msg),
            ErrorKind::RateLimited => tonic::Status::resource_exhausted(msg),
            ErrorKind::ServiceUnavailable => tonic::Status::unavailable(msg),
            ErrorKind::Internal => tonic::Status::internal(msg),
        }
    }
}

///
/// Error return macros
///
#[macro_export]
macro_rules! err {
    ($msg:expr) => {{
        return Err($crate::error::Error::new($msg));
    }};
}

#[macro_export]
macro_rules! err_unauthenticated {
    ($msg:expr) => {{
        return Err($crate::error::Error::unauthenticated($msg));
    }};
}

#[macro_export]
macro_rules! err_validation {
    ($msg:expr) => {{
        return Err($crate::error::Error::validation($msg));
    }};
}
