use tonic::{Request, Response, Status};

use super::pb::auth_service_server::AuthService;
use super::pb::{
    CheckPermissionRequest, CheckPermissionResponse, CredentialKind, GetUserRequest, GetUserResponse, IntrospectTokenRequest, IntrospectTokenResponse,
    ValidateTokenRequest, ValidateTokenResponse,
};
use crate::auth::Credential;
use crate::db::models::User;
use crate::db::{DbConn, DbPool};
use crate::enforcement;
use crate::error::ErrorKind;
use crate::oidc::introspect;
use crate::redis_store::RedisStore;

pub struct AuthServiceImpl {
    pool: DbPool,
    redis: RedisStore,
}

impl AuthServiceImpl {
    pub fn new(pool: DbPool, redis: RedisStore) -> Self {
        Self { pool, redis }
    }

    async fn conn(&self) -> Result<DbConn, Status> {
        self.pool.get().await.map_err(Status::from)
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn validate_token(&self, request: Request<ValidateTokenRequest>) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();
        let conn = self.conn().await?;

        let credential = enforcement::resolve_credential_str(&req.credential, &self.redis, &conn).await?;

        let response = match credential {
            Credential::User { user_id, roles, .. } => {
                ValidateTokenResponse { kind: CredentialKind::User as i32, user_id, roles, scopes: Vec::new(), key_id: String::new(), application_id: String::new() }
            }
            Credential::ApiKey { user_id, scopes, key_id } => {
                ValidateTokenResponse { kind: CredentialKind::ApiKey as i32, user_id, roles: Vec::new(), scopes, key_id, application_id: String::new() }
            }
            Credential::Application { application_id } => ValidateTokenResponse {
                kind: CredentialKind::Application as i32,
                user_id: String::new(),
                roles: Vec::new(),
                scopes: Vec::new(),
                key_id: String::new(),
                application_id,
            },
        };

        Ok(Response::new(response))
    }

    async fn introspect_token(&self, request: Request<IntrospectTokenRequest>) -> Result<Response<IntrospectTokenResponse>, Status> {
        let req = request.into_inner();
        let conn = self.conn().await?;

        let resp = introspect::introspect(&req.token, &req.client_id, req.client_secret.as_deref(), &self.redis, &conn).await?;

        Ok(Response::new(IntrospectTokenResponse {
            active: resp.active,
            scope: resp.scope.unwrap_or_default(),
            client_id: resp.client_id.unwrap_or_default(),
            sub: resp.sub.unwrap_or_default(),
            exp: resp.exp.unwrap_or_default(),
            token_type: resp.token_type.unwrap_or_default(),
        }))
    }

    async fn get_user(&self, request: Request<GetUserRequest>) -> Result<Response<GetUserResponse>, Status> {
        let req = request.into_inner();
        let conn = self.conn().await?;

        let user = User::find_by_id(&req.user_id, &conn).await.ok_or_else(|| Status::not_found("user not found"))?;

        Ok(Response::new(GetUserResponse {
            id: user.id,
            email: user.email,
            username: user.username.unwrap_or_default(),
            account_type: user.account_type().as_str().to_string(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            totp_enabled: user.totp_secret.is_some(),
        }))
    }

    async fn check_permission(&self, request: Request<CheckPermissionRequest>) -> Result<Response<CheckPermissionResponse>, Status> {
        let req = request.into_inner();
        let conn = self.conn().await?;

        let credential = enforcement::resolve_credential_str(&req.credential, &self.redis, &conn).await?;
        let required: Vec<&str> = req.required_permissions.iter().map(String::as_str).collect();

        let allowed = match enforcement::check_permissions(&credential, &required, &conn).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::Forbidden => false,
            Err(e) => return Err(e.into()),
        };

        Ok(Response::new(CheckPermissionResponse { allowed }))
    }
}
