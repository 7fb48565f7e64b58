mod api_key;
mod audit;
mod credential;
mod oauth;
mod rbac;
mod session;
mod token;
mod user;

pub use api_key::{ApiKey, Application};
pub use audit::AuditEntry;
pub use credential::{BackupCode, Otp};
pub use oauth::{AuthorizationCode, Consent, DeviceCode, DeviceCodeStatus, OAuthClient};
pub use rbac::{Permission, Role};
pub use session::Session;
pub use token::{BlacklistEntry, RefreshToken};
pub use user::{AccountType, User};
