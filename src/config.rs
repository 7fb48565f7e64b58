use std::process::exit;
use std::sync::LazyLock;

use crate::util::{get_env, get_env_bool};

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| {
        println!("[ERROR] Configuration is invalid:\n  {e}\n");
        exit(12)
    })
});

pub type Pass = String;

macro_rules! make_config {
    ($(
        $(#[doc = $groupdoc:literal])?
        $group:ident {
        $(
            $(#[doc = $doc:literal])*
            $name:ident ($env:literal): $ty:ident, $none_action:ident $(, $default:expr)?;
        )+},
    )+) => {
        #[derive(Clone, Default)]
        struct ConfigBuilder {
            $($( $name: Option<$ty>, )+)+
        }

        impl ConfigBuilder {
            fn from_env() -> Self {
                let env_file = get_env("ENV_FILE").unwrap_or_else(|| String::from(".env"));
                if let Err(e) = dotenvy::from_path(&env_file) {
                    if !matches!(&e, dotenvy::Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound) {
                        println!("[WARNING] Could not read environment file `{env_file}`: {e}");
                    }
                }

                let mut builder = Self::default();
                $($(
                    builder.$name = make_config!{@getenv $env, $ty};
                )+)+
                builder
            }

            fn build(&self) -> Result<ConfigItems, String> {
                Ok(ConfigItems {
                    $($(
                        $name: make_config!{@build self.$name.clone(), $env, $none_action, $($default)?},
                    )+)+
                })
            }
        }

        #[derive(Clone)]
        struct ConfigItems {
            $($( $name: make_config!{@type $ty, $none_action}, )+)+
        }

        #[allow(unused)]
        impl Config {
            $($(
                $(#[doc = $doc])*
                pub fn $name(&self) -> make_config!{@type $ty, $none_action} {
                    self.inner.$name.clone()
                }
            )+)+
        }
    };

    ( @getenv $name:expr, bool ) => { get_env_bool($name) };
    ( @getenv $name:expr, $ty:ident ) => { get_env($name) };

    ( @type $ty:ty, option ) => { Option<$ty> };
    ( @type $ty:ty, $id:ident ) => { $ty };

    ( @build $value:expr, $env:expr, option, ) => { $value };
    ( @build $value:expr, $env:expr, def, $default:expr ) => { $value.unwrap_or($default) };
    ( @build $value:expr, $env:expr, req, ) => {
        match $value {
            Some(v) => v,
            None => return Err(format!("{} is required but was not set", $env)),
        }
    };
}

pub struct Config {
    inner: ConfigItems,
}

// STRUCTURE:
// /// Doc shown in generated docs only (no admin panel reads this).
// group {
//     name ("ENV_VAR_NAME"): type, action, <default>;
// }
// action: def (use default), option (Option<T>, no default), req (fail startup if absent)
make_config! {
    /// Network-facing listeners
    server {
        /// REST/OIDC HTTP port
        port ("PORT"): u16, def, 8181;
        /// gRPC AuthService port
        grpc_port ("GRPC_PORT"): u16, def, 50051;
        /// Working directory for migrations lock files / local mail queue
        data_folder ("DATA_FOLDER"): String, def, "data".to_string();
        /// Route syslog output through the `syslog` crate instead of stderr
        enable_syslog ("ENABLE_SYSLOG"): bool, def, false;
        /// `log`/`fern` level filter
        log_level ("LOG_LEVEL"): String, def, "info".to_string();
    },

    /// Credential Store (C1)
    db {
        database_url ("DATABASE_URL"): String, def, "authd.sqlite3".to_string();
        database_max_conns ("DB_POOL_SIZE"): u32, def, 10;
        database_min_conns ("DB_MIN_POOL_SIZE"): u32, def, 1;
        database_idle_timeout ("DB_IDLE_TIMEOUT_SECS"): u64, def, 600;
        database_timeout ("DB_CONNECTION_TIMEOUT_SECS"): u64, def, 30;
        /// Extra `;`-separated SQL run on every new connection; empty uses the backend default.
        database_conn_init ("DATABASE_CONN_INIT"): String, def, String::new();
        /// SQLite only: `PRAGMA journal_mode=wal`.
        enable_db_wal ("ENABLE_DB_WAL"): bool, def, true;
    },

    /// Ephemeral Store (C2)
    redis {
        redis_url ("REDIS_URL"): String, def, "redis://127.0.0.1:6379".to_string();
        /// If the persistent blacklist store is unreachable, treat unknown
        /// tokens as not-revoked instead of failing closed (§4.5).
        fail_open_on_store_outage ("FAIL_OPEN_ON_STORE_OUTAGE"): bool, def, false;
        /// IP filter stage (§4.7) fails open on ephemeral-store error when true.
        ip_filter_fail_open ("IP_FILTER_FAIL_OPEN"): bool, def, true;
    },

    /// Token Service (C4)
    jwt {
        jwt_access_secret ("JWT_ACCESS_SECRET"): Pass, req,;
        jwt_refresh_secret ("JWT_REFRESH_SECRET"): Pass, req,;
        /// Access token / 2FA-pending-token TTL in seconds
        jwt_access_expires_secs ("JWT_ACCESS_EXPIRES_SECS"): i64, def, 900;
        jwt_refresh_expires_secs ("JWT_REFRESH_EXPIRES_SECS"): i64, def, 604_800;
        two_factor_token_expires_secs ("TWO_FACTOR_TOKEN_EXPIRES_SECS"): i64, def, 300;
    },

    /// Auth State Machine (C7)
    auth {
        bcrypt_cost ("BCRYPT_COST"): u32, def, 12;
        otp_hmac_secret ("OTP_HMAC_SECRET"): Pass, req,;
        /// AES-256-GCM key (32 raw bytes, base64-encoded) used to seal TOTP secrets at rest
        totp_encryption_key ("TOTP_ENCRYPTION_KEY"): Pass, req,;
        otp_ttl_secs ("OTP_TTL_SECS"): i64, def, 300;
        otp_digits ("OTP_DIGITS"): u32, def, 6;
        backup_code_count ("BACKUP_CODE_COUNT"): usize, def, 10;
        password_min_length ("PASSWORD_MIN_LENGTH"): usize, def, 10;
        strict_token_binding ("STRICT_TOKEN_BINDING"): bool, def, false;
        max_active_sessions ("MAX_ACTIVE_SESSIONS"): u32, def, 0;
    },

    /// OAuth/OIDC Authorization Server (C8)
    oidc {
        oidc_enabled ("OIDC_ENABLED"): bool, def, false;
        oidc_issuer ("OIDC_ISSUER"): String, option,;
        oidc_signing_key_path ("OIDC_SIGNING_KEY_PATH"): String, option,;
        oidc_signing_key_id ("OIDC_SIGNING_KEY_ID"): String, def, "default".to_string();
        /// RS256 or ES256
        oidc_signing_algorithm ("OIDC_SIGNING_ALGORITHM"): String, def, "RS256".to_string();
        oidc_access_token_ttl_secs ("OIDC_ACCESS_TOKEN_TTL_SECS"): i64, def, 900;
        oidc_refresh_token_ttl_secs ("OIDC_REFRESH_TOKEN_TTL_SECS"): i64, def, 604_800;
        oidc_id_token_ttl_secs ("OIDC_ID_TOKEN_TTL_SECS"): i64, def, 3_600;
        oidc_auth_code_ttl_secs ("OIDC_AUTH_CODE_TTL_SECS"): i64, def, 600;
        oidc_device_code_ttl_secs ("OIDC_DEVICE_CODE_TTL_SECS"): i64, def, 1_800;
        oidc_device_poll_interval_secs ("OIDC_DEVICE_POLL_INTERVAL_SECS"): i64, def, 5;
    },

    /// Enforcement Layer (C9)
    enforcement {
        maintenance_mode ("MAINTENANCE_MODE"): bool, def, false;
        /// Comma-separated list of origins; "*" allows any origin.
        cors_allowed_origins_raw ("CORS_ALLOWED_ORIGINS"): String, def, String::new();
        /// Comma-separated CIDR blocks.
        ip_allowlist_raw ("IP_ALLOWLIST"): String, def, String::new();
        ip_denylist_raw ("IP_DENYLIST"): String, def, String::new();

        rate_limit_signin_window_secs ("RATE_LIMIT_SIGNIN_WINDOW_SECS"): u64, def, 60;
        rate_limit_signin_max_attempts ("RATE_LIMIT_SIGNIN_MAX_ATTEMPTS"): u32, def, 10;
        rate_limit_signup_window_secs ("RATE_LIMIT_SIGNUP_WINDOW_SECS"): u64, def, 3_600;
        rate_limit_signup_max_attempts ("RATE_LIMIT_SIGNUP_MAX_ATTEMPTS"): u32, def, 5;
        rate_limit_refresh_window_secs ("RATE_LIMIT_REFRESH_WINDOW_SECS"): u64, def, 60;
        rate_limit_refresh_max_attempts ("RATE_LIMIT_REFRESH_MAX_ATTEMPTS"): u32, def, 30;
        rate_limit_default_window_secs ("RATE_LIMIT_DEFAULT_WINDOW_SECS"): u64, def, 60;
        rate_limit_default_max_attempts ("RATE_LIMIT_DEFAULT_MAX_ATTEMPTS"): u32, def, 120;
    },

    /// Mail collaborator (A3)
    mail {
        /// "local" (drop to data_folder/mail) or "smtp"
        mail_transport ("MAIL_TRANSPORT"): String, def, "local".to_string();
        smtp_host ("SMTP_HOST"): String, option,;
        smtp_port ("SMTP_PORT"): u16, def, 587;
        smtp_username ("SMTP_USERNAME"): String, option,;
        smtp_password ("SMTP_PASSWORD"): Pass, option,;
        smtp_from ("SMTP_FROM"): String, def, "authd@localhost".to_string();
        helo_name ("HELO_NAME"): String, option,;
    },

    /// Background Janitors (C10)
    janitors {
        blacklist_purge_interval_secs ("BLACKLIST_PURGE_INTERVAL_SECS"): u64, def, 300;
        expired_code_purge_interval_secs ("EXPIRED_CODE_PURGE_INTERVAL_SECS"): u64, def, 300;
        shutdown_grace_period_secs ("SHUTDOWN_GRACE_PERIOD_SECS"): u64, def, 10;
    },

    /// LDAP collaborator (A4)
    ldap {
        ldap_enabled ("LDAP_ENABLED"): bool, def, false;
        ldap_url ("LDAP_URL"): String, option,;
        ldap_bind_dn ("LDAP_BIND_DN"): String, option,;
        ldap_bind_password ("LDAP_BIND_PASSWORD"): Pass, option,;
        ldap_user_search_base ("LDAP_USER_SEARCH_BASE"): String, option,;
        ldap_sync_interval_secs ("LDAP_SYNC_INTERVAL_SECS"): u64, def, 3_600;
    },
}

impl Config {
    fn load() -> Result<Self, String> {
        let builder = ConfigBuilder::from_env();
        let inner = builder.build()?;
        let config = Self { inner };
        config.validate()?;
        Ok(config)
    }

    /// Eager startup validation (§6): fail fast on weak secrets or
    /// contradictory settings rather than discovering them under load.
    fn validate(&self) -> Result<(), String> {
        if self.jwt_access_secret().len() < 32 {
            return Err("JWT_ACCESS_SECRET must be at least 32 characters".into());
        }
        if self.jwt_refresh_secret().len() < 32 {
            return Err("JWT_REFRESH_SECRET must be at least 32 characters".into());
        }
        if self.jwt_access_secret() == self.jwt_refresh_secret() {
            return Err("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".into());
        }
        if self.otp_hmac_secret().len() < 32 {
            return Err("OTP_HMAC_SECRET must be at least 32 characters".into());
        }
        let key = data_encoding::BASE64
            .decode(self.totp_encryption_key().as_bytes())
            .map_err(|e| format!("TOTP_ENCRYPTION_KEY must be base64: {e}"))?;
        if key.len() != 32 {
            return Err("TOTP_ENCRYPTION_KEY must decode to exactly 32 bytes".into());
        }

        if self.oidc_enabled() {
            if self.oidc_issuer().is_none() {
                return Err("OIDC_ISSUER is required when OIDC_ENABLED=true".into());
            }
            let key_path = self.oidc_signing_key_path().ok_or("OIDC_SIGNING_KEY_PATH is required when OIDC_ENABLED=true")?;
            if !crate::util::file_exists(&key_path) {
                return Err(format!("OIDC_SIGNING_KEY_PATH `{key_path}` does not exist"));
            }
            match self.oidc_signing_algorithm().as_str() {
                "RS256" | "ES256" => {}
                other => return Err(format!("Unsupported OIDC_SIGNING_ALGORITHM `{other}` (expected RS256 or ES256)")),
            }
        }

        Ok(())
    }

    /// Parsed allow-list for the CORS fairing; empty means "no cross-origin
    /// requests are echoed back".
    pub fn cors_allowed_origins(&self) -> Vec<String> {
        self.cors_allowed_origins_raw().split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
    }

    pub fn ip_allowlist_entries(&self) -> Vec<String> {
        self.ip_allowlist_raw().split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
    }

    pub fn ip_denylist_entries(&self) -> Vec<String> {
        self.ip_denylist_raw().split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
    }
}
