// @generated-by-hand: kept in sync manually with migrations/{postgresql,sqlite}.
// UUIDs and other opaque ids are stored as `Text` so the same schema works
// unmodified across both supported backends (see `db::DbConnInner`).

diesel::table! {
    users (id) {
        id -> Text,
        email -> Text,
        username -> Nullable<Text>,
        phone -> Nullable<Text>,
        password_hash -> Text,
        account_type -> Text,
        is_active -> Bool,
        email_verified -> Bool,
        phone_verified -> Bool,
        totp_secret -> Nullable<Binary>,
        last_totp_step -> Nullable<BigInt>,
        security_stamp -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    roles (id) {
        id -> Text,
        name -> Text,
        display_name -> Text,
        is_system -> Bool,
    }
}

diesel::table! {
    permissions (id) {
        id -> Text,
        resource -> Text,
        action -> Text,
    }
}

diesel::table! {
    role_permissions (role_id, permission_id) {
        role_id -> Text,
        permission_id -> Text,
    }
}

diesel::table! {
    user_roles (user_id, role_id) {
        user_id -> Text,
        role_id -> Text,
    }
}

diesel::table! {
    refresh_tokens (id) {
        id -> Text,
        user_id -> Text,
        token_hash -> Text,
        device_type -> Nullable<Text>,
        device_os -> Nullable<Text>,
        device_browser -> Nullable<Text>,
        ip -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        last_active -> Timestamp,
        created_at -> Timestamp,
        expires_at -> Timestamp,
        revoked_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    blacklist_entries (id) {
        id -> Text,
        jti_fingerprint -> Text,
        user_id -> Nullable<Text>,
        expires_at -> Timestamp,
    }
}

diesel::table! {
    oauth_clients (id) {
        id -> Text,
        client_id -> Text,
        client_secret_hash -> Nullable<Text>,
        redirect_uris -> Text,
        grant_types -> Text,
        allowed_scopes -> Text,
        pkce_required -> Bool,
        is_public -> Bool,
        consent_required -> Bool,
        owner_user_id -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    authorization_codes (code) {
        code -> Text,
        client_id -> Text,
        user_id -> Text,
        redirect_uri -> Text,
        scopes -> Text,
        nonce -> Nullable<Text>,
        code_challenge -> Nullable<Text>,
        code_challenge_method -> Nullable<Text>,
        issued_at -> Timestamp,
        expires_at -> Timestamp,
        consumed_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    device_codes (device_code) {
        device_code -> Text,
        user_code -> Text,
        client_id -> Text,
        scopes -> Text,
        interval_secs -> Integer,
        expires_at -> Timestamp,
        status -> Text,
        user_id -> Nullable<Text>,
        last_polled_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    consents (id) {
        id -> Text,
        user_id -> Text,
        client_id -> Text,
        granted_scopes -> Text,
        granted_at -> Timestamp,
    }
}

diesel::table! {
    sessions (id) {
        id -> Text,
        user_id -> Text,
        refresh_token_id -> Text,
        device_name -> Nullable<Text>,
        ip -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        created_at -> Timestamp,
        last_active_at -> Timestamp,
        revoked_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    otps (id) {
        id -> Text,
        identifier -> Text,
        purpose -> Text,
        code_hash -> Text,
        expires_at -> Timestamp,
        consumed_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    backup_codes (id) {
        id -> Text,
        user_id -> Text,
        code_hash -> Text,
        used_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    api_keys (id) {
        id -> Text,
        user_id -> Text,
        name -> Text,
        prefix -> Text,
        secret_hash -> Text,
        scopes -> Text,
        is_active -> Bool,
        expires_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        last_used_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    applications (id) {
        id -> Text,
        name -> Text,
        secret_hash -> Text,
        prefix -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    audit_entries (id) {
        id -> Text,
        user_id -> Nullable<Text>,
        action -> Text,
        outcome -> Text,
        ip -> Nullable<Text>,
        metadata -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::joinable!(refresh_tokens -> users (user_id));
diesel::joinable!(user_roles -> users (user_id));
diesel::joinable!(user_roles -> roles (role_id));
diesel::joinable!(role_permissions -> roles (role_id));
diesel::joinable!(role_permissions -> permissions (permission_id));
diesel::joinable!(sessions -> users (user_id));
diesel::joinable!(backup_codes -> users (user_id));
diesel::joinable!(api_keys -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    roles,
    permissions,
    role_permissions,
    user_roles,
    refresh_tokens,
    blacklist_entries,
    oauth_clients,
    authorization_codes,
    device_codes,
    consents,
    sessions,
    otps,
    backup_codes,
    api_keys,
    applications,
    audit_entries,
);
