//
// TOTP authenticator codes (§4.3), the in-process half of C7's 2FA
// check — backup codes are handled directly against `db::models::BackupCode`.
//
use data_encoding::BASE32;
use totp_lite::{totp_custom, Sha1};

use crate::crypto::get_random_vec;
use crate::error::Error;

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// 160 bits of secret material, the RFC 4226/6238 convention most
/// authenticator apps expect.
pub fn generate_secret() -> Vec<u8> {
    get_random_vec(20)
}

pub fn secret_to_base32(secret: &[u8]) -> String {
    BASE32.encode(secret)
}

pub fn base32_to_secret(encoded: &str) -> Result<Vec<u8>, Error> {
    BASE32.decode(encoded.to_uppercase().as_bytes()).map_err(|_| Error::validation("invalid TOTP secret encoding"))
}

fn code_at(secret: &[u8], unix_time: u64) -> String {
    totp_custom::<Sha1>(STEP_SECS, DIGITS, secret, unix_time)
}

fn step_number(unix_time: u64) -> i64 {
    (unix_time / STEP_SECS) as i64
}

/// Accepts the code for the current 30-second step or either adjacent
/// step, tolerating clock drift between client and server (§4.3), and
/// returns the step number it matched so the caller can reject a replay
/// of that same step.
pub fn matching_step(secret: &[u8], code: &str) -> Option<i64> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    [now, now.saturating_sub(STEP_SECS), now + STEP_SECS].iter().find(|t| crate::crypto::ct_eq(code_at(secret, **t), code)).map(|t| step_number(*t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_current_step() {
        let secret = generate_secret();
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let code = code_at(&secret, now);
        assert_eq!(matching_step(&secret, &code), Some(step_number(now)));
    }

    #[test]
    fn rejects_an_unrelated_code() {
        let secret = generate_secret();
        assert_eq!(matching_step(&secret, "000000"), None);
    }

    #[test]
    fn base32_round_trips() {
        let secret = generate_secret();
        let encoded = secret_to_base32(&secret);
        assert_eq!(base32_to_secret(&encoded).unwrap(), secret);
    }
}
