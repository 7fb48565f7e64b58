//
// Signing Key Manager (C3)
//
// Loads RSA/ECDSA key material, exposes the current signing key, emits
// JWKS, and supports multi-kid verification during rotation.
//
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Serialize;

use crate::error::Error;
use crate::util::read_file;
use crate::CONFIG;

pub static KEYS: LazyLock<KeyManager> = LazyLock::new(KeyManager::load_from_config);

struct SigningKey {
    alg: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// Raw public-key bytes, kept only to render the JWKS entry.
    public_pem: Vec<u8>,
}

/// Guarded by a single `RwLock`: signing and verification take a read
/// hold; rotation (`add_key`/`promote`/`remove_key`) takes a write hold
/// and replaces the whole map atomically, so no reader ever observes a
/// half-updated key set.
pub struct KeyManager {
    inner: RwLock<Inner>,
}

struct Inner {
    keys: HashMap<String, SigningKey>,
    current_kid: String,
}

impl KeyManager {
    fn load_from_config() -> Self {
        let path = CONFIG.oidc_signing_key_path().unwrap_or_default();
        let kid = CONFIG.oidc_signing_key_id();
        let alg = parse_algorithm(&CONFIG.oidc_signing_algorithm()).unwrap_or_else(|e| panic!("Invalid OIDC signing algorithm: {e}"));

        let mut keys = HashMap::new();
        if !path.is_empty() {
            let key = load_key_pair(&path, alg).unwrap_or_else(|e| panic!("Error loading OIDC signing key `{path}`: {e}"));
            keys.insert(kid.clone(), key);
        }

        Self {
            inner: RwLock::new(Inner { keys, current_kid: kid }),
        }
    }

    /// Signs with the current kid; returns the raw JWT string and the kid
    /// it was signed with, for callers that need to log or test it.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<(String, String), Error> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let key = inner.keys.get(&inner.current_kid).ok_or_else(|| Error::new("invalid_key"))?;
        let mut header = jsonwebtoken::Header::new(key.alg);
        header.kid = Some(inner.current_kid.clone());
        let token = jsonwebtoken::encode(&header, claims, &key.encoding).map_err(Error::from)?;
        Ok((token, inner.current_kid.clone()))
    }

    /// Verifies against the key named by the JWS header's `kid`, falling
    /// back to the current key when the header carries none (single-key
    /// deployments never set it at decode time).
    pub fn verify<T: serde::de::DeserializeOwned>(&self, token: &str, expected_aud: Option<&str>, issuer: &str) -> Result<T, Error> {
        let header = jsonwebtoken::decode_header(token).map_err(Error::from)?;
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let kid = header.kid.clone().unwrap_or_else(|| inner.current_kid.clone());
        let key = inner.keys.get(&kid).ok_or_else(|| Error::new("invalid_key"))?;

        if header.alg != key.alg {
            return Err(Error::new("unsupported_alg"));
        }

        let mut validation = jsonwebtoken::Validation::new(key.alg);
        validation.set_issuer(&[issuer]);
        validation.leeway = 0;
        match expected_aud {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        jsonwebtoken::decode::<T>(token, &key.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::token_expired(),
                _ => Error::from(e).with_msg("invalid_token"),
            })
    }

    pub fn current_kid(&self) -> String {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).current_kid.clone()
    }

    /// RFC 7517 JWKS document covering every loaded (not just current) kid,
    /// so tokens signed before a rotation still verify against `/.well-known/jwks.json`.
    pub fn jwks(&self) -> JwkSet {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let keys = inner
            .keys
            .iter()
            .filter_map(|(kid, key)| jwk_from_public_pem(kid, key.alg, &key.public_pem))
            .collect();
        JwkSet { keys }
    }

    /// Loads and registers a new kid without disturbing the current one —
    /// the first step of cooperative rotation.
    pub fn add_key(&self, kid: &str, key_path: &str, alg: Algorithm) -> Result<(), Error> {
        let key = load_key_pair(key_path, alg).map_err(Error::from)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.keys.insert(kid.to_string(), key);
        Ok(())
    }

    /// Promotes an already-loaded kid to current.
    pub fn promote(&self, kid: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.keys.contains_key(kid) {
            return Err(Error::new("invalid_key"));
        }
        inner.current_kid = kid.to_string();
        Ok(())
    }

    /// Drops a verify-only kid. Refuses to drop the current kid.
    pub fn remove_key(&self, kid: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.current_kid == kid {
            return Err(Error::new("cannot remove the current signing key"));
        }
        inner.keys.remove(kid);
        Ok(())
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm, String> {
    match name {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(format!("unsupported algorithm `{other}`")),
    }
}

fn load_key_pair(path: &str, alg: Algorithm) -> std::io::Result<SigningKey> {
    let pem = read_file(path)?;
    let (encoding, decoding) = match alg {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => (
            EncodingKey::from_rsa_pem(&pem).unwrap_or_else(|e| panic!("Error decoding private RSA key `{path}`: {e}")),
            DecodingKey::from_rsa_pem(&pem).unwrap_or_else(|e| panic!("Error decoding public RSA key `{path}`: {e}")),
        ),
        Algorithm::ES256 | Algorithm::ES384 => (
            EncodingKey::from_ec_pem(&pem).unwrap_or_else(|e| panic!("Error decoding private EC key `{path}`: {e}")),
            DecodingKey::from_ec_pem(&pem).unwrap_or_else(|e| panic!("Error decoding public EC key `{path}`: {e}")),
        ),
        _ => panic!("unsupported signing algorithm {alg:?}"),
    };
    Ok(SigningKey { alg, encoding, decoding, public_pem: pem })
}

/// RFC 7517 JSON Web Key Set.
#[derive(Debug, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Serialize)]
pub struct Jwk {
    pub kty: &'static str,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub alg: &'static str,
    pub n: Option<String>,
    pub e: Option<String>,
    pub crv: Option<&'static str>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Builds the JWK entry for a loaded key. RSA keys are fully rendered
/// (n/e extracted via the `rsa` crate, same RustCrypto family
/// `jsonwebtoken`'s `rust_crypto` backend uses). EC key point extraction
/// isn't implemented yet, so EC kids are omitted from the served set —
/// see the keys.rs Open Question in DESIGN.md.
fn jwk_from_public_pem(kid: &str, alg: Algorithm, pem: &[u8]) -> Option<Jwk> {
    let alg_name = match alg {
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        _ => return None,
    };

    let pem_str = std::str::from_utf8(pem).ok()?;
    let (n, e) = rsa_public_key_from_pem(pem_str)?;

    Some(Jwk {
        kty: "RSA",
        kid: kid.to_string(),
        use_: "sig",
        alg: alg_name,
        n: Some(data_encoding::BASE64URL_NOPAD.encode(&n)),
        e: Some(data_encoding::BASE64URL_NOPAD.encode(&e)),
        crv: None,
        x: None,
        y: None,
    })
}

/// Accepts either a PKCS#1 `RSA PUBLIC KEY`/`RSA PRIVATE KEY` PEM or a
/// PKCS#8 `PUBLIC KEY`/`PRIVATE KEY` PEM, mirroring the formats
/// `jsonwebtoken::DecodingKey::from_rsa_pem` itself accepts.
fn rsa_public_key_from_pem(pem: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
    use rsa::traits::PublicKeyParts;

    let components = |key: &rsa::RsaPublicKey| (key.n().to_bytes_be(), key.e().to_bytes_be());

    if let Ok(key) = rsa::RsaPublicKey::from_pkcs1_pem(pem) {
        return Some(components(&key));
    }
    if let Ok(key) = rsa::RsaPrivateKey::from_pkcs1_pem(pem) {
        return Some(components(&key.to_public_key()));
    }
    if let Ok(key) = rsa::RsaPublicKey::from_public_key_pem(pem) {
        return Some(components(&key));
    }
    if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Some(components(&key.to_public_key()));
    }
    None
}
