use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::AuthError;

/// Per-attempt timeout for the JWKS endpoint.
const FETCH_TIMEOUT: Duration = Duration::from_secs(2);
/// Bounded retry on transport failure.
const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(100);
/// Do not refetch more often than this when presented with unknown kids.
const REFRESH_DEBOUNCE: Duration = Duration::from_secs(5);

/// A verification key resolved from the key set.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// In-process cache of the identity provider's JWKS, keyed by `kid`.
///
/// Keys are fetched lazily and refetched when an unknown `kid` shows up
/// (key rotation). Fetches are serialized behind one mutex so concurrent
/// misses collapse into a single network call.
pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, VerificationKey>>,
    refresh: Mutex<Option<Instant>>,
}

impl JwksCache {
    pub fn new(jwks_uri: String) -> Self {
        Self {
            jwks_uri,
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            keys: RwLock::new(HashMap::new()),
            refresh: Mutex::new(None),
        }
    }

    /// Resolve the verification key for a `kid`, refetching the key set on a
    /// miss. Returns `UnknownKey` when the provider does not publish the kid
    /// and `JwksUnavailable` when the endpoint stays unreachable.
    pub async fn key_for(&self, kid: &str) -> Result<VerificationKey, AuthError> {
        // Fast path: read-mostly lookup
        {
            let keys = self.keys.read().await;
            if let Some(key) = keys.get(kid) {
                return Ok(key.clone());
            }
        }

        // Slow path: serialize the refetch so a burst of misses does one fetch
        let mut last_refresh = self.refresh.lock().await;

        // Another waiter may have refreshed while we queued
        {
            let keys = self.keys.read().await;
            if let Some(key) = keys.get(kid) {
                return Ok(key.clone());
            }
        }

        // A kid the provider does not publish must not trigger a fetch storm
        if let Some(at) = *last_refresh {
            if at.elapsed() < REFRESH_DEBOUNCE {
                return Err(AuthError::UnknownKey);
            }
        }

        let fetched = self.fetch_with_retry().await?;
        *last_refresh = Some(Instant::now());

        let mut keys = self.keys.write().await;
        *keys = fetched;
        keys.get(kid).cloned().ok_or(AuthError::UnknownKey)
    }

    async fn fetch_with_retry(&self) -> Result<HashMap<String, VerificationKey>, AuthError> {
        let mut backoff = FETCH_BACKOFF;
        let mut last_error = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_once().await {
                Ok(document) => {
                    let keys = build_keys(document);
                    if keys.is_empty() {
                        warn!(jwks_uri = %self.jwks_uri, "JWKS contained no usable keys");
                    } else {
                        info!(jwks_uri = %self.jwks_uri, count = keys.len(), "Refreshed JWKS");
                    }
                    return Ok(keys);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "JWKS fetch failed");
                    last_error = Some(e);
                    if attempt < FETCH_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        warn!(
            jwks_uri = %self.jwks_uri,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "JWKS unreachable after retries"
        );
        Err(AuthError::JwksUnavailable)
    }

    async fn fetch_once(&self) -> Result<JwksDocument, reqwest::Error> {
        self.http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json::<JwksDocument>()
            .await
    }

    /// Seed a key directly, bypassing the network. Test hook only.
    #[cfg(test)]
    pub(crate) async fn prime(&self, kid: &str, key: VerificationKey) {
        self.keys.write().await.insert(kid.to_string(), key);
    }
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    alg: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    // RSA
    n: Option<String>,
    e: Option<String>,
    // EC
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// Build the kid-indexed key map, skipping keys this service cannot use.
fn build_keys(document: JwksDocument) -> HashMap<String, VerificationKey> {
    let mut keys = HashMap::new();
    for jwk in document.keys {
        let Some(kid) = jwk.kid.clone() else {
            warn!("Skipping JWK without kid");
            continue;
        };
        if matches!(jwk.key_use.as_deref(), Some(u) if u != "sig") {
            continue;
        }
        match parse_jwk(&jwk) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(reason) => {
                warn!(kid = %kid, reason, "Skipping unusable JWK");
            }
        }
    }
    keys
}

fn parse_jwk(jwk: &Jwk) -> Result<VerificationKey, &'static str> {
    match jwk.kty.as_str() {
        "RSA" => {
            if matches!(jwk.alg.as_deref(), Some(a) if a != "RS256") {
                return Err("unsupported RSA algorithm");
            }
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                return Err("RSA key missing n/e");
            };
            let key = DecodingKey::from_rsa_components(n, e).map_err(|_| "invalid RSA components")?;
            Ok(VerificationKey {
                key,
                algorithm: Algorithm::RS256,
            })
        }
        "EC" => {
            if matches!(jwk.alg.as_deref(), Some(a) if a != "ES256") {
                return Err("unsupported EC algorithm");
            }
            if matches!(jwk.crv.as_deref(), Some(c) if c != "P-256") {
                return Err("unsupported EC curve");
            }
            let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                return Err("EC key missing x/y");
            };
            let key = DecodingKey::from_ec_components(x, y).map_err(|_| "invalid EC components")?;
            Ok(VerificationKey {
                key,
                algorithm: Algorithm::ES256,
            })
        }
        _ => Err("unsupported key type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn rsa_jwk(kid: Option<&str>) -> Jwk {
        Jwk {
            kid: kid.map(str::to_string),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(URL_SAFE_NO_PAD.encode([0xACu8; 256])),
            e: Some(URL_SAFE_NO_PAD.encode([0x01, 0x00, 0x01])),
            crv: None,
            x: None,
            y: None,
        }
    }

    #[test]
    fn builds_rsa_keys_by_kid() {
        let keys = build_keys(JwksDocument {
            keys: vec![rsa_jwk(Some("key-1")), rsa_jwk(Some("key-2"))],
        });
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["key-1"].algorithm, Algorithm::RS256);
    }

    #[test]
    fn builds_ec_key_from_p256_point() {
        use p256::ecdsa::SigningKey;
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let signing = SigningKey::random(&mut rand::thread_rng());
        let point = signing.verifying_key().to_encoded_point(false);

        let jwk = Jwk {
            kid: Some("ec-1".to_string()),
            kty: "EC".to_string(),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(point.x().unwrap())),
            y: Some(URL_SAFE_NO_PAD.encode(point.y().unwrap())),
        };

        let keys = build_keys(JwksDocument { keys: vec![jwk] });
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["ec-1"].algorithm, Algorithm::ES256);
    }

    #[test]
    fn skips_ec_key_on_foreign_curve() {
        let jwk = Jwk {
            kid: Some("ec-384".to_string()),
            kty: "EC".to_string(),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-384".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode([1u8; 48])),
            y: Some(URL_SAFE_NO_PAD.encode([2u8; 48])),
        };
        let keys = build_keys(JwksDocument { keys: vec![jwk] });
        assert!(keys.is_empty());
    }

    #[test]
    fn skips_keys_without_kid() {
        let keys = build_keys(JwksDocument {
            keys: vec![rsa_jwk(None)],
        });
        assert!(keys.is_empty());
    }

    #[test]
    fn skips_unsupported_key_types() {
        let mut oct = rsa_jwk(Some("oct-1"));
        oct.kty = "oct".to_string();
        let keys = build_keys(JwksDocument { keys: vec![oct] });
        assert!(keys.is_empty());
    }

    #[test]
    fn skips_encryption_keys() {
        let mut enc = rsa_jwk(Some("enc-1"));
        enc.key_use = Some("enc".to_string());
        let keys = build_keys(JwksDocument { keys: vec![enc] });
        assert!(keys.is_empty());
    }

    #[test]
    fn skips_rsa_with_foreign_algorithm() {
        let mut jwk = rsa_jwk(Some("ps-1"));
        jwk.alg = Some("PS256".to_string());
        let keys = build_keys(JwksDocument { keys: vec![jwk] });
        assert!(keys.is_empty());
    }
}
