use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use super::error::AuthError;
use super::jwks::JwksCache;
use super::service_account::{hash_token, RevocationIndex, ServiceAccountToken};
use super::{Claims, TokenKind, ROLES_CLAIM, TENANT_ID_CLAIM};

/// Turns a raw bearer token into [`Claims`] or a typed validation failure.
///
/// Two token flavors share the channel: opaque service-account secrets and
/// signed JWTs. The service-account hash lookup runs first so that a signed
/// but revoked service token can never be accepted on signature alone.
pub struct TokenValidator {
    jwks: Arc<JwksCache>,
    revocation: Arc<dyn RevocationIndex>,
    expected_algorithm: Algorithm,
    audience: String,
}

impl TokenValidator {
    pub fn new(
        jwks: Arc<JwksCache>,
        revocation: Arc<dyn RevocationIndex>,
        expected_algorithm: Algorithm,
        audience: String,
    ) -> Self {
        Self {
            jwks,
            revocation,
            expected_algorithm,
            audience,
        }
    }

    pub async fn validate(&self, raw: &str) -> Result<Claims, AuthError> {
        if raw.is_empty() {
            return Err(AuthError::MissingToken);
        }

        // Revocation precheck before any JWT work
        let token_hash = hash_token(raw);
        match self.revocation.find_by_hash(&token_hash).await {
            Ok(Some(record)) if record.is_revoked => {
                warn!(
                    token_id = %record.token_id,
                    tenant_id = %record.tenant_id,
                    "Rejected revoked service-account token"
                );
                return Err(AuthError::Revoked);
            }
            Ok(Some(record)) => {
                self.revocation.touch_last_used(&token_hash);
                return Ok(service_account_claims(record));
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Service-account index lookup failed");
                return Err(AuthError::StoreUnavailable);
            }
        }

        // JWT path
        let (algorithm, kid) = parse_header(raw)?;
        if algorithm != self.expected_algorithm {
            return Err(AuthError::AlgorithmNotAllowed);
        }

        let verification_key = self.jwks.key_for(&kid).await?;
        if verification_key.algorithm != algorithm {
            return Err(AuthError::AlgorithmNotAllowed);
        }

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation.validate_nbf = true;

        let token_data = decode::<Value>(raw, &verification_key.key, &validation)
            .map_err(map_decode_error)?;

        extract_claims(&token_data.claims)
    }
}

/// Decode the JWT header without verification.
///
/// Done by hand rather than `decode_header` so that a disallowed algorithm
/// (`none`, HS256, …) is distinguishable from a structurally broken token.
fn parse_header(raw: &str) -> Result<(Algorithm, String), AuthError> {
    let mut parts = raw.split('.');
    let header_b64 = parts.next().ok_or(AuthError::MalformedToken)?;
    if parts.count() != 2 {
        return Err(AuthError::MalformedToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| AuthError::MalformedToken)?;
    let header: Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::MalformedToken)?;

    let algorithm = match header.get("alg").and_then(Value::as_str) {
        Some("RS256") => Algorithm::RS256,
        Some("ES256") => Algorithm::ES256,
        Some(_) => return Err(AuthError::AlgorithmNotAllowed),
        None => return Err(AuthError::MalformedToken),
    };

    let kid = header
        .get("kid")
        .and_then(Value::as_str)
        .ok_or(AuthError::MalformedToken)?
        .to_string();

    Ok((algorithm, kid))
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::Expired,
        ErrorKind::InvalidAudience => AuthError::WrongAudience,
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => AuthError::WrongAudience,
        ErrorKind::MissingRequiredClaim(_) => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        ErrorKind::InvalidAlgorithm => AuthError::AlgorithmNotAllowed,
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => AuthError::MalformedToken,
        _ => AuthError::BadSignature,
    }
}

/// Pull the namespaced custom claims out of a verified payload.
fn extract_claims(payload: &Value) -> Result<Claims, AuthError> {
    let tenant_id = match payload.get(TENANT_ID_CLAIM) {
        None | Some(Value::Null) => return Err(AuthError::MissingTenantId),
        Some(Value::String(s)) => {
            Uuid::parse_str(s).map_err(|_| AuthError::MalformedTenantId)?
        }
        Some(_) => return Err(AuthError::MalformedTenantId),
    };

    // Missing or malformed roles degrade to the empty set
    let roles: BTreeSet<String> = payload
        .get(ROLES_CLAIM)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_ascii_lowercase)
                .collect()
        })
        .unwrap_or_default();

    let subject = payload
        .get("sub")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let audience = match payload.get("aud") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(values)) => values.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    };

    Ok(Claims {
        subject,
        tenant_id,
        roles,
        audience,
        issued_at: timestamp_claim(payload, "iat"),
        expires_at: timestamp_claim(payload, "exp"),
        token_kind: TokenKind::Jwt,
    })
}

fn timestamp_claim(payload: &Value, name: &str) -> Option<chrono::DateTime<Utc>> {
    payload
        .get(name)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn service_account_claims(record: ServiceAccountToken) -> Claims {
    let mut roles = BTreeSet::new();
    roles.insert(record.role.to_ascii_lowercase());
    Claims {
        subject: record.token_id.to_string(),
        tenant_id: record.tenant_id,
        roles,
        audience: None,
        issued_at: Some(record.created_at),
        expires_at: None,
        token_kind: TokenKind::ServiceAccount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::VerificationKey;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, DecodingKey, EncodingKey, Header};
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const AUDIENCE: &str = "car-platform";
    const KID: &str = "test-key-1";
    const TENANT: &str = "550e8400-e29b-41d4-a716-446655440000";

    struct FakeIndex {
        records: Mutex<HashMap<String, ServiceAccountToken>>,
        touches: AtomicUsize,
        fail: bool,
    }

    impl FakeIndex {
        fn empty() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                touches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn with_record(raw_token: &str, is_revoked: bool) -> Self {
            let index = Self::empty();
            let record = ServiceAccountToken {
                token_id: Uuid::new_v4(),
                tenant_id: Uuid::parse_str(TENANT).unwrap(),
                token_hash: hash_token(raw_token),
                name: "etl-loader".to_string(),
                role: "Ingestion".to_string(),
                created_by: "admin@example.com".to_string(),
                created_at: Utc::now(),
                last_used: None,
                revoked_at: is_revoked.then(Utc::now),
                is_revoked,
            };
            index
                .records
                .lock()
                .unwrap()
                .insert(record.token_hash.clone(), record);
            index
        }
    }

    #[async_trait]
    impl RevocationIndex for FakeIndex {
        async fn find_by_hash(
            &self,
            token_hash: &str,
        ) -> Result<Option<ServiceAccountToken>, sqlx::Error> {
            if self.fail {
                return Err(sqlx::Error::PoolClosed);
            }
            Ok(self.records.lock().unwrap().get(token_hash).cloned())
        }

        fn touch_last_used(&self, _token_hash: &str) {
            self.touches.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestKeys {
        encoding: EncodingKey,
        verification: VerificationKey,
    }

    fn es256_keys() -> TestKeys {
        let signing = SigningKey::random(&mut rand::thread_rng());
        let pem = signing.to_pkcs8_pem(LineEnding::LF).unwrap();
        let encoding = EncodingKey::from_ec_pem(pem.as_bytes()).unwrap();

        let point = signing.verifying_key().to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.encode(point.x().unwrap());
        let y = URL_SAFE_NO_PAD.encode(point.y().unwrap());
        let verification = VerificationKey {
            key: DecodingKey::from_ec_components(&x, &y).unwrap(),
            algorithm: Algorithm::ES256,
        };

        TestKeys {
            encoding,
            verification,
        }
    }

    async fn validator_with(
        keys: &TestKeys,
        index: FakeIndex,
    ) -> (TokenValidator, Arc<FakeIndex>) {
        let jwks = Arc::new(JwksCache::new("http://127.0.0.1:1/jwks.json".to_string()));
        jwks.prime(KID, keys.verification.clone()).await;
        let index = Arc::new(index);
        let validator = TokenValidator::new(
            jwks,
            index.clone(),
            Algorithm::ES256,
            AUDIENCE.to_string(),
        );
        (validator, index)
    }

    fn sign(keys: &TestKeys, payload: Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(KID.to_string());
        encode(&header, &payload, &keys.encoding).unwrap()
    }

    fn standard_payload() -> Value {
        let exp = Utc::now().timestamp() + 600;
        json!({
            "sub": "auth0|user-42",
            "aud": AUDIENCE,
            "iat": Utc::now().timestamp(),
            "exp": exp,
            TENANT_ID_CLAIM: TENANT,
            ROLES_CLAIM: ["Analyst", "viewer"],
        })
    }

    #[tokio::test]
    async fn valid_jwt_yields_normalized_claims() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let claims = validator
            .validate(&sign(&keys, standard_payload()))
            .await
            .unwrap();

        assert_eq!(claims.subject, "auth0|user-42");
        assert_eq!(claims.tenant_id.to_string(), TENANT);
        assert_eq!(claims.roles_presented(), vec!["analyst", "viewer"]);
        assert_eq!(claims.token_kind, TokenKind::Jwt);
        assert_eq!(claims.audience.as_deref(), Some(AUDIENCE));
    }

    #[tokio::test]
    async fn empty_token_is_missing() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;
        assert_eq!(
            validator.validate("").await.unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[tokio::test]
    async fn revoked_service_token_fails_before_jwt_path() {
        let keys = es256_keys();
        // A structurally valid, correctly signed JWT whose hash is revoked
        let token = sign(&keys, standard_payload());
        let (validator, index) =
            validator_with(&keys, FakeIndex::with_record(&token, true)).await;

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::Revoked
        );
        assert_eq!(index.touches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_service_token_synthesizes_claims() {
        let keys = es256_keys();
        let raw = "car_sa_opaque-secret";
        let (validator, index) =
            validator_with(&keys, FakeIndex::with_record(raw, false)).await;

        let claims = validator.validate(raw).await.unwrap();
        assert_eq!(claims.token_kind, TokenKind::ServiceAccount);
        assert_eq!(claims.tenant_id.to_string(), TENANT);
        assert_eq!(claims.roles_presented(), vec!["ingestion"]);
        assert!(Uuid::parse_str(&claims.subject).is_ok());
        assert_eq!(index.touches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn index_failure_is_unavailable() {
        let keys = es256_keys();
        let mut index = FakeIndex::empty();
        index.fail = true;
        let (validator, _) = validator_with(&keys, index).await;

        assert_eq!(
            validator.validate("anything").await.unwrap_err(),
            AuthError::StoreUnavailable
        );
    }

    #[tokio::test]
    async fn alg_none_is_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(b"{}");
        let token = format!("{header}.{payload}.");

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::AlgorithmNotAllowed
        );
    }

    #[tokio::test]
    async fn hs256_is_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"test-key-1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(b"{}");
        let token = format!("{header}.{payload}.sig");

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::AlgorithmNotAllowed
        );
    }

    #[tokio::test]
    async fn missing_kid_is_malformed() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let token = encode(
            &Header::new(Algorithm::ES256),
            &standard_payload(),
            &keys.encoding,
        )
        .unwrap();

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::MalformedToken
        );
    }

    #[tokio::test]
    async fn garbage_token_is_malformed() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;
        assert_eq!(
            validator.validate("not-a-jwt").await.unwrap_err(),
            AuthError::MalformedToken
        );
    }

    #[tokio::test]
    async fn wrong_signing_key_is_bad_signature() {
        let trusted = es256_keys();
        let rogue = es256_keys();
        let (validator, _) = validator_with(&trusted, FakeIndex::empty()).await;

        // Signed by a different key but claiming the trusted kid
        let token = sign(&rogue, standard_payload());

        assert_eq!(
            validator.validate(&token).await.unwrap_err(),
            AuthError::BadSignature
        );
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let mut payload = standard_payload();
        payload["exp"] = json!(Utc::now().timestamp() - 3600);

        assert_eq!(
            validator
                .validate(&sign(&keys, payload))
                .await
                .unwrap_err(),
            AuthError::Expired
        );
    }

    #[tokio::test]
    async fn audience_mismatch_is_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let mut payload = standard_payload();
        payload["aud"] = json!("some-other-api");

        assert_eq!(
            validator
                .validate(&sign(&keys, payload))
                .await
                .unwrap_err(),
            AuthError::WrongAudience
        );
    }

    #[tokio::test]
    async fn missing_tenant_claim_is_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let mut payload = standard_payload();
        payload.as_object_mut().unwrap().remove(TENANT_ID_CLAIM);

        assert_eq!(
            validator
                .validate(&sign(&keys, payload))
                .await
                .unwrap_err(),
            AuthError::MissingTenantId
        );
    }

    #[tokio::test]
    async fn malformed_tenant_claims_are_rejected() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        for bad in [json!(""), json!("not-a-uuid"), json!(12345)] {
            let mut payload = standard_payload();
            payload[TENANT_ID_CLAIM] = bad;
            assert_eq!(
                validator
                    .validate(&sign(&keys, payload))
                    .await
                    .unwrap_err(),
                AuthError::MalformedTenantId
            );
        }
    }

    #[tokio::test]
    async fn missing_roles_claim_is_empty_set() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let mut payload = standard_payload();
        payload.as_object_mut().unwrap().remove(ROLES_CLAIM);

        let claims = validator.validate(&sign(&keys, payload)).await.unwrap();
        assert!(claims.roles.is_empty());
    }

    #[tokio::test]
    async fn malformed_roles_claim_is_empty_set() {
        let keys = es256_keys();
        let (validator, _) = validator_with(&keys, FakeIndex::empty()).await;

        let mut payload = standard_payload();
        payload[ROLES_CLAIM] = json!("admin");

        let claims = validator.validate(&sign(&keys, payload)).await.unwrap();
        assert!(claims.roles.is_empty());
    }

    #[tokio::test]
    async fn unreachable_jwks_is_unavailable() {
        let keys = es256_keys();
        let jwks = Arc::new(JwksCache::new("http://127.0.0.1:1/jwks.json".to_string()));
        let validator = TokenValidator::new(
            jwks,
            Arc::new(FakeIndex::empty()),
            Algorithm::ES256,
            AUDIENCE.to_string(),
        );

        assert_eq!(
            validator
                .validate(&sign(&keys, standard_payload()))
                .await
                .unwrap_err(),
            AuthError::JwksUnavailable
        );
    }
}
