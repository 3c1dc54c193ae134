#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use car_platform_api::audit::{AuditEvent, AuditSink};
use car_platform_api::auth::jwks::JwksCache;
use car_platform_api::auth::service_account::{
    hash_token, RevocationIndex, ServiceAccountToken, ServiceAccountTokenStore,
};
use car_platform_api::auth::TokenValidator;
use car_platform_api::config::AppConfig;
use car_platform_api::crypto::Decryptor;
use car_platform_api::database::{ControlPlaneStore, TenantResolver};
use car_platform_api::state::AppState;

pub const TENANT: &str = "550e8400-e29b-41d4-a716-446655440000";

/// Configuration pointing at addresses nothing listens on; the chain is
/// exercised in-process and anything that would leave it fails fast.
pub fn test_config() -> AppConfig {
    AppConfig::from_lookup(|name| match name {
        "AUTH_DOMAIN" => Some("auth.car.test".to_string()),
        "AUTH_ALGORITHM" => Some("ES256".to_string()),
        "AUTH_AUDIENCE" => Some("car-platform".to_string()),
        "AUTH_JWKS_URI" => Some("http://127.0.0.1:1/jwks.json".to_string()),
        "DATABASE_URL" => Some("postgres://car:pw@127.0.0.1:1/car_main".to_string()),
        "ENCRYPTION_KEY" => Some(URL_SAFE.encode([7u8; 32])),
        _ => None,
    })
    .expect("test config must build")
}

/// A pool that never connects; queries against it fail fast.
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy("postgres://car:pw@127.0.0.1:1/car_main")
        .expect("lazy pool")
}

/// Audit sink that records every event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory stand-in for the service-account index.
#[derive(Default)]
pub struct FakeIndex {
    records: Mutex<HashMap<String, ServiceAccountToken>>,
}

impl FakeIndex {
    pub fn add_token(&self, raw_token: &str, role: &str, is_revoked: bool) -> Uuid {
        let token_id = Uuid::new_v4();
        let record = ServiceAccountToken {
            token_id,
            tenant_id: Uuid::parse_str(TENANT).unwrap(),
            token_hash: hash_token(raw_token),
            name: "test-token".to_string(),
            role: role.to_string(),
            created_by: "admin@example.com".to_string(),
            created_at: Utc::now(),
            last_used: None,
            revoked_at: is_revoked.then(Utc::now),
            is_revoked,
        };
        self.records
            .lock()
            .unwrap()
            .insert(record.token_hash.clone(), record);
        token_id
    }
}

#[async_trait]
impl RevocationIndex for FakeIndex {
    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ServiceAccountToken>, sqlx::Error> {
        Ok(self.records.lock().unwrap().get(token_hash).cloned())
    }

    fn touch_last_used(&self, _token_hash: &str) {}
}

/// Assemble an [`AppState`] around fakes for the seams and lazy pools for
/// the stores.
pub fn test_state(
    index: Arc<dyn RevocationIndex>,
    audit: Arc<dyn AuditSink>,
) -> AppState {
    let config = test_config();
    let pool = lazy_pool();
    let control_plane = ControlPlaneStore::new(pool.clone());

    let decryptor = Arc::new(Decryptor::from_base64_key(&config.encryption_key).unwrap());
    let jwks = Arc::new(JwksCache::new(config.auth.jwks_uri.clone()));
    let validator = Arc::new(TokenValidator::new(
        jwks,
        index,
        Algorithm::ES256,
        config.auth.audience.clone(),
    ));
    let resolver = Arc::new(TenantResolver::new(
        control_plane.clone(),
        decryptor,
        config.tenant_cache_ttl,
    ));
    let service_accounts = Arc::new(ServiceAccountTokenStore::new(pool));

    AppState::from_parts(
        config,
        control_plane,
        validator,
        resolver,
        service_accounts,
        audit,
    )
}
