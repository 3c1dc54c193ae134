use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::crypto::{CryptoError, Decryptor};

use super::cache::{CacheStats, TtlCache};
use super::control_plane::{tenant_database_name, ControlPlaneStore};

/// Probe timeout for a freshly constructed engine.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from tenant resolution. The HTTP layer collapses
/// `InvalidTenantId`, `TenantNotFound`, and `TenantInactive` into one 401
/// body so callers cannot probe which tenants exist.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid tenant identifier")]
    InvalidTenantId,

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("Tenant is not active")]
    TenantInactive,

    #[error("Tenant database connection test failed")]
    ConnectionTestFailed,

    #[error("Control plane unavailable")]
    ControlPlane(#[from] sqlx::Error),

    #[error(transparent)]
    Decrypt(#[from] CryptoError),
}

/// A live, tenant-scoped database handle.
///
/// `db` is a pool clone: it stays valid after the cache entry expires or is
/// invalidated, and the underlying engine closes only once every clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub tenant_id: Uuid,
    pub db: PgPool,
    pub cache_hit: bool,
}

/// Resolves tenant ids to live database engines through a TTL cache.
///
/// On a miss: control-plane lookup, connection-string decryption, engine
/// construction, and a health probe; nothing is cached unless the probe
/// succeeds. Concurrent misses for one tenant collapse to a single build.
pub struct TenantResolver {
    cache: TtlCache<PgPool>,
    store: ControlPlaneStore,
    decryptor: Arc<Decryptor>,
}

impl TenantResolver {
    pub fn new(store: ControlPlaneStore, decryptor: Arc<Decryptor>, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            store,
            decryptor,
        }
    }

    /// Resolve a tenant id (string form, re-validated here as defense in
    /// depth) to a live engine.
    pub async fn resolve(&self, tenant_id: &str) -> Result<ResolvedTenant, ResolveError> {
        let id = Uuid::parse_str(tenant_id).map_err(|_| ResolveError::InvalidTenantId)?;

        let (db, cache_hit) = self
            .cache
            .get_or_try_insert_with(id, || self.build_engine(id))
            .await?;

        Ok(ResolvedTenant {
            tenant_id: id,
            db,
            cache_hit,
        })
    }

    async fn build_engine(&self, tenant_id: Uuid) -> Result<PgPool, ResolveError> {
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or(ResolveError::TenantNotFound)?;
        if !tenant.is_active() {
            return Err(ResolveError::TenantInactive);
        }

        let database = self
            .store
            .find_active_database(tenant_id)
            .await?
            .ok_or(ResolveError::TenantNotFound)?;

        let expected = tenant_database_name(tenant_id);
        if database.database_name != expected {
            warn!(
                tenant_id = %tenant_id,
                database_name = %database.database_name,
                "Tenant database name deviates from convention"
            );
        }

        let url = self
            .decryptor
            .decrypt_string(&database.connection_string_encrypted, None)?;
        // A decrypt that yields a non-URL means the key is wrong; stay opaque
        url::Url::parse(&url).map_err(|_| CryptoError::InvalidData)?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&url)
            .map_err(|_| ResolveError::ConnectionTestFailed)?;

        // Probe before caching; a dead engine must never be installed
        let probe = tokio::time::timeout(
            PROBE_TIMEOUT,
            sqlx::query("SELECT 1").execute(&pool),
        )
        .await;
        match probe {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant_id, error = %e, "Tenant engine probe failed");
                return Err(ResolveError::ConnectionTestFailed);
            }
            Err(_elapsed) => {
                warn!(tenant_id = %tenant_id, "Tenant engine probe timed out");
                return Err(ResolveError::ConnectionTestFailed);
            }
        }

        info!(
            tenant_id = %tenant_id,
            database_name = %database.database_name,
            "Connected tenant database engine"
        );
        Ok(pool)
    }

    /// Evict one tenant. The engine is not closed here; in-flight requests
    /// holding pool clones keep it alive until they finish.
    pub async fn invalidate(&self, tenant_id: Uuid) -> bool {
        self.cache.invalidate(tenant_id).await
    }

    /// Evict every tenant.
    pub async fn invalidate_all(&self) -> usize {
        self.cache.invalidate_all().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
