use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::audit::{spawn_log_writer, AuditSink, ChannelAuditSink};
use crate::auth::jwks::JwksCache;
use crate::auth::service_account::ServiceAccountTokenStore;
use crate::auth::TokenValidator;
use crate::config::AppConfig;
use crate::crypto::Decryptor;
use crate::database::{ControlPlaneStore, TenantResolver};

/// Process-wide shared resources, built once at startup.
///
/// All interior synchronization lives inside the components; cloning the
/// state is cheap and every clone shares the same caches and stores.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub control_plane: ControlPlaneStore,
    pub validator: Arc<TokenValidator>,
    pub resolver: Arc<TenantResolver>,
    pub service_accounts: Arc<ServiceAccountTokenStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppState {
    /// Connect to the control plane and wire up the admission chain.
    /// Aborts startup if the control plane is unreachable or the encryption
    /// key is malformed.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await
            .context("failed to connect to control-plane database")?;

        let decryptor = Arc::new(
            Decryptor::from_base64_key(&config.encryption_key)
                .context("invalid ENCRYPTION_KEY")?,
        );

        let control_plane = ControlPlaneStore::new(pool.clone());
        let service_accounts = Arc::new(ServiceAccountTokenStore::new(pool));

        let jwks = Arc::new(JwksCache::new(config.auth.jwks_uri.clone()));
        let validator = Arc::new(TokenValidator::new(
            jwks,
            service_accounts.clone(),
            config.auth.algorithm,
            config.auth.audience.clone(),
        ));

        let resolver = Arc::new(TenantResolver::new(
            control_plane.clone(),
            decryptor,
            config.tenant_cache_ttl,
        ));

        let (audit, rx) = ChannelAuditSink::new();
        spawn_log_writer(rx);

        info!(jwks_uri = %config.auth.jwks_uri, "Admission chain initialized");

        Ok(Self {
            config: Arc::new(config),
            control_plane,
            validator,
            resolver,
            service_accounts,
            audit: Arc::new(audit),
        })
    }

    /// Assemble a state from prebuilt parts. Used by tests to swap in fakes.
    pub fn from_parts(
        config: AppConfig,
        control_plane: ControlPlaneStore,
        validator: Arc<TokenValidator>,
        resolver: Arc<TenantResolver>,
        service_accounts: Arc<ServiceAccountTokenStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            control_plane,
            validator,
            resolver,
            service_accounts,
            audit,
        }
    }

    /// Drop cached tenant engines and close the control-plane pool. Engines
    /// held by in-flight requests close when their last clone drops.
    pub async fn close(&self) {
        self.resolver.invalidate_all().await;
        self.control_plane.pool().close().await;
        info!("Admission chain shut down");
    }
}
