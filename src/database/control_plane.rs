use std::time::Duration;

use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

/// Per-read timeout against the control plane.
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
/// Bounded retry on transient failure.
const QUERY_ATTEMPTS: u32 = 3;
const QUERY_BACKOFF: Duration = Duration::from_millis(50);

/// One row of `tenants`.
#[derive(Debug, Clone, FromRow)]
pub struct TenantRecord {
    pub tenant_id: Uuid,
    pub name: String,
    pub environment: String,
    pub status: String,
}

impl TenantRecord {
    /// Only active tenants are resolvable by the admission chain.
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// One row of `tenant_databases`.
#[derive(Debug, Clone, FromRow)]
pub struct TenantDatabaseRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub connection_string_encrypted: String,
    pub database_name: String,
    pub status: String,
}

/// Per-tenant database name convention: `car_` plus the UUID with hyphens
/// replaced by underscores.
pub fn tenant_database_name(tenant_id: Uuid) -> String {
    format!("car_{}", tenant_id.to_string().replace('-', "_"))
}

/// Read-only client for the shared control-plane database.
///
/// The store owns no caching; the resolver layers the TTL cache above it.
#[derive(Clone)]
pub struct ControlPlaneStore {
    pool: PgPool,
}

impl ControlPlaneStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>, sqlx::Error> {
        self.read_with_retry(move |pool| async move {
            sqlx::query_as::<_, TenantRecord>(
                "SELECT tenant_id, name, environment, status FROM tenants WHERE tenant_id = $1",
            )
            .bind(tenant_id)
            .fetch_optional(&pool)
            .await
        })
        .await
    }

    /// The single active data-plane database for a tenant.
    pub async fn find_active_database(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantDatabaseRecord>, sqlx::Error> {
        self.read_with_retry(move |pool| async move {
            sqlx::query_as::<_, TenantDatabaseRecord>(
                r#"
                SELECT id, tenant_id, connection_string_encrypted, database_name, status
                FROM tenant_databases
                WHERE tenant_id = $1 AND status = 'active'
                LIMIT 1
                "#,
            )
            .bind(tenant_id)
            .fetch_optional(&pool)
            .await
        })
        .await
    }

    /// Liveness check for the health endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn read_with_retry<T, F, Fut>(&self, op: F) -> Result<T, sqlx::Error>
    where
        F: Fn(PgPool) -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut backoff = QUERY_BACKOFF;
        let mut attempt = 1;
        loop {
            match tokio::time::timeout(QUERY_TIMEOUT, op(self.pool.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempt < QUERY_ATTEMPTS && is_transient(&e) => {
                    debug!(attempt, error = %e, "Retrying control-plane read");
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) if attempt < QUERY_ATTEMPTS => {
                    debug!(attempt, "Control-plane read timed out, retrying");
                }
                Err(_elapsed) => return Err(sqlx::Error::PoolTimedOut),
            }
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }
}

fn is_transient(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_follows_convention() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            tenant_database_name(id),
            "car_550e8400_e29b_41d4_a716_446655440000"
        );
    }

    #[test]
    fn only_active_status_is_active() {
        for (status, expected) in [
            ("active", true),
            ("inactive", false),
            ("suspended", false),
            ("pending", false),
            ("ACTIVE", false),
        ] {
            let record = TenantRecord {
                tenant_id: Uuid::nil(),
                name: "acme".to_string(),
                environment: "production".to_string(),
                status: status.to_string(),
            };
            assert_eq!(record.is_active(), expected, "status {status}");
        }
    }
}
