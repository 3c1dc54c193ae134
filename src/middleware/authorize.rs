use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::audit::{AuditEvent, DecisionKind};
use crate::auth::roles::any_role_grants;
use crate::auth::{Claims, Permission, Role};
use crate::error::ApiError;
use crate::state::AppState;

use super::context::{roles_hash, MemoKey, RequestContext};

/// What a guarded route demands of the caller's claims.
#[derive(Debug, Clone)]
pub enum Requirement {
    Role(Role),
    AnyRole(Vec<Role>),
    Permission(Permission),
}

impl Requirement {
    fn kind(&self) -> DecisionKind {
        match self {
            Self::Role(_) => DecisionKind::Role,
            Self::AnyRole(_) => DecisionKind::AnyRole,
            Self::Permission(_) => DecisionKind::Permission,
        }
    }

    /// Stable name, used as memo-key component and audit requirement.
    fn describe(&self) -> String {
        match self {
            Self::Role(role) => role.as_str().to_string(),
            Self::AnyRole(roles) => roles
                .iter()
                .map(Role::as_str)
                .collect::<Vec<_>>()
                .join("|"),
            Self::Permission(permission) => permission.as_str().to_string(),
        }
    }

    fn denial_detail(&self) -> String {
        match self {
            Self::Role(role) => format!("Required role(s): {}", role.as_str()),
            Self::AnyRole(roles) => format!(
                "Required role(s): {}",
                roles.iter().map(Role::as_str).collect::<Vec<_>>().join(", ")
            ),
            Self::Permission(permission) => {
                format!("Required permission: {}", permission.as_str())
            }
        }
    }

    fn denial_reason(&self) -> &'static str {
        match self {
            Self::Role(_) => "required role not presented",
            Self::AnyRole(_) => "none of the required roles presented",
            Self::Permission(_) => "no presented role grants the permission",
        }
    }

    fn evaluate(&self, claims: &Claims) -> bool {
        match self {
            Self::Role(role) => claims.has_role(role.as_str()),
            Self::AnyRole(roles) => roles.iter().any(|role| claims.has_role(role.as_str())),
            Self::Permission(permission) => {
                any_role_grants(claims.roles.iter().map(String::as_str), *permission)
            }
        }
    }
}

/// Per-route guard state for [`enforce`]. Built once at router construction.
#[derive(Clone)]
pub struct Guard {
    state: AppState,
    requirement: Requirement,
}

impl Guard {
    pub fn role(state: &AppState, role: Role) -> Self {
        Self {
            state: state.clone(),
            requirement: Requirement::Role(role),
        }
    }

    pub fn any_role(state: &AppState, roles: Vec<Role>) -> Self {
        Self {
            state: state.clone(),
            requirement: Requirement::AnyRole(roles),
        }
    }

    pub fn permission(state: &AppState, permission: Permission) -> Self {
        Self {
            state: state.clone(),
            requirement: Requirement::Permission(permission),
        }
    }
}

/// Route-layer authorization check against the admitted claims.
///
/// Decisions are memoized per request; a repeated identical check reuses the
/// stored verdict and, on denial, does not emit a second audit event.
pub async fn enforce(State(guard): State<Guard>, request: Request, next: Next) -> Response {
    let Some(ctx) = request.extensions().get::<RequestContext>() else {
        return ApiError::ContextMissing.into_response();
    };

    let key = MemoKey {
        tenant_id: ctx.claims.tenant_id,
        subject: ctx.claims.subject.clone(),
        roles_hash: roles_hash(&ctx.claims.roles),
        requirement: guard.requirement.describe(),
    };

    let allowed = match ctx.memo.get(&key) {
        Some(decision) => decision,
        None => {
            let decision = guard.requirement.evaluate(&ctx.claims);
            ctx.memo.put(key, decision);
            if !decision {
                guard.state.audit.emit(AuditEvent {
                    timestamp: Utc::now(),
                    user_id: ctx.claims.subject.clone(),
                    tenant_id: ctx.claims.tenant_id,
                    roles_presented: ctx.claims.roles_presented(),
                    endpoint: request.uri().path().to_string(),
                    decision_kind: guard.requirement.kind(),
                    requirement: guard.requirement.describe(),
                    reason: guard.requirement.denial_reason().to_string(),
                });
            }
            decision
        }
    };

    if allowed {
        next.run(request).await
    } else {
        ApiError::Forbidden(guard.requirement.denial_detail()).into_response()
    }
}
