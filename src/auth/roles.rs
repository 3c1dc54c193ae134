use serde::{Deserialize, Serialize};

/// Platform roles. Closed set; the role carried by a token that matches none
/// of these grants no permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Viewer,
    Ingestion,
}

/// Platform permissions. The role-to-permission mapping is the static table
/// below; changing it is a code change, never data-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateUser,
    DeleteUser,
    UpdateUser,
    ListUsers,
    ModifyTenantSettings,
    ViewTenantSettings,
    AccessBilling,
    UploadDocument,
    EditDocument,
    DeleteDocument,
    ViewDocument,
    SearchDocuments,
    OverrideAiDecision,
    TrainModel,
    SystemAdmin,
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::CreateUser,
    Permission::DeleteUser,
    Permission::UpdateUser,
    Permission::ListUsers,
    Permission::ModifyTenantSettings,
    Permission::ViewTenantSettings,
    Permission::AccessBilling,
    Permission::UploadDocument,
    Permission::EditDocument,
    Permission::DeleteDocument,
    Permission::ViewDocument,
    Permission::SearchDocuments,
    Permission::OverrideAiDecision,
    Permission::TrainModel,
    Permission::SystemAdmin,
];

const ANALYST_PERMISSIONS: &[Permission] = &[
    Permission::ViewTenantSettings,
    Permission::UploadDocument,
    Permission::EditDocument,
    Permission::DeleteDocument,
    Permission::ViewDocument,
    Permission::SearchDocuments,
    Permission::OverrideAiDecision,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    Permission::ViewTenantSettings,
    Permission::ViewDocument,
    Permission::SearchDocuments,
];

const INGESTION_PERMISSIONS: &[Permission] = &[Permission::UploadDocument];

impl Role {
    /// Parse a role name, case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "analyst" => Some(Self::Analyst),
            "viewer" => Some(Self::Viewer),
            "ingestion" => Some(Self::Ingestion),
            _ => None,
        }
    }

    /// Canonical lowercase name, as stored in tokens and the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Analyst => "analyst",
            Self::Viewer => "viewer",
            Self::Ingestion => "ingestion",
        }
    }

    /// Permissions granted by this role.
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Self::Admin => ADMIN_PERMISSIONS,
            Self::Analyst => ANALYST_PERMISSIONS,
            Self::Viewer => VIEWER_PERMISSIONS,
            Self::Ingestion => INGESTION_PERMISSIONS,
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl Permission {
    /// Canonical snake_case name, used in guard messages and audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateUser => "create_user",
            Self::DeleteUser => "delete_user",
            Self::UpdateUser => "update_user",
            Self::ListUsers => "list_users",
            Self::ModifyTenantSettings => "modify_tenant_settings",
            Self::ViewTenantSettings => "view_tenant_settings",
            Self::AccessBilling => "access_billing",
            Self::UploadDocument => "upload_document",
            Self::EditDocument => "edit_document",
            Self::DeleteDocument => "delete_document",
            Self::ViewDocument => "view_document",
            Self::SearchDocuments => "search_documents",
            Self::OverrideAiDecision => "override_ai_decision",
            Self::TrainModel => "train_model",
            Self::SystemAdmin => "system_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if any of the presented role names grants the permission.
///
/// Unknown role names are ignored rather than rejected; a token carrying
/// `["viewer", "superuser"]` still grants viewer permissions.
pub fn any_role_grants<'a, I>(role_names: I, permission: Permission) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    role_names
        .into_iter()
        .filter_map(Role::parse)
        .any(|role| role.grants(permission))
}
