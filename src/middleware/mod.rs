pub mod admission;
pub mod authorize;
pub mod context;

pub use admission::admission_middleware;
pub use authorize::{enforce, Guard, Requirement};
pub use context::{AuthzMemo, CurrentClaims, RequestContext, TenantDb, TenantId};
