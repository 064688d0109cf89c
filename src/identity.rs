//! Principals issued by the external identity provider
use crate::error::{LmsError, LmsResult};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    Learner,
}

/// The acting principal of a request. Read-only for the whole core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

/// Hands out the identity attached to the current request, if any.
pub trait IdentitySource {
    fn current_identity(&self) -> Option<Identity>;
}

impl IdentitySource for Option<Identity> {
    fn current_identity(&self) -> Option<Identity> {
        self.clone()
    }
}

impl Identity {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }
    pub fn learner(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Learner,
        }
    }
    /// Resolve the acting identity, failing when the provider has none.
    pub fn resolve(source: &dyn IdentitySource) -> LmsResult<Self> {
        source.current_identity().ok_or(LmsError::Unauthenticated)
    }
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// provisioned by user management, outside of this crate
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub role: Role,
    #[n(2)]
    pub department: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            department: None,
        }
    }
    pub fn set_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id.clone(),
            role: self.role,
        }
    }
}
