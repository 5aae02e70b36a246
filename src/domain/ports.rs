/*
   Ports through which the webhook management surface talks to the rest of the backend.
*/

use std::collections::HashSet;

use async_trait::async_trait;

/// Caller of a management operation, as identified by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Tenant account the caller acts for
    pub account_id: String,

    pub role: String,
}

impl Actor {
    pub fn new(account_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            role: role.into(),
        }
    }
}

/// Decides who may manage webhook subscriptions. Role-based access control
/// lives outside this service; this trait is its seam.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_manage_webhooks(&self, actor: &Actor) -> bool;
}

/// Grants access to a fixed set of roles (case-insensitive).
#[derive(Debug, Clone)]
pub struct RoleAllowList {
    roles: HashSet<String>,
}

impl RoleAllowList {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            roles: roles
                .into_iter()
                .map(|r| r.as_ref().trim().to_ascii_lowercase())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl AccessControl for RoleAllowList {
    async fn can_manage_webhooks(&self, actor: &Actor) -> bool {
        self.roles.contains(&actor.role.trim().to_ascii_lowercase())
    }
}
