use serde::{Deserialize, Serialize};

/// The fixed permission vocabulary named in the API table. A deployer's
/// identity provider maps its own roles onto this set; this crate does not
/// prescribe how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    TaskSubmit,
    TaskViewAll,
    TaskDeleteAll,
    QueueView,
    QueueManage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::TaskSubmit => "task.submit",
            Permission::TaskViewAll => "task.view_all",
            Permission::TaskDeleteAll => "task.delete_all",
            Permission::QueueView => "queue.view",
            Permission::QueueManage => "queue.manage",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    pub fn new(perms: Vec<Permission>) -> Self {
        Self(perms)
    }

    pub fn all() -> Self {
        Self(vec![
            Permission::TaskSubmit,
            Permission::TaskViewAll,
            Permission::TaskDeleteAll,
            Permission::QueueView,
            Permission::QueueManage,
        ])
    }

    pub fn has(&self, perm: Permission) -> bool {
        self.0.contains(&perm)
    }
}

/// The authenticated caller attached to a request by the auth middleware.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub permissions: PermissionSet,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            permissions: PermissionSet::default(),
        }
    }

    pub fn has(&self, perm: Permission) -> bool {
        self.permissions.has(perm)
    }

    /// True when the principal may act on a task owned by `owner`: either
    /// they own it themselves, or they hold the named override permission.
    pub fn can_access_owned(&self, owner: Option<&str>, override_perm: Permission) -> bool {
        if self.has(override_perm) {
            return true;
        }
        owner.is_some_and(|o| o == self.user_id)
    }
}

/// Resolves the authenticated principal for an inbound request from the two
/// credential forms the API accepts: a bearer session token or an API-key
/// header. This repo does not issue or validate those credentials against a
/// real identity provider (out of scope, §1) — it only derives a principal
/// and permission set from them, which is the minimum needed to drive the
/// permission model in §6. A bearer token names a regular submitting user;
/// an API key listed in `admin_api_keys` is granted every permission, any
/// other API key names a service tenant limited to submitting its own work.
pub fn resolve_principal(
    bearer_token: Option<&str>,
    api_key: Option<&str>,
    admin_api_keys: &[String],
) -> Principal {
    if let Some(key) = api_key {
        if admin_api_keys.iter().any(|k| k == key) {
            return Principal {
                user_id: format!("admin:{key}"),
                permissions: PermissionSet::all(),
            };
        }
        return Principal {
            user_id: format!("apikey:{key}"),
            permissions: PermissionSet::new(vec![Permission::TaskSubmit]),
        };
    }
    if let Some(token) = bearer_token {
        return Principal {
            user_id: token.to_string(),
            permissions: PermissionSet::new(vec![Permission::TaskSubmit]),
        };
    }
    Principal::anonymous()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_api_key_gets_every_permission() {
        let admin_keys = vec!["sk-admin-1".to_string()];
        let principal = resolve_principal(None, Some("sk-admin-1"), &admin_keys);
        assert!(principal.has(Permission::TaskViewAll));
        assert!(principal.has(Permission::QueueManage));
    }

    #[test]
    fn ordinary_bearer_token_only_submits() {
        let principal = resolve_principal(Some("u1"), None, &[]);
        assert_eq!(principal.user_id, "u1");
        assert!(principal.has(Permission::TaskSubmit));
        assert!(!principal.has(Permission::TaskViewAll));
    }

    #[test]
    fn no_credential_is_anonymous() {
        let principal = resolve_principal(None, None, &[]);
        assert!(!principal.has(Permission::TaskSubmit));
    }
}
