//! Allow-list based authorization for mutating commands.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::traits::IdentityLookup;

/// The member who issued a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invoker {
    /// Transport-level handle used to address replies.
    pub client_id: String,
    /// Stable unique identifier.
    pub uid: String,
    /// Display name.
    pub nickname: String,
}

impl Invoker {
    pub fn new(
        client_id: impl Into<String>,
        uid: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            uid: uid.into(),
            nickname: nickname.into(),
        }
    }
}

/// How the UID and group checks combine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    /// Either check passing is enough.
    #[default]
    Any,
    /// Both checks must pass.
    All,
}

impl Combine {
    pub const fn from_require_both(require_both: bool) -> Self {
        if require_both {
            Self::All
        } else {
            Self::Any
        }
    }
}

/// Allow-lists for unique identifiers and server groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub allowed_uids: BTreeSet<String>,
    pub allowed_group_ids: BTreeSet<u32>,
    pub combine: Combine,
}

impl PermissionPolicy {
    pub fn new(
        allowed_uids: impl IntoIterator<Item = String>,
        allowed_group_ids: impl IntoIterator<Item = u32>,
        combine: Combine,
    ) -> Self {
        Self {
            allowed_uids: allowed_uids.into_iter().collect(),
            allowed_group_ids: allowed_group_ids.into_iter().collect(),
            combine,
        }
    }

    /// Everyone is allowed when both lists are empty.
    pub fn is_open(&self) -> bool {
        self.allowed_uids.is_empty() && self.allowed_group_ids.is_empty()
    }
}

/// Evaluates a [`PermissionPolicy`] against invokers.
pub struct PermissionGate {
    policy: RwLock<PermissionPolicy>,
    lookup: Arc<dyn IdentityLookup>,
}

impl PermissionGate {
    pub fn new(policy: PermissionPolicy, lookup: Arc<dyn IdentityLookup>) -> Self {
        Self {
            policy: RwLock::new(policy),
            lookup,
        }
    }

    /// Check whether `invoker` may issue commands.
    ///
    /// Group lookup failures count as "not in any allowed group".
    pub async fn check(&self, invoker: &Invoker) -> bool {
        let policy = self.policy.read().clone();

        if policy.is_open() {
            return true;
        }

        let has_uid =
            policy.allowed_uids.is_empty() || policy.allowed_uids.contains(&invoker.uid);

        if policy.combine == Combine::Any && has_uid {
            return true;
        }
        if policy.combine == Combine::All && !has_uid {
            debug!("Denied {}: UID not allowed", invoker.uid);
            return false;
        }

        let has_group = policy.allowed_group_ids.is_empty()
            || match self.lookup.groups(invoker).await {
                Ok(groups) => groups
                    .iter()
                    .any(|group| policy.allowed_group_ids.contains(group)),
                Err(e) => {
                    warn!("Group lookup failed for {}: {e}", invoker.uid);
                    false
                }
            };

        let allowed = match policy.combine {
            Combine::All => has_uid && has_group,
            Combine::Any => has_uid || has_group,
        };
        debug!(
            "Permission for {}: uid={has_uid} group={has_group} -> {allowed}",
            invoker.uid
        );
        allowed
    }

    /// Add a UID; returns false if it was already allowed.
    pub fn add_allowed_uid(&self, uid: impl Into<String>) -> bool {
        self.policy.write().allowed_uids.insert(uid.into())
    }

    /// Remove a UID; returns false if it was not present.
    pub fn remove_allowed_uid(&self, uid: &str) -> bool {
        self.policy.write().allowed_uids.remove(uid)
    }

    /// Add a group; returns false if it was already allowed.
    pub fn add_allowed_group(&self, group_id: u32) -> bool {
        self.policy.write().allowed_group_ids.insert(group_id)
    }

    /// Remove a group; returns false if it was not present.
    pub fn remove_allowed_group(&self, group_id: u32) -> bool {
        self.policy.write().allowed_group_ids.remove(&group_id)
    }

    pub fn allowed_uids(&self) -> Vec<String> {
        self.policy.read().allowed_uids.iter().cloned().collect()
    }

    pub fn allowed_groups(&self) -> Vec<u32> {
        self.policy.read().allowed_group_ids.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticIdentities;

    fn alice() -> Invoker {
        Invoker::new("1", "uid-alice", "alice")
    }

    fn gate(uids: &[&str], groups: &[u32], combine: Combine, lookup: StaticIdentities) -> PermissionGate {
        PermissionGate::new(
            PermissionPolicy::new(
                uids.iter().map(|u| (*u).to_string()),
                groups.iter().copied(),
                combine,
            ),
            Arc::new(lookup),
        )
    }

    #[tokio::test]
    async fn test_open_policy_allows_everyone_without_lookup() {
        let lookup = StaticIdentities::new().failing();
        let gate = gate(&[], &[], Combine::All, lookup);
        assert!(gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_any_uid_match() {
        let gate = gate(&["uid-alice"], &[7], Combine::Any, StaticIdentities::new());
        assert!(gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_any_group_match() {
        let lookup = StaticIdentities::new().with_groups("uid-alice", [3, 7]);
        let gate = gate(&["uid-bob"], &[7], Combine::Any, lookup);
        assert!(gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_any_neither_matches() {
        let lookup = StaticIdentities::new().with_groups("uid-alice", [3]);
        let gate = gate(&["uid-bob"], &[7], Combine::Any, lookup);
        assert!(!gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_any_with_only_groups_configured_lets_everyone_through() {
        // An empty UID list counts as a passing UID check.
        let gate = gate(&[], &[7], Combine::Any, StaticIdentities::new());
        assert!(gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_all_requires_both() {
        let lookup = StaticIdentities::new().with_groups("uid-alice", [7]);
        let both = gate(&["uid-alice"], &[7], Combine::All, lookup.clone());
        assert!(both.check(&alice()).await);

        let wrong_uid = gate(&["uid-bob"], &[7], Combine::All, lookup.clone());
        assert!(!wrong_uid.check(&alice()).await);

        let wrong_group = gate(&["uid-alice"], &[9], Combine::All, lookup);
        assert!(!wrong_group.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_closed() {
        let lookup = StaticIdentities::new().failing();
        let gate = gate(&["uid-alice"], &[7], Combine::All, lookup);
        assert!(!gate.check(&alice()).await);
    }

    #[tokio::test]
    async fn test_admin_mutators_are_idempotent() {
        let gate = gate(&[], &[], Combine::Any, StaticIdentities::new());
        assert!(gate.add_allowed_uid("uid-bob"));
        assert!(!gate.add_allowed_uid("uid-bob"));
        assert!(gate.add_allowed_group(4));
        assert!(!gate.add_allowed_group(4));
        assert_eq!(gate.allowed_uids(), vec!["uid-bob".to_string()]);
        assert_eq!(gate.allowed_groups(), vec![4]);

        // Policy is no longer open: alice is neither listed nor grouped.
        assert!(!gate.check(&alice()).await);

        assert!(gate.remove_allowed_uid("uid-bob"));
        assert!(!gate.remove_allowed_uid("uid-bob"));
        assert!(gate.remove_allowed_group(4));
        assert!(!gate.remove_allowed_group(4));
        assert!(gate.check(&alice()).await);
    }

    #[test]
    fn test_combine_from_require_both() {
        assert_eq!(Combine::from_require_both(true), Combine::All);
        assert_eq!(Combine::from_require_both(false), Combine::Any);
    }
}
