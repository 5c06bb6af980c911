use crate::store::KeyValueStore;
use crate::Result;

use model::guild::MemberSnapshot;
use model::Snowflake;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Member,
    NotMember,
    /// No roster has been stored yet, so membership can't be confirmed.
    SnapshotMissing,
}

impl Membership {
    pub fn is_member(&self) -> bool {
        matches!(self, Membership::Member)
    }
}

/// Answers membership queries against the last roster snapshot written to the store.
/// Never writes.
pub struct MembershipCache<S: KeyValueStore> {
    store: Arc<S>,
    snapshot_key: Box<str>,
}

impl<S: KeyValueStore> MembershipCache<S> {
    pub fn new(store: Arc<S>, snapshot_key: impl Into<Box<str>>) -> Self {
        Self {
            store,
            snapshot_key: snapshot_key.into(),
        }
    }

    pub async fn snapshot(&self) -> Result<Option<MemberSnapshot>> {
        match self.store.get(&self.snapshot_key).await? {
            Some(raw) => Ok(Some(MemberSnapshot::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn is_member_of_guild(&self, user_id: Snowflake) -> Result<Membership> {
        let membership = match self.snapshot().await? {
            Some(snapshot) if snapshot.contains_user(user_id) => Membership::Member,
            Some(_) => Membership::NotMember,
            None => Membership::SnapshotMissing,
        };

        Ok(membership)
    }
}
