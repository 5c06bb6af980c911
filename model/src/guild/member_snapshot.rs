use serde::{Deserialize, Serialize};

use super::GuildMember;
use crate::Snowflake;

/// The full member roster of a guild at one point in time, in the order Discord returned it.
///
/// Serialized as a bare JSON array so the stored value is exactly the concatenation of the
/// pages that were fetched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct MemberSnapshot {
    members: Vec<GuildMember>,
}

impl MemberSnapshot {
    pub fn new(members: Vec<GuildMember>) -> MemberSnapshot {
        MemberSnapshot { members }
    }

    pub fn members(&self) -> &[GuildMember] {
        &self.members
    }

    pub fn into_members(self) -> Vec<GuildMember> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    // No index is kept; lookups are rare compared to the roster size.
    pub fn contains_user(&self, user_id: Snowflake) -> bool {
        self.members.iter().any(|member| member.user.id == user_id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<MemberSnapshot> {
        serde_json::from_str(s)
    }
}
