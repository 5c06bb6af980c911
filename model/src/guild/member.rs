use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::user::User;
use crate::Snowflake;
use chrono::{DateTime, Utc};

/// A guild member as returned by `GET /guilds/{guild.id}/members`.
///
/// Only `user.id` is interpreted. Everything else is carried through untouched so a stored
/// snapshot matches what Discord sent, field for field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GuildMember {
    pub user: User,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GuildMember {
    pub fn new(user: User) -> GuildMember {
        GuildMember {
            user,
            extra: Map::new(),
        }
    }

    pub fn user_id(&self) -> Snowflake {
        self.user.id
    }

    pub fn roles(&self) -> Vec<Snowflake> {
        self.extra
            .get("roles")
            .and_then(|roles| serde_json::from_value(roles.clone()).ok())
            .unwrap_or_default()
    }

    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        self.extra
            .get("joined_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}
