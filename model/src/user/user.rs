use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Snowflake;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: Snowflake,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(id: Snowflake) -> User {
        User {
            id,
            extra: Map::new(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.extra.get("username").and_then(Value::as_str)
    }
}
