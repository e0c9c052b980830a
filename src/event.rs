use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Model;

/// Free-form, timestamped event kept in the `events` table.
///
/// Whatever keys the payload carries become fields of the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub body: BTreeMap<String, Value>,
}

impl Event {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Event {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            body: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Model for Event {
    fn has_timestamp() -> bool {
        true
    }

    fn db_table_name() -> String {
        "events".to_string()
    }
}
