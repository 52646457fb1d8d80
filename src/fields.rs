// Sparse fieldsets: `?fields=a,b` keeps only those top-level keys of every
// returned object, `?fields!=a,b` drops them. Unknown names are ignored.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
}

fn split(list: &str) -> HashSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl FieldSelection {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        FieldSelection {
            include: query.get("fields").map(|v| split(v)),
            exclude: query.get("fields!").map(|v| split(v)).unwrap_or_default(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }

    fn keeps(&self, key: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.contains(key));
        included && !self.exclude.contains(key)
    }

    /// Apply to an object, or to each object of an array
    pub fn apply(&self, value: &mut Value) {
        if self.is_noop() {
            return;
        }
        match value {
            Value::Object(map) => map.retain(|key, _| self.keeps(key)),
            Value::Array(items) => items.iter_mut().for_each(|item| self.apply(item)),
            _ => {}
        }
    }

    /// Serialize `data` and trim it
    pub fn render<T: Serialize>(&self, data: &T) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(data)?;
        self.apply(&mut value);
        Ok(value)
    }
}
