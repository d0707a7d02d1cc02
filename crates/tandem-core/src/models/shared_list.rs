use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedListItem {
    pub id: String,
    pub list_id: String,
    pub text: String,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub added_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub items: Vec<SharedListItem>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SharedList {
    /// Replace the item with the same id, or append it in list order.
    pub fn upsert_item(&mut self, item: SharedListItem) {
        match self.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn remove_item(&mut self, item_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        before != self.items.len()
    }
}

impl Entity for SharedList {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, text: &str) -> SharedListItem {
        SharedListItem {
            id: id.to_string(),
            list_id: "l1".to_string(),
            text: text.to_string(),
            checked: false,
            added_by: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_upsert_item_replaces_in_place() {
        let mut list = SharedList {
            id: "l1".to_string(),
            name: "Groceries".to_string(),
            owner_id: None,
            members: vec![],
            items: vec![item("a", "eggs"), item("b", "milk")],
            created_at: None,
            extra: Map::new(),
        };

        list.upsert_item(item("a", "free-range eggs"));
        list.upsert_item(item("c", "bread"));

        let texts: Vec<&str> = list.items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["free-range eggs", "milk", "bread"]);
        assert!(list.remove_item("b"));
        assert!(!list.remove_item("b"));
    }
}
