use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::Entity;

/// Natural order of a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOrder {
    /// Newest first. Entities without a timestamp count as newest.
    CreatedDesc,
    /// Server order for bulk results, new entities appended.
    Arrival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Id-addressed cache of one entity type.
#[derive(Debug, Clone)]
pub struct Collection<T: Entity> {
    items: Vec<T>,
    order: CollectionOrder,
}

fn sort_key<T: Entity>(entity: &T) -> DateTime<Utc> {
    entity.created_at().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<T: Entity> Collection<T> {
    pub fn new(order: CollectionOrder) -> Self {
        Self {
            items: Vec::new(),
            order,
        }
    }

    // ===== Getters =====

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|e| e.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.items.iter_mut().find(|e| e.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // ===== Mutations =====

    /// Replace the entity with the same id, or insert it at its natural position.
    pub fn upsert(&mut self, entity: T) -> UpsertOutcome {
        let existing = self.items.iter().position(|e| e.id() == entity.id());
        match (existing, self.order) {
            (Some(pos), CollectionOrder::Arrival) => {
                self.items[pos] = entity;
                UpsertOutcome::Replaced
            }
            (Some(pos), CollectionOrder::CreatedDesc) => {
                self.items.remove(pos);
                self.insert_sorted(entity);
                UpsertOutcome::Replaced
            }
            (None, CollectionOrder::Arrival) => {
                self.items.push(entity);
                UpsertOutcome::Inserted
            }
            (None, CollectionOrder::CreatedDesc) => {
                self.insert_sorted(entity);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.items.iter().position(|e| e.id() == id)?;
        Some(self.items.remove(pos))
    }

    /// Authoritative replacement with a bulk result. Duplicate ids keep the last occurrence.
    pub fn replace_all(&mut self, entities: Vec<T>) {
        let mut seen = HashSet::new();
        let mut deduped: Vec<T> = entities
            .into_iter()
            .rev()
            .filter(|e| seen.insert(e.id().to_string()))
            .collect();
        deduped.reverse();

        if self.order == CollectionOrder::CreatedDesc {
            // Stable: entities with equal timestamps keep server order
            deduped.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        }
        self.items = deduped;
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    // Before the first entity that is strictly older, so a new entity with an
    // equal timestamp lands ahead of existing ones.
    fn insert_sorted(&mut self, entity: T) {
        let key = sort_key(&entity);
        let pos = self.items.partition_point(|e| sort_key(e) > key);
        self.items.insert(pos, entity);
    }
}
