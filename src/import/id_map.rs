use std::collections::{BTreeMap, HashMap};

use crate::model::TableKind;

/// Session-scoped translation from archive-local identifiers to the
/// identifiers the store assigned on insert. Keys are namespaced per table
/// kind so a meal `3` and a pill `3` never collide.
#[derive(Debug, Default)]
pub struct IdMapTable {
    maps: HashMap<TableKind, HashMap<String, i64>>,
}

impl IdMapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, kind: TableKind, old_id: impl Into<String>, new_id: i64) {
        self.maps.entry(kind).or_default().insert(old_id.into(), new_id);
    }

    pub fn get(&self, kind: TableKind, old_id: &str) -> Option<i64> {
        self.maps.get(&kind)?.get(old_id.trim()).copied()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    /// Drop every mapping of one kind, used when that table's unit of work
    /// failed to commit.
    pub fn forget(&mut self, kind: TableKind) {
        self.maps.remove(&kind);
    }

    pub fn mappings_for(&self, kind: TableKind) -> BTreeMap<String, i64> {
        self.maps
            .get(&kind)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.maps.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_namespaced() {
        let mut map = IdMapTable::new();
        map.put(TableKind::Meal, "3", 10);
        map.put(TableKind::Pill, "3", 20);
        assert_eq!(map.get(TableKind::Meal, "3"), Some(10));
        assert_eq!(map.get(TableKind::Pill, "3"), Some(20));
        assert_eq!(map.get(TableKind::Tag, "3"), None);
    }

    #[test]
    fn forget_and_clear() {
        let mut map = IdMapTable::new();
        map.put(TableKind::Meal, "1", 5);
        map.put(TableKind::Tag, "1", 6);
        map.forget(TableKind::Meal);
        assert_eq!(map.get(TableKind::Meal, "1"), None);
        assert_eq!(map.len(), 1);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn lookup_ignores_surrounding_whitespace() {
        let mut map = IdMapTable::new();
        map.put(TableKind::Exercise, "42", 1);
        assert_eq!(map.get(TableKind::Exercise, " 42 "), Some(1));
        assert_eq!(
            map.mappings_for(TableKind::Exercise),
            BTreeMap::from([("42".to_string(), 1)])
        );
    }
}
