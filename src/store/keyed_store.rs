//! Committed record table, unique on `id`.

use crate::domain::Record;
use ahash::AHashMap;

#[derive(Debug, Clone, Default)]
pub struct KeyedStore {
    rows: AHashMap<String, Record>,
}

impl KeyedStore {
    pub fn new() -> Self {
        KeyedStore::default()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Insert or fully replace the row keyed by `record.id`.
    pub fn replace(&mut self, record: Record) -> Option<Record> {
        self.rows.insert(record.id.clone(), record)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rows.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    pub fn verify_invariants(&self) {
        for (key, record) in &self.rows {
            debug_assert_eq!(
                key, &record.id,
                "Invariant violated: row keyed '{}' holds record '{}'",
                key, record.id
            );
        }
    }
}

impl FromIterator<Record> for KeyedStore {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut store = KeyedStore::new();
        for record in iter {
            store.replace(record);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordFields;

    #[test]
    fn test_replace_is_full_overwrite() {
        let mut store = KeyedStore::new();
        let mut fields = RecordFields::named("Old");
        fields.city = Some("Somewhere".into());
        assert!(store.replace(Record::new("A", fields)).is_none());

        let previous = store.replace(Record::new("A", RecordFields::named("New"))).unwrap();
        assert_eq!(previous.name(), "Old");

        let current = store.get("A").unwrap();
        assert_eq!(current.name(), "New");
        assert!(current.fields.city.is_none(), "absent fields are cleared on replace");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ids_sorted() {
        let store: KeyedStore = ["C", "A", "B"]
            .into_iter()
            .map(|id| Record::new(id, RecordFields::named(id)))
            .collect();
        assert_eq!(store.ids(), vec!["A", "B", "C"]);
        assert!(store.contains("B"));
        assert!(!store.contains("D"));
        store.verify_invariants();
    }
}
