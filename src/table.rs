use std::collections::HashMap;
use std::hash::Hash;

/// Owned aggregate table. Entries are created zeroed on first touch and never removed.
#[derive(Debug, Clone, derive_more::Deref, derive_more::DerefMut)]
pub struct Table<K, V>(HashMap<K, V>);

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Table(HashMap::new())
    }
}

impl<K, V> Table<K, V> {
    pub fn into_inner(self) -> HashMap<K, V> {
        self.0
    }
}

impl<K: Hash + Eq, V: Default> Table<K, V> {
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V {
        self.0.entry(key).or_default()
    }
}

impl<K: Hash + Eq> Table<K, u64> {
    /// Increments the counter stored under `key`, returning the new value.
    pub fn increment(&mut self, key: K) -> u64 {
        let count = self.get_or_insert_default(key);
        *count += 1;
        *count
    }

    /// Current counter value, 0 for keys never seen.
    pub fn count(&self, key: &K) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for Table<K, V> {
    fn from_iter<T: IntoIterator<Item=(K, V)>>(iter: T) -> Self {
        Table(iter.into_iter().collect())
    }
}
