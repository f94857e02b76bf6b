use std::{
    collections::{HashMap, hash_map::RandomState},
    hash::{BuildHasher, Hash, Hasher},
    sync::{Mutex, MutexGuard, PoisonError},
};

/// String-keyed concurrent map split into independently locked stripes.
///
/// A stable hash of the key selects the stripe, so operations on different
/// keys proceed in parallel while operations on the same key serialize. The
/// compound operations run their closure under the stripe lock, which is what
/// keeps duplicate detection, response routing, and removal free of
/// check-then-act races.
pub struct ShardedMap<V> {
    stripes: Vec<Mutex<HashMap<String, V>>>,
    hasher: RandomState,
}

impl<V> ShardedMap<V> {
    /// Creates a map with the given number of stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Inserts `value` when `key` is absent and returns `false`; when an
    /// entry already exists, runs `mutate(existing, value)` under the stripe
    /// lock instead and returns `true`. Nothing is inserted in the duplicate
    /// case: the mutator decides what happens to the existing entry.
    pub fn put_or_do(&self, key: &str, value: V, mutate: impl FnOnce(&mut V, V)) -> bool {
        let mut stripe = self.stripe(key);
        if let Some(existing) = stripe.get_mut(key) {
            mutate(existing, value);
            return true;
        }
        stripe.insert(key.to_owned(), value);
        false
    }

    /// Runs `f(existing)` under the stripe lock when the entry exists.
    /// Returns whether the entry was present.
    pub fn get_and_do(&self, key: &str, f: impl FnOnce(&mut V)) -> bool {
        let mut stripe = self.stripe(key);
        let Some(existing) = stripe.get_mut(key) else {
            return false;
        };
        f(existing);
        true
    }

    /// Removes the entry when `pred(existing)` returns true under the stripe
    /// lock. Returns whether a removal happened.
    pub fn remove_if(&self, key: &str, pred: impl FnOnce(&mut V) -> bool) -> bool {
        let mut stripe = self.stripe(key);
        let Some(existing) = stripe.get_mut(key) else {
            return false;
        };
        if !pred(existing) {
            return false;
        }
        stripe.remove(key);
        true
    }

    /// Number of entries across all stripes.
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|stripe| {
                stripe
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stripe(&self, key: &str) -> MutexGuard<'_, HashMap<String, V>> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.stripes.len();
        // Poisoning is absorbed: the closures used here cannot leave an
        // entry half-mutated.
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
