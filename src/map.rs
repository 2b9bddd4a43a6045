//! [`VtMap`]: the key/value-pair instantiation of [`crate::raw::RawTable`].

use std::alloc::{AllocError, Allocator, Global};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use crate::entry::MapEntry;
use crate::hash::DefaultHashBuilder;
use crate::iter::{Iter, IterMut};
use crate::raw::RawTable;

/// Default max load factor, matching the reference implementation's
/// documented default (`#define MAX_LOAD 0.9` is its usual example; 0.9
/// keeps displacement-limit saturation vanishingly unlikely without the
/// memory overhead of a lower factor).
pub const DEFAULT_MAX_LOAD: f64 = 0.9;

/// An open-addressing hash map using quadratic probing with per-home-bucket
/// overflow chains.
///
/// No iteration order is guaranteed, and the order in which entries are
/// visited can change across any mutating call (matching spec.md's
/// GLOSSARY entry for "iteration order").
pub struct VtMap<K, V, S = DefaultHashBuilder, A: Allocator + Clone = Global> {
    raw: RawTable<MapEntry<K, V>, S, A>,
}

impl<K, V> VtMap<K, V, DefaultHashBuilder, Global> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Note: unlike `insert`/`get`/`remove`, this ignores `reserve`'s
    /// `false` return -- callers who need the no-panic contract at
    /// construction time should build an empty map and call `reserve`
    /// themselves.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self::new();
        map.reserve(capacity);
        map
    }
}

impl<K, V> Default for VtMap<K, V, DefaultHashBuilder, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S: BuildHasher> VtMap<K, V, S, Global> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            raw: RawTable::new_in(hasher, Global, DEFAULT_MAX_LOAD),
        }
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        let mut map = Self::with_hasher(hasher);
        map.reserve(capacity);
        map
    }
}

impl<K, V, S: BuildHasher, A: Allocator + Clone> VtMap<K, V, S, A> {
    pub fn new_in(hasher: S, allocator: A) -> Self {
        Self {
            raw: RawTable::new_in(hasher, allocator, DEFAULT_MAX_LOAD),
        }
    }

    /// Builds a table with a max load factor other than
    /// [`DEFAULT_MAX_LOAD`]. Fixed at construction time and read-only
    /// thereafter, matching spec.md's "configured at template instantiation."
    pub fn with_max_load_in(max_load: f64, hasher: S, allocator: A) -> Self {
        Self {
            raw: RawTable::new_in(hasher, allocator, max_load),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.bucket_count()
    }

    #[inline]
    pub fn hasher(&self) -> &S {
        self.raw.hasher()
    }

    #[inline]
    pub fn allocator(&self) -> &A {
        self.raw.allocator()
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Ensures the map can hold `additional` more entries without growing.
    /// Returns `false` only if the required allocation failed, in which
    /// case the map is left exactly as it was.
    pub fn reserve(&mut self, additional: usize) -> bool {
        self.raw.reserve(self.len() + additional)
    }

    /// Shrinks the backing storage to the smallest size that still
    /// satisfies the max load factor for the current entry count.
    pub fn shrink_to_fit(&mut self) -> bool {
        self.raw.shrink()
    }
}

impl<K: Hash + Eq, V, S: BuildHasher, A: Allocator + Clone> VtMap<K, V, S, A> {
    /// Inserts `key`/`value`, replacing and returning any previous value.
    /// Returns `None` for a fresh key as well as on the (practically
    /// unreachable) allocation-failure path -- see [`VtMap::try_insert`] for
    /// a variant that distinguishes the two.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.try_insert(key, value) {
            Ok(previous) => previous,
            Err(_) => None,
        }
    }

    /// Fallible insert: `Err` carries the rejected key/value back on
    /// allocation failure, so it isn't silently dropped.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, (K, V)> {
        match self.raw.insert(MapEntry(key, value)) {
            Ok((_, replaced)) => Ok(replaced.map(|MapEntry(_, v)| v)),
            Err(MapEntry(k, v)) => Err((k, v)),
        }
    }

    pub fn get<Q: ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.raw.get_raw(key).map(|bucket| &unsafe { self.raw.entry_at(bucket) }.1)
    }

    pub fn get_mut<Q: ?Sized>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.raw
            .get_raw(key)
            .map(move |bucket| &mut unsafe { self.raw.entry_at_mut(bucket) }.1)
    }

    pub fn contains_key<Q: ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.raw.get_raw(key).is_some()
    }

    /// spec.md §4.4 `get_or_insert`: returns the existing value for `key`
    /// if present, otherwise inserts `default` and returns it.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> Option<&mut V> {
        if let Some(bucket) = self.raw.get_raw(&key) {
            return Some(&mut unsafe { self.raw.entry_at_mut(bucket) }.1);
        }
        let bucket = self.raw.get_or_insert(MapEntry(key, default())).ok()?;
        Some(&mut unsafe { self.raw.entry_at_mut(bucket) }.1)
    }

    pub fn remove<Q: ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        self.raw.remove(key).map(|MapEntry(_, v)| v)
    }

    /// Retains only the entries for which `f` returns `true`.
    pub fn retain<F: FnMut(&K, &mut V) -> bool>(&mut self, mut f: F) {
        self.raw.retain(|entry| f(&entry.0, &mut entry.1));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        Iter::new(&self.raw).map(|entry| (&entry.0, &entry.1))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        IterMut::new(&mut self.raw).map(|entry| (&entry.0, &mut entry.1))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        Iter::new(&self.raw).map(|entry| &entry.0)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        Iter::new(&self.raw).map(|entry| &entry.1)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        IterMut::new(&mut self.raw).map(|entry| &mut entry.1)
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher + Clone, A: Allocator + Clone> VtMap<K, V, S, A> {
    /// Fallible clone; `Clone::clone` below panics on allocation failure,
    /// matching the rest of the standard library's `Clone` contract.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(Self {
            raw: self.raw.try_clone()?,
        })
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher + Clone, A: Allocator + Clone> Clone for VtMap<K, V, S, A> {
    fn clone(&self) -> Self {
        self.try_clone().expect("allocation failure while cloning VtMap")
    }
}

impl<K: Hash + Eq + fmt::Debug, V: fmt::Debug, S: BuildHasher, A: Allocator + Clone> fmt::Debug for VtMap<K, V, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Hash + Eq, V: PartialEq, S: BuildHasher, A: Allocator + Clone> PartialEq for VtMap<K, V, S, A> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Hash + Eq, V: Eq, S: BuildHasher, A: Allocator + Clone> Eq for VtMap<K, V, S, A> {}

impl<K: Hash + Eq, V, A: Allocator + Clone> std::iter::FromIterator<(K, V)> for VtMap<K, V, DefaultHashBuilder, A>
where
    A: Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = VtMap::new_in(DefaultHashBuilder::default(), A::default());
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K, V, S: BuildHasher, A: Allocator + Clone> IntoIterator for VtMap<K, V, S, A> {
    type Item = (K, V);
    type IntoIter = std::iter::Map<crate::iter::IntoIter<MapEntry<K, V>, S, A>, fn(MapEntry<K, V>) -> (K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        crate::iter::IntoIter::new(self.raw).map(|entry| (entry.0, entry.1))
    }
}

impl<'a, K, V, S: BuildHasher, A: Allocator + Clone> IntoIterator for &'a VtMap<K, V, S, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Box<dyn Iterator<Item = (&'a K, &'a V)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

