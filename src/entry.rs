//! The seam that lets [`crate::raw::RawTable`] stay generic over "key only"
//! (set) and "key plus value" (map) instantiations.
//!
//! This plays the role spec.md leaves to the template-instantiation layer:
//! one bucket content type `T` is chosen per instantiation (`K` for a set,
//! `(K, V)` for a map), and every hash/compare operation in the core table
//! goes through `T::Key` rather than `T` itself.

use core::hash::Hash;

/// A bucket content type that knows how to project out its key.
pub trait TableEntry {
    type Key: Hash + Eq;

    fn key(&self) -> &Self::Key;
}

/// The set instantiation: the bucket content *is* the key.
impl<K: Hash + Eq> TableEntry for K {
    type Key = K;

    #[inline]
    fn key(&self) -> &K {
        self
    }
}

/// The map instantiation: the bucket content is a `(key, value)` pair.
///
/// `V` is deliberately unconstrained: only the key participates in hashing
/// and comparison, matching spec.md's "HASH_FN/CMPR_FN apply to KEY_TY
/// regardless of VAL_TY."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry<K, V>(pub K, pub V);

impl<K: Hash + Eq, V> TableEntry for MapEntry<K, V> {
    type Key = K;

    #[inline]
    fn key(&self) -> &K {
        &self.0
    }
}
