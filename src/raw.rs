//! The bucket/metadata table and the chain-maintenance algorithms that keep
//! it consistent: insertion with in-place eviction, lookup, tail-swap
//! erasure, and rehash/resize.
//!
//! `RawTable<T, S, A>` is generic over the stored bucket content `T` so that
//! [`crate::VtSet`] and [`crate::VtMap`] can both be thin wrappers around it
//! (`T = K` for a set, `T = MapEntry<K, V>` for a map) -- see
//! [`crate::entry::TableEntry`].

use std::alloc::{AllocError, Allocator, Global, Layout};
use std::hash::{BuildHasher, Hasher};
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::entry::TableEntry;
use crate::meta::{self, Metadatum};

/// Smallest non-zero bucket count a table grows into; must be a power of two.
pub(crate) const MIN_NONZERO_BUCKET_COUNT: usize = 8;

/// Caps the doubling loop in [`RawTable::rehash`]. Growing the table this
/// many times without finding a bucket count where every live key fits
/// within the displacement limit would mean either a pathologically bad
/// hasher or `MAX_LOAD` misconfigured past 1.0; either way, surfacing an
/// allocation-style failure beats looping forever (spec's Open Questions
/// flag this as the one failure mode the taxonomy doesn't otherwise name).
const MAX_REHASH_DOUBLINGS: u32 = 32;

/// Shared, read-only metadata buffer for empty tables (invariant I6):
/// letting an empty table's metadata pointer point here, rather than at
/// `NULL`, keeps iteration free of a zero-bucket-count branch, since the
/// four all-ones words are themselves already "the sentinel."
static PLACEHOLDER_METADATA: [Metadatum; 4] = [
    Metadatum::from_raw(0xFFFF),
    Metadatum::from_raw(0xFFFF),
    Metadatum::from_raw(0xFFFF),
    Metadatum::from_raw(0xFFFF),
];

#[inline]
fn hash_of<S: BuildHasher, K: std::hash::Hash + ?Sized>(build_hasher: &S, key: &K) -> u64 {
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);
    hasher.finish()
}

#[inline]
fn fast_rem(n: usize, modulus_power_of_two: usize) -> usize {
    n & (modulus_power_of_two - 1)
}

fn min_bucket_count_for_size(size: usize, max_load: f64) -> usize {
    if size == 0 {
        return 0;
    }
    let mut bucket_count = MIN_NONZERO_BUCKET_COUNT;
    while size as f64 > bucket_count as f64 * max_load {
        bucket_count *= 2;
    }
    bucket_count
}

/// Returns `(layout, storage_offset)` for a single allocation holding
/// `bucket_count + 4` metadata words followed by `bucket_count` buckets of
/// `T`, mirroring the teacher's `layout_for_capacity` (one allocation split
/// between metadata and storage rather than two).
fn layout_for_capacity<T>(bucket_count: usize) -> (Layout, usize) {
    let metadata_layout = Layout::array::<Metadatum>(bucket_count + 4).unwrap();
    let storage_layout = Layout::array::<T>(bucket_count).unwrap();
    metadata_layout.extend(storage_layout).unwrap()
}

/// Allocates backing storage for `bucket_count` buckets (`bucket_count` must
/// be non-zero) and initializes the metadata: zeroed for the real buckets,
/// all-ones for the four trailing sentinel words (invariant I7). Storage is
/// left uninitialized.
unsafe fn allocate_for_capacity<T, A: Allocator>(
    allocator: &A,
    bucket_count: usize,
) -> Result<(NonNull<Metadatum>, NonNull<MaybeUninit<T>>), AllocError> {
    debug_assert!(bucket_count > 0);
    let (layout, storage_offset) = layout_for_capacity::<T>(bucket_count);

    let allocation = allocator.allocate(layout)?;
    let base = allocation.as_mut_ptr();

    let metadata = NonNull::new_unchecked(base.cast::<Metadatum>());
    let storage = NonNull::new_unchecked(base.add(storage_offset).cast::<MaybeUninit<T>>());

    std::ptr::write_bytes(metadata.as_ptr(), 0x00, bucket_count);
    std::ptr::write_bytes(metadata.as_ptr().add(bucket_count), 0xFF, 4);

    Ok((metadata, storage))
}

unsafe fn deallocate<T, A: Allocator>(allocator: &A, metadata: NonNull<Metadatum>, bucket_count: usize) {
    let (layout, _) = layout_for_capacity::<T>(bucket_count);
    allocator.deallocate(metadata.cast(), layout);
}

/// A forward cursor over occupied buckets: the Rust analogue of spec.md's
/// iterator struct (metadatum pointer, data pointer, metadata-end pointer,
/// and a home-bucket hint used by [`RawTable::erase_itr_raw`]).
///
/// `home_bucket = None` is the `SIZE_MAX` "unknown" convention.
#[derive(Clone, Copy)]
pub(crate) struct RawIter<T> {
    pub(crate) data: NonNull<MaybeUninit<T>>,
    pub(crate) metadatum: NonNull<Metadatum>,
    pub(crate) metadata_end: NonNull<Metadatum>,
    pub(crate) home_bucket: Option<usize>,
}

impl<T> RawIter<T> {
    #[inline]
    pub(crate) fn is_end(&self) -> bool {
        self.metadatum == self.metadata_end
    }

    /// # Safety
    /// Caller must ensure `!self.is_end()`, i.e. the cursor points at an
    /// occupied bucket, and that no mutation has invalidated it.
    #[inline]
    pub(crate) unsafe fn get(&self) -> &T {
        self.data.as_ref().assume_init_ref()
    }

    /// # Safety
    /// Same as [`Self::get`].
    #[inline]
    pub(crate) unsafe fn get_mut(&mut self) -> &mut T {
        self.data.as_mut().assume_init_mut()
    }
}

/// Advances a cursor by one bucket and fast-forwards to the next occupied
/// one. Free function (rather than a `RawTable` method) because it only
/// touches the cursor itself, which lets [`crate::iter`]'s safe wrappers
/// walk a table without holding a live borrow of it between steps.
pub(crate) fn advance_raw<T>(mut itr: RawIter<T>) -> RawIter<T> {
    unsafe {
        itr.data = NonNull::new_unchecked(itr.data.as_ptr().add(1));
        itr.metadatum = NonNull::new_unchecked(itr.metadatum.as_ptr().add(1));
    }
    fast_forward(&mut itr);
    itr
}

/// Scans four metadata words at a time looking for the first occupied
/// bucket, using [`meta::first_nonzero_u16_lane`] to land on it precisely.
/// Termination is guaranteed by the trailing sentinel words (I7): an
/// end-state cursor points exactly at the first sentinel word.
fn fast_forward<T>(itr: &mut RawIter<T>) {
    loop {
        // Read (not necessarily aligned to 8 bytes) four lanes at once, the
        // same way the reference implementation uses `memcpy` here instead
        // of a typed load.
        let word = unsafe { std::ptr::read_unaligned(itr.metadatum.as_ptr().cast::<u64>()) };
        if word != 0 {
            let offset = meta::first_nonzero_u16_lane(word) as usize;
            unsafe {
                itr.data = NonNull::new_unchecked(itr.data.as_ptr().add(offset));
                itr.metadatum = NonNull::new_unchecked(itr.metadatum.as_ptr().add(offset));
            }
            itr.home_bucket = None;
            return;
        }
        unsafe {
            itr.data = NonNull::new_unchecked(itr.data.as_ptr().add(4));
            itr.metadatum = NonNull::new_unchecked(itr.metadatum.as_ptr().add(4));
        }
    }
}

/// Open-addressing table: quadratic probing with per-home-bucket overflow
/// chains encoded in `metadata`. `T` is the bucket content (a bare key for a
/// set, a `(key, value)` pair for a map); `S` is the hasher family; `A` is
/// the allocator, which doubles as spec.md's allocator context (`A: Clone`
/// is all that's needed to thread it through rehash and clone).
pub(crate) struct RawTable<T, S, A: Allocator = Global> {
    hasher: S,
    allocator: A,
    max_load: f64,
    key_count: usize,
    bucket_count: usize,
    metadata: NonNull<Metadatum>,
    buckets: NonNull<MaybeUninit<T>>,
}

// Bucket/metadata access: pure pointer arithmetic, no hashing, so these
// don't need `T: TableEntry` or any bound on `S`.
impl<T, S, A: Allocator> RawTable<T, S, A> {
    pub(crate) fn new_in(hasher: S, allocator: A, max_load: f64) -> Self {
        debug_assert!(max_load > 0.0 && max_load <= 1.0);
        Self {
            hasher,
            allocator,
            max_load,
            key_count: 0,
            bucket_count: 0,
            metadata: NonNull::from(&PLACEHOLDER_METADATA).cast(),
            buckets: NonNull::dangling(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.key_count
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.hasher
    }

    #[inline]
    pub(crate) fn allocator(&self) -> &A {
        &self.allocator
    }

    #[inline]
    fn bucket_mask(&self) -> usize {
        self.bucket_count - 1
    }

    #[inline]
    fn next_bucket(&self, home: usize, displacement: u16) -> usize {
        (home + meta::quadratic(displacement)) & self.bucket_mask()
    }

    #[inline]
    unsafe fn metadatum(&self, bucket: usize) -> Metadatum {
        *self.metadata.as_ptr().add(bucket)
    }

    #[inline]
    unsafe fn set_metadatum(&mut self, bucket: usize, value: Metadatum) {
        self.metadata.as_ptr().add(bucket).write(value);
    }

    #[inline]
    unsafe fn entry_ref(&self, bucket: usize) -> &T {
        (*self.buckets.as_ptr().add(bucket)).assume_init_ref()
    }

    #[inline]
    unsafe fn entry_mut(&mut self, bucket: usize) -> &mut T {
        (*self.buckets.as_ptr().add(bucket)).assume_init_mut()
    }

    /// # Safety
    /// `bucket` must currently be occupied.
    pub(crate) unsafe fn entry_at(&self, bucket: usize) -> &T {
        self.entry_ref(bucket)
    }

    /// # Safety
    /// `bucket` must currently be occupied.
    pub(crate) unsafe fn entry_at_mut(&mut self, bucket: usize) -> &mut T {
        self.entry_mut(bucket)
    }

    pub(crate) fn clear(&mut self) {
        for bucket in 0..self.bucket_count {
            unsafe {
                if !self.metadatum(bucket).is_empty() {
                    std::ptr::drop_in_place(self.entry_mut(bucket));
                }
                self.set_metadatum(bucket, Metadatum::empty());
            }
        }
        self.key_count = 0;
    }

    pub(crate) fn first_raw(&self) -> RawIter<T> {
        let mut itr = RawIter {
            data: self.buckets,
            metadatum: self.metadata,
            metadata_end: unsafe { NonNull::new_unchecked(self.metadata.as_ptr().add(self.bucket_count)) },
            home_bucket: None,
        };
        fast_forward(&mut itr);
        itr
    }

    pub(crate) fn next_raw(&self, itr: RawIter<T>) -> RawIter<T> {
        advance_raw(itr)
    }
}

impl<T, S, A: Allocator> Drop for RawTable<T, S, A> {
    fn drop(&mut self) {
        if self.bucket_count == 0 {
            return;
        }
        for bucket in 0..self.bucket_count {
            unsafe {
                if !self.metadatum(bucket).is_empty() {
                    std::ptr::drop_in_place(self.entry_mut(bucket));
                }
            }
        }
        unsafe { deallocate::<T, A>(&self.allocator, self.metadata, self.bucket_count) };
    }
}

impl<T: TableEntry, S: BuildHasher + Clone, A: Allocator + Clone> RawTable<T, S, A> {
    /// spec.md §4.2 `find_first_empty`.
    fn find_first_empty(&self, home: usize) -> Option<(usize, u16)> {
        let mut displacement: u16 = 1;
        let mut linear = 1usize;
        loop {
            let empty = (home + linear) & self.bucket_mask();
            if unsafe { self.metadatum(empty) }.is_empty() {
                return Some((empty, displacement));
            }
            displacement += 1;
            if displacement == meta::DISPLACEMENT_MASK {
                return None;
            }
            linear += displacement as usize;
        }
    }

    /// spec.md §4.2 `find_insert_location_in_chain`.
    fn find_insert_location_in_chain(&self, home: usize, new_displacement: u16) -> usize {
        let mut candidate = home;
        loop {
            let displacement = unsafe { self.metadatum(candidate) }.displacement();
            if displacement > new_displacement {
                return candidate;
            }
            candidate = self.next_bucket(home, displacement);
        }
    }

    /// spec.md §4.2 `evict`. Precondition: `bucket` holds a key whose home
    /// is some other bucket. On failure (no empty bucket reachable within
    /// the displacement limit), the disconnect is rolled back so the table
    /// is left exactly as it was, honoring spec.md §7's "a failed mutating
    /// operation leaves the table in its prior valid state" -- the literal
    /// C source skips this rollback since its failure path is immediately
    /// followed by the caller abandoning the whole `insert_raw` call, but
    /// the invariant spec.md states outright takes precedence here.
    fn evict(&mut self, bucket: usize) -> bool {
        let home = fast_rem(
            hash_of(&self.hasher, unsafe { self.entry_ref(bucket) }.key()) as usize,
            self.bucket_count,
        );

        let mut prev = home;
        loop {
            let displacement = unsafe { self.metadatum(prev) }.displacement();
            let next = self.next_bucket(home, displacement);
            if next == bucket {
                break;
            }
            prev = next;
        }

        let bucket_displacement = unsafe { self.metadatum(bucket) }.displacement();
        let saved_prev = unsafe { self.metadatum(prev) };
        unsafe {
            self.set_metadatum(prev, saved_prev.with_displacement(bucket_displacement));
        }

        let Some((empty, displacement)) = self.find_first_empty(home) else {
            unsafe { self.set_metadatum(prev, saved_prev) };
            return false;
        };

        let insert_after = self.find_insert_location_in_chain(home, displacement);
        let insert_after_displacement = unsafe { self.metadatum(insert_after) }.displacement();
        let moved_frag = unsafe { self.metadatum(bucket) }.hash_frag();

        unsafe {
            let moved = std::ptr::read(self.buckets.as_ptr().add(bucket)).assume_init();
            self.buckets.as_ptr().add(empty).write(MaybeUninit::new(moved));

            self.set_metadatum(empty, Metadatum::new_link(moved_frag, insert_after_displacement));
            let updated = self.metadatum(insert_after).with_displacement(displacement);
            self.set_metadatum(insert_after, updated);
        }

        true
    }

    /// spec.md §4.3 `insert_raw`. `unique` skips the chain-walk dedup check
    /// (used by `rehash`, where keys are already known distinct); `replace`
    /// controls whether a matching existing entry is overwritten.
    ///
    /// Returns `Ok((bucket, replaced))` on success -- `replaced` is the
    /// entry that previously occupied `bucket`, if `replace` overwrote one
    /// -- or `Err(entry)`, giving ownership of the rejected entry back to
    /// the caller, iff the insert could not proceed (zero buckets, load
    /// factor exceeded, eviction failed, or no empty bucket within the
    /// displacement limit). This is spec.md's "end iterator" sentinel,
    /// reshaped so the caller can retry after growing without needing
    /// `T: Clone`.
    fn insert_raw(&mut self, entry: T, unique: bool, replace: bool) -> Result<(usize, Option<T>), T> {
        if self.bucket_count == 0 {
            return Err(entry);
        }

        let hash = hash_of(&self.hasher, entry.key());
        let home = fast_rem(hash as usize, self.bucket_count);
        let hash_frag = meta::hash_frag(hash);
        let home_meta = unsafe { self.metadatum(home) };

        // Case A: home bucket empty, or occupied by a key that doesn't belong there.
        if !home_meta.in_home_bucket() {
            if (self.key_count + 1) as f64 > self.bucket_count as f64 * self.max_load {
                return Err(entry);
            }
            if !home_meta.is_empty() && !self.evict(home) {
                return Err(entry);
            }
            unsafe {
                self.buckets.as_ptr().add(home).write(MaybeUninit::new(entry));
                self.set_metadatum(home, Metadatum::new_home(hash_frag));
            }
            self.key_count += 1;
            return Ok((home, None));
        }

        // Case B: home bucket starts a chain.
        if !unique {
            let mut bucket = home;
            loop {
                let m = unsafe { self.metadatum(bucket) };
                if m.hash_frag() == hash_frag && unsafe { self.entry_ref(bucket) }.key() == entry.key() {
                    if replace {
                        let old = std::mem::replace(unsafe { self.entry_mut(bucket) }, entry);
                        return Ok((bucket, Some(old)));
                    }
                    return Ok((bucket, None));
                }
                if m.is_chain_end() {
                    break;
                }
                bucket = self.next_bucket(home, m.displacement());
            }
        }

        if (self.key_count + 1) as f64 > self.bucket_count as f64 * self.max_load {
            return Err(entry);
        }

        let Some((empty, displacement)) = self.find_first_empty(home) else {
            return Err(entry);
        };

        let prev = self.find_insert_location_in_chain(home, displacement);
        let prev_displacement = unsafe { self.metadatum(prev) }.displacement();

        unsafe {
            self.buckets.as_ptr().add(empty).write(MaybeUninit::new(entry));
            self.set_metadatum(empty, Metadatum::new_link(hash_frag, prev_displacement));
            let updated_prev = self.metadatum(prev).with_displacement(displacement);
            self.set_metadatum(prev, updated_prev);
        }
        self.key_count += 1;
        Ok((empty, None))
    }

    /// spec.md §4.4 `insert`: replaces an existing match, returning the
    /// entry it displaced (`None` if the key was fresh). `Err(entry)` on
    /// allocation failure gives the rejected entry back rather than
    /// silently dropping it.
    pub(crate) fn insert(&mut self, mut entry: T) -> Result<(usize, Option<T>), T> {
        loop {
            match self.insert_raw(entry, false, true) {
                Ok(result) => return Ok(result),
                Err(rejected) => {
                    entry = rejected;
                    if !self.grow_for_insert() {
                        return Err(entry);
                    }
                }
            }
        }
    }

    /// spec.md §4.4 `get_or_insert`: leaves an existing match untouched.
    pub(crate) fn get_or_insert(&mut self, mut entry: T) -> Result<usize, T> {
        loop {
            match self.insert_raw(entry, false, false) {
                Ok((bucket, _)) => return Ok(bucket),
                Err(rejected) => {
                    entry = rejected;
                    if !self.grow_for_insert() {
                        return Err(entry);
                    }
                }
            }
        }
    }

    #[inline]
    fn grow_for_insert(&mut self) -> bool {
        let target = if self.bucket_count == 0 {
            MIN_NONZERO_BUCKET_COUNT
        } else {
            self.bucket_count * 2
        };
        self.rehash(target)
    }

    /// spec.md §4.5 `get`.
    pub(crate) fn get_raw(&self, key: &T::Key) -> Option<usize> {
        if self.key_count == 0 {
            return None;
        }

        let hash = hash_of(&self.hasher, key);
        let home = fast_rem(hash as usize, self.bucket_count);
        let hash_frag = meta::hash_frag(hash);

        if !unsafe { self.metadatum(home) }.in_home_bucket() {
            return None;
        }

        let mut bucket = home;
        loop {
            let m = unsafe { self.metadatum(bucket) };
            if m.hash_frag() == hash_frag && unsafe { self.entry_ref(bucket) }.key() == key {
                return Some(bucket);
            }
            if m.is_chain_end() {
                return None;
            }
            bucket = self.next_bucket(home, m.displacement());
        }
    }

    /// spec.md §4.6 erase-by-bucket. `itr_bucket` must be currently
    /// occupied; `home_bucket_hint` mirrors the iterator's `SIZE_MAX`
    /// "unknown" convention. Returns the removed entry alongside whether
    /// forward iteration resuming from `itr_bucket` should advance past it
    /// (see spec.md's iterator-continuation note): Cases 1 and 2 always
    /// advance; Case 3 advances only if the tail node swapped into
    /// `itr_bucket` came from before it.
    fn erase_bucket(&mut self, itr_bucket: usize, home_bucket_hint: Option<usize>) -> (bool, T) {
        self.key_count -= 1;
        let m = unsafe { self.metadatum(itr_bucket) };

        // Case 1: sole member of its chain.
        if m.in_home_bucket() && m.is_chain_end() {
            let removed = unsafe {
                let removed = std::ptr::read(self.buckets.as_ptr().add(itr_bucket)).assume_init();
                self.set_metadatum(itr_bucket, Metadatum::empty());
                removed
            };
            return (true, removed);
        }

        let home_bucket = match home_bucket_hint {
            Some(h) => h,
            None if m.in_home_bucket() => itr_bucket,
            None => fast_rem(
                hash_of(&self.hasher, unsafe { self.entry_ref(itr_bucket) }.key()) as usize,
                self.bucket_count,
            ),
        };

        // Case 2: tail of a multi-element chain.
        if m.is_chain_end() {
            let mut bucket = home_bucket;
            loop {
                let displacement = unsafe { self.metadatum(bucket) }.displacement();
                let next = self.next_bucket(home_bucket, displacement);
                if next == itr_bucket {
                    let removed = unsafe {
                        let updated = self.metadatum(bucket).with_chain_end();
                        self.set_metadatum(bucket, updated);
                        let removed = std::ptr::read(self.buckets.as_ptr().add(itr_bucket)).assume_init();
                        self.set_metadatum(itr_bucket, Metadatum::empty());
                        removed
                    };
                    return (true, removed);
                }
                bucket = next;
            }
        }

        // Case 3: not the tail -- swap the tail into `itr_bucket` and erase at the tail instead.
        let mut bucket = itr_bucket;
        loop {
            let prev = bucket;
            bucket = self.next_bucket(home_bucket, unsafe { self.metadatum(bucket) }.displacement());

            if unsafe { self.metadatum(bucket) }.is_chain_end() {
                let (advance, removed) = unsafe {
                    let removed = std::ptr::read(self.buckets.as_ptr().add(itr_bucket)).assume_init();
                    let moved = std::ptr::read(self.buckets.as_ptr().add(bucket)).assume_init();
                    self.buckets.as_ptr().add(itr_bucket).write(MaybeUninit::new(moved));

                    let moved_frag = self.metadatum(bucket).hash_frag();
                    let updated = self.metadatum(itr_bucket).with_hash_frag(moved_frag);
                    self.set_metadatum(itr_bucket, updated);

                    let updated_prev = self.metadatum(prev).with_chain_end();
                    self.set_metadatum(prev, updated_prev);
                    self.set_metadatum(bucket, Metadatum::empty());
                    (bucket <= itr_bucket, removed)
                };
                return (advance, removed);
            }
        }
    }

    /// spec.md §6 `erase`: by key.
    pub(crate) fn erase(&mut self, key: &T::Key) -> bool {
        match self.get_raw(key) {
            Some(bucket) => {
                self.erase_bucket(bucket, None);
                true
            }
            None => false,
        }
    }

    /// Erase-by-key that hands the removed entry back, for `VtMap::remove`/
    /// `VtSet::take`.
    pub(crate) fn remove(&mut self, key: &T::Key) -> Option<T> {
        let bucket = self.get_raw(key)?;
        let (_, removed) = self.erase_bucket(bucket, None);
        Some(removed)
    }

    /// spec.md §6 `erase_itr`: consumes an iterator pointing at an occupied
    /// bucket and returns a cursor to the next entry (or an end cursor).
    pub(crate) fn erase_itr_raw(&mut self, itr: RawIter<T>) -> RawIter<T> {
        let itr_bucket = unsafe { itr.metadatum.as_ptr().offset_from(self.metadata.as_ptr()) } as usize;
        let (should_advance, removed) = self.erase_bucket(itr_bucket, itr.home_bucket);
        drop(removed);

        let mut cursor = RawIter {
            data: unsafe { NonNull::new_unchecked(self.buckets.as_ptr().add(itr_bucket)) },
            metadatum: unsafe { NonNull::new_unchecked(self.metadata.as_ptr().add(itr_bucket)) },
            metadata_end: unsafe { NonNull::new_unchecked(self.metadata.as_ptr().add(self.bucket_count)) },
            home_bucket: None,
        };

        if should_advance {
            unsafe {
                cursor.data = NonNull::new_unchecked(cursor.data.as_ptr().add(1));
                cursor.metadatum = NonNull::new_unchecked(cursor.metadatum.as_ptr().add(1));
            }
        }
        fast_forward(&mut cursor);
        cursor
    }

    /// spec.md §8's iteration-with-erase scenario, generalized: walks every
    /// entry, dropping those for which `f` returns `false`.
    pub(crate) fn retain<F: FnMut(&mut T) -> bool>(&mut self, mut f: F) {
        let mut itr = self.first_raw();
        while !itr.is_end() {
            let keep = f(unsafe { itr.get_mut() });
            itr = if keep { self.next_raw(itr) } else { self.erase_itr_raw(itr) };
        }
    }

    /// spec.md §4.7 `rehash`. Bulk-reinserts every live entry into a freshly
    /// allocated table of (at least) `bucket_count` buckets.
    ///
    /// Finding a bucket count at which every key fits within the
    /// displacement limit is done with a cheap metadata-only simulation
    /// first (see [`sim::insert_unique`]), so the real move pass below is
    /// guaranteed to succeed and never needs to unwind a partial move --
    /// which matters in Rust, where (unlike the reference C library) moving
    /// a key out of its old bucket is destructive and can't be "put back"
    /// without risking a double-drop if the attempt is abandoned partway
    /// through. Returns `false` only on allocation failure.
    fn rehash(&mut self, mut bucket_count: usize) -> bool {
        let mut hashes = Vec::with_capacity(self.key_count);
        for bucket in 0..self.bucket_count {
            if !unsafe { self.metadatum(bucket) }.is_empty() {
                let hash = hash_of(&self.hasher, unsafe { self.entry_ref(bucket) }.key());
                hashes.push((bucket, hash));
            }
        }

        let mut attempts = 0u32;
        loop {
            if sim::fits(bucket_count, self.max_load, hashes.iter().map(|&(_, h)| h)) {
                break;
            }
            attempts += 1;
            if attempts >= MAX_REHASH_DOUBLINGS {
                return false;
            }
            bucket_count *= 2;
        }

        let (new_metadata, new_buckets) = match unsafe { allocate_for_capacity::<T, A>(&self.allocator, bucket_count) } {
            Ok(pair) => pair,
            Err(_) => return false,
        };

        let mut new_table = RawTable {
            hasher: self.hasher.clone(),
            allocator: self.allocator.clone(),
            max_load: self.max_load,
            key_count: 0,
            bucket_count,
            metadata: new_metadata,
            buckets: new_buckets,
        };

        for &(old_bucket, _hash) in &hashes {
            let entry = unsafe { std::ptr::read(self.buckets.as_ptr().add(old_bucket)).assume_init() };
            if let Err(_lost) = new_table.insert_raw(entry, true, false) {
                debug_assert!(
                    false,
                    "rehash's metadata-only simulation guaranteed this insert would succeed"
                );
            }
        }

        if self.bucket_count > 0 {
            unsafe { deallocate::<T, A>(&self.allocator, self.metadata, self.bucket_count) };
        }

        // Old arrays are logically drained (every live entry's bytes were
        // moved above); overwrite `self` without running its `Drop`.
        let old = std::mem::replace(self, new_table);
        std::mem::forget(old);
        true
    }

    /// spec.md §4.8 `reserve`.
    pub(crate) fn reserve(&mut self, size: usize) -> bool {
        let bucket_count = min_bucket_count_for_size(size, self.max_load);
        if bucket_count <= self.bucket_count {
            return true;
        }
        self.rehash(bucket_count)
    }

    /// spec.md §4.8 `shrink`.
    pub(crate) fn shrink(&mut self) -> bool {
        let bucket_count = min_bucket_count_for_size(self.key_count, self.max_load);
        if bucket_count == self.bucket_count {
            return true;
        }
        if bucket_count == 0 {
            if self.bucket_count > 0 {
                unsafe { deallocate::<T, A>(&self.allocator, self.metadata, self.bucket_count) };
            }
            self.bucket_count = 0;
            self.metadata = NonNull::from(&PLACEHOLDER_METADATA).cast();
            self.buckets = NonNull::dangling();
            return true;
        }
        self.rehash(bucket_count)
    }
}

impl<T, S, A> RawTable<T, S, A>
where
    T: TableEntry + Clone,
    S: BuildHasher + Clone,
    A: Allocator + Clone,
{
    /// spec.md §6 `init_clone`: deep-copies both arrays, no aliasing.
    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        if self.bucket_count == 0 {
            return Ok(Self::new_in(self.hasher.clone(), self.allocator.clone(), self.max_load));
        }

        let (new_metadata, new_buckets) = unsafe { allocate_for_capacity::<T, A>(&self.allocator, self.bucket_count)? };

        unsafe {
            std::ptr::copy_nonoverlapping(self.metadata.as_ptr(), new_metadata.as_ptr(), self.bucket_count + 4);
        }

        for bucket in 0..self.bucket_count {
            if unsafe { self.metadatum(bucket) }.is_empty() {
                continue;
            }
            let cloned = unsafe { self.entry_ref(bucket) }.clone();
            unsafe {
                new_buckets.as_ptr().add(bucket).write(MaybeUninit::new(cloned));
            }
        }

        Ok(Self {
            hasher: self.hasher.clone(),
            allocator: self.allocator.clone(),
            max_load: self.max_load,
            key_count: self.key_count,
            bucket_count: self.bucket_count,
            metadata: new_metadata,
            buckets: new_buckets,
        })
    }
}

/// Metadata-only replay of `insert_raw(unique = true)`, used by `rehash` to
/// find a safe target bucket count before moving any real data. None of
/// `insert_raw`'s failure conditions (load factor, displacement-limit
/// saturation) depend on the key/value payload -- only on hashes and the
/// existing metadata layout -- so this can decide success or failure with
/// nothing but a scratch metadata array and a side table of "which input
/// hash currently occupies this bucket" (needed because eviction has to
/// rehash the occupying key to find its chain).
mod sim {
    use crate::meta::{self, Metadatum};

    pub(super) fn fits(bucket_count: usize, max_load: f64, hashes: impl Iterator<Item = u64>) -> bool {
        let mut metadata = vec![Metadatum::empty(); bucket_count];
        let mut occupant_hash = vec![0u64; bucket_count];
        let mut key_count = 0usize;
        for hash in hashes {
            if !insert_unique(&mut metadata, &mut occupant_hash, bucket_count, &mut key_count, max_load, hash) {
                return false;
            }
        }
        true
    }

    fn find_first_empty(metadata: &[Metadatum], bucket_count: usize, home: usize) -> Option<(usize, u16)> {
        let mask = bucket_count - 1;
        let mut displacement: u16 = 1;
        let mut linear = 1usize;
        loop {
            let empty = (home + linear) & mask;
            if metadata[empty].is_empty() {
                return Some((empty, displacement));
            }
            displacement += 1;
            if displacement == meta::DISPLACEMENT_MASK {
                return None;
            }
            linear += displacement as usize;
        }
    }

    fn find_insert_location(metadata: &[Metadatum], bucket_count: usize, home: usize, new_displacement: u16) -> usize {
        let mask = bucket_count - 1;
        let mut candidate = home;
        loop {
            let displacement = metadata[candidate].displacement();
            if displacement > new_displacement {
                return candidate;
            }
            candidate = (home + meta::quadratic(displacement)) & mask;
        }
    }

    fn evict(metadata: &mut [Metadatum], occupant_hash: &mut [u64], bucket_count: usize, bucket: usize) -> bool {
        let mask = bucket_count - 1;
        let home = (occupant_hash[bucket] as usize) & mask;

        let mut prev = home;
        loop {
            let displacement = metadata[prev].displacement();
            let next = (home + meta::quadratic(displacement)) & mask;
            if next == bucket {
                break;
            }
            prev = next;
        }

        let bucket_displacement = metadata[bucket].displacement();
        let saved_prev = metadata[prev];
        metadata[prev] = metadata[prev].with_displacement(bucket_displacement);

        let Some((empty, displacement)) = find_first_empty(metadata, bucket_count, home) else {
            metadata[prev] = saved_prev;
            return false;
        };

        let insert_after = find_insert_location(metadata, bucket_count, home, displacement);
        let insert_after_displacement = metadata[insert_after].displacement();
        let moved_frag = metadata[bucket].hash_frag();

        metadata[empty] = Metadatum::new_link(moved_frag, insert_after_displacement);
        metadata[insert_after] = metadata[insert_after].with_displacement(displacement);
        occupant_hash[empty] = occupant_hash[bucket];
        true
    }

    fn insert_unique(
        metadata: &mut [Metadatum],
        occupant_hash: &mut [u64],
        bucket_count: usize,
        key_count: &mut usize,
        max_load: f64,
        hash: u64,
    ) -> bool {
        let mask = bucket_count - 1;
        let home = (hash as usize) & mask;
        let hash_frag = meta::hash_frag(hash);
        let home_meta = metadata[home];

        if !home_meta.in_home_bucket() {
            if (*key_count + 1) as f64 > bucket_count as f64 * max_load {
                return false;
            }
            if !home_meta.is_empty() && !evict(metadata, occupant_hash, bucket_count, home) {
                return false;
            }
            metadata[home] = Metadatum::new_home(hash_frag);
            occupant_hash[home] = hash;
            *key_count += 1;
            return true;
        }

        if (*key_count + 1) as f64 > bucket_count as f64 * max_load {
            return false;
        }
        let Some((empty, displacement)) = find_first_empty(metadata, bucket_count, home) else {
            return false;
        };
        let prev = find_insert_location(metadata, bucket_count, home, displacement);
        let prev_displacement = metadata[prev].displacement();
        metadata[empty] = Metadatum::new_link(hash_frag, prev_displacement);
        metadata[prev] = metadata[prev].with_displacement(displacement);
        occupant_hash[empty] = hash;
        *key_count += 1;
        true
    }
}
