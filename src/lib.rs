#![feature(allocator_api)]

//! An open-addressing hash table using quadratic probing, where every home
//! bucket owns an explicit linked chain of its overflow keys encoded
//! out-of-band in a 16-bit-per-bucket metadata array. The metadata word also
//! stores a hash fragment, so most probe steps skip both the comparison
//! callback and the bucket array entirely.
//!
//! [`VtMap`] and [`VtSet`] are thin wrappers around a shared internal core
//! table -- the Rust-native stand-in for the reference implementation's
//! compile-time template instantiation (see [`entry::TableEntry`]).

pub mod entry;
pub mod hash;
pub mod meta;
pub mod iter;
mod raw;

mod map;
mod set;

pub use hash::DefaultHashBuilder;
pub use map::{VtMap, DEFAULT_MAX_LOAD};
pub use set::VtSet;
