pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod time;

use std::hash::{BuildHasherDefault, Hash, Hasher};

pub use hashbrown;
pub use rustc_hash::FxHasher;
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxHashSet<K> = hashbrown::HashSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;

/// Fast non-cryptographic content hash, only stable within one build (repeat detection).
pub fn content_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
