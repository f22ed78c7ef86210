//! # findex-storage
//!
//! Storage layer for the findex live file indexer.
//!
//! The layer is built from two pieces:
//!
//! - A [`MultiMap`] abstraction (key to set-of-values) with two
//!   implementations: the trivial [`InMemoryMultiMap`], and
//!   [`PagedMultiMap`], which shards its keyspace into pages and bounds
//!   resident memory by spilling pages to a [`PageStore`].
//! - [`InvertedIndexStore`], which pairs two multimaps (word to paths,
//!   path to words) behind a single lock and guarantees that the two
//!   directions never disagree from the outside.

pub mod error;
pub mod index;
pub mod multimap;
pub mod page_store;
pub mod paged;

pub use error::{Result, StorageError};
pub use index::InvertedIndexStore;
pub use multimap::{InMemoryMultiMap, MultiMap};
pub use page_store::{PageEntries, PageStore, TempDirPageStore};
pub use paged::{PagedMapConfig, PagedMultiMap};
