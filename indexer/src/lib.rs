//! # findex-indexer
//!
//! Live file indexing with exact-word search.
//!
//! The [`FileIndexer`] watches files and directories for changes, extracts
//! words from allowed files, and keeps an inverted index (backed by
//! `findex-storage`) up to date.
//!
//! ## Architecture
//!
//! ```text
//! add/remove/search ──► FileIndexer ──► PathFilter ──► Tokenizer
//!                           │                              │
//!                      WatchService                        ▼
//!                      (watch loop)              InvertedIndexStore
//! ```
//!
//! The concrete word splitting ([`DelimiterTokenizer`]), allow-list
//! ([`ExtensionFilter`]), and watch primitive ([`NotifyWatchService`]) are
//! simple strategies behind narrow traits; swap them without touching the
//! indexing engine.

pub mod error;
pub mod event;
pub mod filter;
pub mod indexer;
pub mod tokenizer;
pub mod watch;

pub use error::{IndexError, Result};
pub use event::{FileEvent, FileEventKind};
pub use filter::{ExtensionFilter, PathFilter};
pub use indexer::{ActiveIndexer, FileIndexer, LoopState};
pub use tokenizer::{DelimiterTokenizer, Tokenizer};
pub use watch::{EventBatch, NotifyWatchService, WatchService, WatchToken};

// Re-exports from the storage layer for convenience
pub use findex_storage::{InvertedIndexStore, PagedMapConfig};
