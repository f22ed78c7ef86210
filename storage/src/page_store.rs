//! Backing stores for evicted pages.
//!
//! A page store is an ephemeral local cache: pages are written when evicted
//! and read back when re-materialized. The encoding is an internal concern
//! with no wire compatibility promised.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::hash::Hash;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tracing::trace;

use crate::error::Result;

/// The full contents of one page: a mapping from keys to value sets.
pub type PageEntries<K, V> = HashMap<K, HashSet<V>>;

/// Persistence contract for evicted pages.
pub trait PageStore<K, V>: Send + Sync {
    /// Load the page at `index`, or an empty mapping if it was never saved.
    fn load_page(&self, index: usize) -> Result<PageEntries<K, V>>;

    /// Persist the full page at `index` atomically.
    fn save_page(&self, index: usize, page: &PageEntries<K, V>) -> Result<()>;
}

/// Page store that keeps spill files in a temporary directory.
///
/// Pages are encoded as JSON arrays of `(key, values)` pairs. The directory
/// and its contents are removed when the store is dropped.
#[derive(Debug)]
pub struct TempDirPageStore {
    dir: TempDir,
}

impl TempDirPageStore {
    /// Create a page store backed by a fresh temporary directory.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("findex-pages-").tempdir()?;
        Ok(Self { dir })
    }

    fn page_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("page-{index}.json"))
    }
}

impl<K, V> PageStore<K, V> for TempDirPageStore
where
    K: Eq + Hash + Serialize + DeserializeOwned + Send + Sync,
    V: Eq + Hash + Serialize + DeserializeOwned + Send + Sync,
{
    fn load_page(&self, index: usize) -> Result<PageEntries<K, V>> {
        let path = self.page_path(index);
        if !path.exists() {
            return Ok(PageEntries::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let pairs: Vec<(K, HashSet<V>)> = serde_json::from_reader(reader)?;
        trace!("loaded page {index} ({} keys)", pairs.len());
        Ok(pairs.into_iter().collect())
    }

    fn save_page(&self, index: usize, page: &PageEntries<K, V>) -> Result<()> {
        let path = self.page_path(index);
        let pairs: Vec<(&K, &HashSet<V>)> = page.iter().collect();

        // Write atomically using a temp file
        let temp_path = path.with_extension("json.tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(writer, &pairs)?;
        fs::rename(&temp_path, &path)?;

        trace!("saved page {index} ({} keys)", page.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn page_with(entries: &[(&str, &[&str])]) -> PageEntries<String, String> {
        entries
            .iter()
            .map(|(k, vs)| {
                (
                    k.to_string(),
                    vs.iter().map(|v| v.to_string()).collect::<HashSet<_>>(),
                )
            })
            .collect()
    }

    #[test]
    fn test_load_absent_page_is_empty() {
        let store = TempDirPageStore::new().unwrap();
        let page: PageEntries<String, String> = store.load_page(7).unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let store = TempDirPageStore::new().unwrap();
        let page = page_with(&[("foo", &["a.txt", "b.txt"]), ("bar", &["a.txt"])]);

        PageStore::save_page(&store, 0, &page).unwrap();
        let loaded: PageEntries<String, String> = store.load_page(0).unwrap();
        assert_eq!(loaded, page);
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let store = TempDirPageStore::new().unwrap();
        PageStore::save_page(&store, 3, &page_with(&[("old", &["x"])])).unwrap();
        let replacement = page_with(&[("new", &["y"])]);
        PageStore::save_page(&store, 3, &replacement).unwrap();

        let loaded: PageEntries<String, String> = store.load_page(3).unwrap();
        assert_eq!(loaded, replacement);
    }
}
